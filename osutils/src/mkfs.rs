//! `mkfs.<fstype>` invocation with curtin's per-family flag conventions
//! (label, uuid, sector/cluster size, force) and release-specific quirks
//! (§4.9).

use std::path::Path;

use anyhow::{bail, Context, Error};
use uuid::Uuid;

use crate::{blkid, dependencies::Dependency, exe::RunAndCheck};

/// A filesystem family `mkfs` knows how to build. `Other` covers anything
/// curtin doesn't special-case (e.g. `minix`), invoked with no extra flags
/// beyond the device path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MkfsFileSystemType {
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Xfs,
    Jfs,
    Reiserfs,
    Vfat,
    Ntfs,
    Swap,
    Other(String),
}

impl MkfsFileSystemType {
    pub fn parse(fstype: &str) -> Self {
        match fstype {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "btrfs" => Self::Btrfs,
            "xfs" => Self::Xfs,
            "jfs" => Self::Jfs,
            "reiserfs" => Self::Reiserfs,
            "fat12" | "fat16" | "fat32" | "vfat" => Self::Vfat,
            "ntfs" => Self::Ntfs,
            "swap" => Self::Swap,
            other => Self::Other(other.to_string()),
        }
    }

    /// The mkfs binary suffix, i.e. what follows `mkfs.` or `mkswap`.
    pub fn mkfs_command(&self) -> &'static str {
        match self {
            Self::Ext2 => "mkfs.ext2",
            Self::Ext3 => "mkfs.ext3",
            Self::Ext4 => "mkfs.ext4",
            Self::Btrfs => "mkfs.btrfs",
            Self::Xfs => "mkfs.xfs",
            Self::Jfs => "mkfs.jfs",
            Self::Reiserfs => "mkfs.reiserfs",
            Self::Vfat => "mkfs.vfat",
            Self::Ntfs => "mkfs.ntfs",
            Self::Swap => "mkswap",
            Self::Other(_) => "mkfs",
        }
    }

    /// Whether `mkfs` lets us pass a UUID directly, vs. needing a read-back
    /// via `blkid` after the fact.
    fn supports_explicit_uuid(&self, release: Option<ReleaseFlagOverride>) -> bool {
        uuid_flag(self, release).is_some()
    }

    /// Maximum label length the family's `mkfs` tool accepts.
    fn max_label_len(&self) -> Option<usize> {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => Some(16),
            Self::Btrfs => Some(256),
            Self::Xfs => Some(12),
            Self::Jfs => Some(16),
            Self::Reiserfs => Some(16),
            Self::Vfat => Some(11),
            Self::Ntfs => Some(32),
            Self::Swap => Some(15),
            Self::Other(_) => None,
        }
    }
}

/// Release-specific overrides to the UUID flag for filesystems whose
/// `mkfs` tool changed its option spelling across distro releases. Mirrors
/// the historical Ubuntu precise/trusty quirks: `mkfs.btrfs` took `-U` only
/// from trusty onward, and `mkfs.xfs`'s UUID flag moved from a bare `-U` to
/// `-m uuid=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFlagOverride {
    Precise,
    Trusty,
}

/// Whether an out-of-range label is a hard error or silently truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelMode {
    #[default]
    Strict,
    Lax,
}

fn uuid_flag(fstype: &MkfsFileSystemType, release: Option<ReleaseFlagOverride>) -> Option<&'static str> {
    match (fstype, release) {
        (MkfsFileSystemType::Btrfs, Some(ReleaseFlagOverride::Precise)) => None,
        (MkfsFileSystemType::Btrfs, _) => Some("-U"),
        (MkfsFileSystemType::Xfs, Some(ReleaseFlagOverride::Precise)) => Some("-U"),
        (MkfsFileSystemType::Xfs, _) => Some("-m"),
        (MkfsFileSystemType::Ext2 | MkfsFileSystemType::Ext3 | MkfsFileSystemType::Ext4, _) => Some("-U"),
        (MkfsFileSystemType::Jfs, _) => None,
        (MkfsFileSystemType::Reiserfs, _) => Some("-u"),
        (MkfsFileSystemType::Vfat | MkfsFileSystemType::Ntfs, _) => None,
        _ => None,
    }
}

fn label_flag(fstype: &MkfsFileSystemType) -> Option<&'static str> {
    match fstype {
        MkfsFileSystemType::Ext2 | MkfsFileSystemType::Ext3 | MkfsFileSystemType::Ext4 => Some("-L"),
        MkfsFileSystemType::Btrfs => Some("-L"),
        MkfsFileSystemType::Xfs => Some("-L"),
        MkfsFileSystemType::Jfs => Some("-L"),
        MkfsFileSystemType::Reiserfs => Some("-l"),
        MkfsFileSystemType::Vfat => Some("-n"),
        MkfsFileSystemType::Ntfs => Some("-L"),
        MkfsFileSystemType::Swap => Some("-L"),
        MkfsFileSystemType::Other(_) => None,
    }
}

/// Flags that force overwrite of an existing filesystem signature without
/// prompting; curtin always wants this since formatting is explicit intent.
fn force_flag(fstype: &MkfsFileSystemType) -> Option<&'static str> {
    match fstype {
        MkfsFileSystemType::Ext2 | MkfsFileSystemType::Ext3 | MkfsFileSystemType::Ext4 => Some("-F"),
        MkfsFileSystemType::Btrfs => Some("-f"),
        MkfsFileSystemType::Xfs => Some("-f"),
        MkfsFileSystemType::Reiserfs => Some("-f"),
        MkfsFileSystemType::Ntfs => Some("-F"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MkfsOptions {
    pub label: Option<String>,
    pub uuid: Option<String>,
    pub release_override: Option<ReleaseFlagOverride>,
    /// Logical sector size of the underlying blockdev, when known. Passed
    /// as `size=N` for xfs; for fat, its mere presence (non-512) triggers
    /// the `-s 1` cluster-size workaround for a known `mkfs.vfat` bug.
    pub sector_size: Option<u64>,
    pub label_mode: LabelMode,
}

fn clip_label(fstype: &MkfsFileSystemType, label: &str, mode: LabelMode) -> Result<String, Error> {
    let Some(max) = fstype.max_label_len() else {
        return Ok(label.to_string());
    };
    if label.len() <= max {
        return Ok(label.to_string());
    }
    match mode {
        LabelMode::Strict => bail!(
            "label '{label}' is {} characters, exceeding the {max}-character limit for {:?}",
            label.len(),
            fstype
        ),
        LabelMode::Lax => Ok(label.chars().take(max).collect()),
    }
}

/// Builds the filesystem on `device_path`, applying label/uuid/sector-size/
/// force flags per the filesystem family's conventions, and returns the
/// filesystem's final UUID (§4.9 point 6).
pub fn run(
    device_path: &Path,
    filesystem: &MkfsFileSystemType,
    options: &MkfsOptions,
) -> Result<Uuid, Error> {
    if filesystem.mkfs_command() == "mkfs" {
        bail!(
            "no mkfs handler for filesystem type '{:?}'; this is not one of curtin's known fstypes",
            filesystem
        );
    }

    let label = options
        .label
        .as_deref()
        .map(|l| clip_label(filesystem, l, options.label_mode))
        .transpose()?;

    let explicit_uuid = options.uuid.clone().or_else(|| {
        filesystem
            .supports_explicit_uuid(options.release_override)
            .then(|| Uuid::new_v4().to_string())
    });

    if matches!(filesystem, MkfsFileSystemType::Swap) {
        let mut cmd = Dependency::Mkfs.cmd();
        cmd.arg("--type").arg("swap");
        if let Some(label) = &label {
            cmd.arg("-L").arg(label);
        }
        if let Some(uuid) = &explicit_uuid {
            cmd.arg("-U").arg(uuid);
        }
        cmd.arg(device_path);
        cmd.run_and_check().context("failed to run mkswap")?;
        return finalize_uuid(device_path, explicit_uuid);
    }

    let mut cmd = std::process::Command::new(filesystem.mkfs_command());

    if let Some(flag) = force_flag(filesystem) {
        cmd.arg(flag);
    }

    if let (Some(flag), Some(label)) = (label_flag(filesystem), &label) {
        cmd.arg(flag).arg(label);
    }

    if let (Some(flag), Some(uuid)) = (uuid_flag(filesystem, options.release_override), &explicit_uuid) {
        if matches!(filesystem, MkfsFileSystemType::Xfs) && flag == "-m" {
            cmd.arg("-m").arg(format!("uuid={uuid}"));
        } else {
            cmd.arg(flag).arg(uuid);
        }
    }

    if let Some(sector_size) = options.sector_size {
        match filesystem {
            MkfsFileSystemType::Xfs => {
                cmd.arg("-s").arg(format!("size={sector_size}"));
            }
            MkfsFileSystemType::Vfat if sector_size != 512 => {
                // mkfs.vfat miscalculates cluster size on non-512 sectors; a
                // cluster count of 1 sector works around it.
                cmd.arg("-s").arg("1");
            }
            _ => {}
        }
    }

    cmd.arg(device_path);
    cmd.run_and_check()
        .with_context(|| format!("failed to run {}", filesystem.mkfs_command()))?;

    finalize_uuid(device_path, explicit_uuid)
}

/// If we set the UUID ourselves, trust it; otherwise read back whatever
/// `mkfs` generated via `blkid`.
fn finalize_uuid(device_path: &Path, explicit_uuid: Option<String>) -> Result<Uuid, Error> {
    if let Some(uuid) = explicit_uuid {
        return Uuid::parse_str(&uuid).with_context(|| format!("generated invalid uuid '{uuid}'"));
    }
    blkid::get_filesystem_uuid(device_path).with_context(|| {
        format!(
            "failed to read back filesystem uuid for '{}' via blkid",
            device_path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_fat_variants() {
        assert_eq!(MkfsFileSystemType::parse("fat32"), MkfsFileSystemType::Vfat);
        assert_eq!(MkfsFileSystemType::parse("vfat"), MkfsFileSystemType::Vfat);
    }

    #[test]
    fn test_btrfs_uuid_flag_absent_on_precise() {
        assert_eq!(
            uuid_flag(&MkfsFileSystemType::Btrfs, Some(ReleaseFlagOverride::Precise)),
            None
        );
        assert_eq!(
            uuid_flag(&MkfsFileSystemType::Btrfs, Some(ReleaseFlagOverride::Trusty)),
            Some("-U")
        );
    }

    #[test]
    fn test_xfs_uuid_flag_changes_on_precise() {
        assert_eq!(
            uuid_flag(&MkfsFileSystemType::Xfs, Some(ReleaseFlagOverride::Precise)),
            Some("-U")
        );
        assert_eq!(uuid_flag(&MkfsFileSystemType::Xfs, None), Some("-m"));
    }

    #[test]
    fn test_unknown_fstype_is_rejected() {
        let result = run(
            Path::new("/dev/null"),
            &MkfsFileSystemType::parse("minix"),
            &MkfsOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_label_clip_strict_errors() {
        let result = clip_label(&MkfsFileSystemType::Vfat, "way-too-long-a-label", LabelMode::Strict);
        assert!(result.is_err());
    }

    #[test]
    fn test_label_clip_lax_truncates() {
        let result = clip_label(&MkfsFileSystemType::Vfat, "way-too-long-a-label", LabelMode::Lax).unwrap();
        assert_eq!(result, "way-too-long");
        assert_eq!(result.len(), 12);
    }

    #[test]
    fn test_label_within_limit_is_unchanged() {
        let result = clip_label(&MkfsFileSystemType::Ext4, "data", LabelMode::Strict).unwrap();
        assert_eq!(result, "data");
    }
}
