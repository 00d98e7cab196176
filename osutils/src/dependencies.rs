//! External commands this crate shells out to. Centralizing the binary
//! names here means a single place to check when something is missing from
//! `PATH` on a given distro image.

use std::process::Command;

/// A binary this crate depends on. `.cmd()` builds a fresh [`Command`]
/// pointed at it; callers add args and run it through
/// [`crate::exe::RunAndCheck`]/[`crate::exe::OutputAndCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Mkfs,
    Wipefs,
    Blkid,
    Lsblk,
    Lsof,
    Mdadm,
    Mount,
    Umount,
    Touch,
    Mkdir,
    Parted,
    Sfdisk,
    Udevadm,
    Pvcreate,
    Vgcreate,
    Lvcreate,
    Vgchange,
    Cryptsetup,
    MakeBcache,
    BcacheSuperShow,
    Zpool,
    Zfs,
    Dasdfmt,
    Dasdview,
    Chroot,
    Tar,
    Chmod,
    Mknod,
    Mountpoint,
    Unshare,
    Partx,
    ShellArchive,
    Dd,
}

impl Dependency {
    /// The binary name as invoked on `PATH`.
    pub fn name(&self) -> &'static str {
        match self {
            Dependency::Mkfs => "mkfs",
            Dependency::Wipefs => "wipefs",
            Dependency::Blkid => "blkid",
            Dependency::Lsblk => "lsblk",
            Dependency::Lsof => "lsof",
            Dependency::Mdadm => "mdadm",
            Dependency::Mount => "mount",
            Dependency::Umount => "umount",
            Dependency::Touch => "touch",
            Dependency::Mkdir => "mkdir",
            Dependency::Parted => "parted",
            Dependency::Sfdisk => "sfdisk",
            Dependency::Udevadm => "udevadm",
            Dependency::Pvcreate => "pvcreate",
            Dependency::Vgcreate => "vgcreate",
            Dependency::Lvcreate => "lvcreate",
            Dependency::Vgchange => "vgchange",
            Dependency::Cryptsetup => "cryptsetup",
            Dependency::MakeBcache => "make-bcache",
            Dependency::BcacheSuperShow => "bcache-super-show",
            Dependency::Zpool => "zpool",
            Dependency::Zfs => "zfs",
            Dependency::Dasdfmt => "dasdfmt",
            Dependency::Dasdview => "dasdview",
            Dependency::Chroot => "chroot",
            Dependency::Tar => "tar",
            Dependency::Chmod => "chmod",
            Dependency::Mknod => "mknod",
            Dependency::Mountpoint => "mountpoint",
            Dependency::Unshare => "unshare",
            Dependency::Partx => "partx",
            Dependency::ShellArchive => "shell-archive",
            Dependency::Dd => "dd",
        }
    }

    pub fn cmd(&self) -> Command {
        Command::new(self.name())
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("required command '{0}' is not available on PATH")]
pub struct DependencyError(pub String);

/// Checks whether a dependency is resolvable on `PATH` without running it.
pub fn is_available(dep: Dependency) -> bool {
    which::which(dep.name()).is_ok()
}

pub trait DependencyResultExt<T> {
    /// Maps a spawn failure into a [`DependencyError`] naming the missing
    /// binary, so callers get "cryptsetup not found" instead of a bare
    /// `ENOENT`.
    fn dependency_context(self, dep: Dependency) -> anyhow::Result<T>;
}

impl<T> DependencyResultExt<T> for std::io::Result<T> {
    fn dependency_context(self, dep: Dependency) -> anyhow::Result<T> {
        self.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::Error::new(DependencyError(dep.name().to_string()))
            } else {
                anyhow::Error::new(e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_name_matches_binary() {
        assert_eq!(Dependency::Mkfs.name(), "mkfs");
        assert_eq!(Dependency::Cryptsetup.name(), "cryptsetup");
        assert_eq!(Dependency::Zpool.name(), "zpool");
    }
}
