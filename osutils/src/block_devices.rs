use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, ensure, Context, Error};
use curtin_api::{config::DiskAction, BlockDeviceId};

use crate::{
    exe::RunAndCheck,
    lsblk::{self, BlockDeviceType},
};

pub struct ResolvedDisk {
    /// Shortcut to the disk id.
    pub id: BlockDeviceId,

    /// Reference to the disk action that was resolved.
    pub spec: DiskAction,

    /// Path to the disk in /dev.
    pub dev_path: PathBuf,

    /// Path to the disk in /dev/disk/by-path, when one exists.
    pub bus_path: Option<PathBuf>,
}

/// Resolves a disk action's identifier (`path`, `serial`, `wwn` or
/// `multipath`) to its real device path in /dev (§4.10).
pub fn resolve_disk(disk: &DiskAction) -> Result<ResolvedDisk, Error> {
    ensure!(
        disk.has_identifier(),
        "disk '{}' has no identifier (serial, wwn, path or multipath)",
        disk.id
    );

    let dev_path = if let Some(path) = &disk.path {
        path.canonicalize()
            .context(format!("Failed to lookup device '{}'", path.display()))?
    } else if let Some(serial) = &disk.serial {
        find_symlink_for_target_id(serial, "/dev/disk/by-id")?
    } else if let Some(wwn) = &disk.wwn {
        find_symlink_for_target_id(wwn, "/dev/disk/by-id")?
    } else {
        let multipath = disk.multipath.as_ref().expect("checked by has_identifier");
        find_symlink_for_target_id(multipath, "/dev/mapper")?
    };

    let bus_path = block_device_by_path(&dev_path).ok();

    Ok(ResolvedDisk {
        id: disk.id.clone(),
        spec: disk.clone(),
        dev_path,
        bus_path,
    })
}

/// Resolves every disk action in a linearized action list to its real path.
pub fn resolve_disks<'a>(
    disks: impl IntoIterator<Item = &'a DiskAction>,
) -> Result<Vec<ResolvedDisk>, Error> {
    disks
        .into_iter()
        .map(resolve_disk)
        .collect::<Result<Vec<_>, Error>>()
        .context("Failed to resolve disk paths")
}

/// Finds a device node in `directory` whose file name contains `needle`
/// (serial/wwn substrings appear as part of the by-id link name, not the
/// whole of it) and returns its canonicalized target.
fn find_symlink_for_target_id(needle: &str, directory: impl AsRef<Path>) -> Result<PathBuf, Error> {
    fs::read_dir(directory.as_ref())
        .context(format!(
            "Failed to read directory '{}'",
            directory.as_ref().display()
        ))?
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().contains(needle))
        .map(|entry| entry.path())
        .min()
        .context(format!(
            "Failed to find a device matching '{}' under '{}'",
            needle,
            directory.as_ref().display()
        ))?
        .canonicalize()
        .context("Failed to canonicalize resolved device path")
}

/// Retrieves the symlink for a given block device in '/dev/disk/by-path'.
pub fn block_device_by_path(path: impl AsRef<Path>) -> Result<PathBuf, Error> {
    find_symlink_for_target(path.as_ref(), Path::new("/dev/disk/by-path"))
}

/// Returns the path of the first symlink in directory whose canonical path is target.
pub fn find_symlink_for_target(
    target: impl AsRef<Path>,
    directory: impl AsRef<Path>,
) -> Result<PathBuf, Error> {
    // Ensure that target path is canonicalized
    let target_canonicalized = target.as_ref().canonicalize().context(format!(
        "Failed to canonicalize target path '{}'",
        target.as_ref().display()
    ))?;

    fs::read_dir(directory.as_ref())?
        .flatten()
        .filter(|f| {
            f.file_type()
                .ok()
                .map(|t| t.is_symlink())
                .unwrap_or_default()
        })
        .map(|entry| entry.path())
        .filter(|path| {
            path.canonicalize()
                .map(|p| target_canonicalized == p)
                .unwrap_or_default()
        })
        .min()
        .context(format!(
            "Failed to find symlink for '{}' in directory '{}'",
            target.as_ref().display(),
            directory.as_ref().display()
        ))
}

/// Get the canonicalized path of a disk for a given partition.
pub fn get_disk_for_partition(partition: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let partition_block_device = lsblk::run(partition.as_ref()).with_context(|| {
        format!(
            "Failed to get partition metadata for '{}'",
            partition.as_ref().display(),
        )
    })?;

    ensure!(
        partition_block_device.blkdev_type == BlockDeviceType::Partition,
        "Device '{}' is not a partition",
        partition.as_ref().display()
    );

    partition_block_device.parent_kernel_name.context(format!(
        "Failed to get disk for partition: {:?}, pk_name not found",
        partition.as_ref().display()
    ))
}

/// Check if a device can be stopped. A device can be stopped if it only uses
/// disks that are part of the storage configuration.
///
/// Returns true if the device can be stopped, false if it should not be
/// touched. Returns an error if the device has underlying disks some of which
/// are part of the configuration and some are not.
pub fn can_stop_pre_existing_device(
    used_disks: &HashSet<PathBuf>,
    config_disks: &HashSet<PathBuf>,
) -> Result<bool, Error> {
    let symmetric_diff: HashSet<_> = used_disks
        .symmetric_difference(config_disks)
        .cloned()
        .collect();

    if used_disks.is_disjoint(config_disks) {
        // Device does not have any of its underlying disks mentioned in the
        // storage configuration, we should not touch it.
        Ok(false)
    } else if symmetric_diff.is_empty() || used_disks.is_subset(config_disks) {
        // Device's underlying disks are all part of the configuration, we can
        // unmount and stop it.
        Ok(true)
    } else {
        // Device has underlying disks that are not part of the configuration,
        // we cannot touch it, abort.
        bail!(
            "A device has underlying disks that are not part of the storage configuration. Used disks: {:?}, configured disks: {:?}",
            used_disks, config_disks
        );
    }
}

/// Force kernel to re-read the partition table of a disk with partx.
///
/// This function has no built in safety checking. The path must be:
///
/// - A valid block device.
/// - If a disk, it must contain a partition table with at least one partition.
pub fn partx_update(disk: impl AsRef<Path>) -> Result<(), Error> {
    Command::new("partx")
        .arg("--update")
        .arg(disk.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to re-read partition table for disk '{}'",
                disk.as_ref().display()
            )
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_can_stop_pre_existing_device() -> Result<(), Error> {
        let raid_disks: HashSet<PathBuf> = ["/dev/sda".into(), "/dev/sdb".into()].into();
        let config_disks: HashSet<PathBuf> = ["/dev/sda".into(), "/dev/sdb".into()].into();
        let config_disks2: HashSet<PathBuf> = ["/dev/sdb".into(), "/dev/sdc".into()].into();
        let config_disks3: HashSet<PathBuf> = ["/dev/sdc".into(), "/dev/sdd".into()].into();
        let config_disks4: HashSet<PathBuf> =
            ["/dev/sda".into(), "/dev/sdb".into(), "/dev/sdc".into()].into();

        // No overlapping disks, should not touch
        let overlap = can_stop_pre_existing_device(&raid_disks, &config_disks3)?;
        assert!(!overlap);

        // Fully overlapping disks, should stop
        let overlap = can_stop_pre_existing_device(&raid_disks, &config_disks)?;
        assert!(overlap);

        // Partially overlapping disks, cannot touch, error.
        let overlap = can_stop_pre_existing_device(&raid_disks, &config_disks2);
        assert!(overlap.is_err());

        // Configured disks are a superset of RAID disks, we can stop
        let overlap = can_stop_pre_existing_device(&raid_disks, &config_disks4)?;
        assert!(overlap);

        Ok(())
    }

    #[test]
    fn test_find_symlink_for_target() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().canonicalize().unwrap();
        let symlink = temp_dir.path().join("symlink");
        std::os::unix::fs::symlink(&target, &symlink).unwrap();
        assert_eq!(
            find_symlink_for_target(&target, temp_dir.path()).unwrap(),
            symlink
        );

        // Pick the first symlink if there are multiple
        let symlink = temp_dir.path().join("asymlink");
        std::os::unix::fs::symlink(&target, &symlink).unwrap();
        assert_eq!(
            find_symlink_for_target(&target, temp_dir.path()).unwrap(),
            symlink
        );
    }

    #[test]
    fn test_find_symlink_for_target_fail_no_symlink() {
        // Return error if no symlink found
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().canonicalize().unwrap();
        let temp_dir2 = tempfile::tempdir().unwrap();
        assert_eq!(
            find_symlink_for_target(&target, temp_dir2.path())
                .unwrap_err()
                .to_string(),
            format!(
                "Failed to find symlink for '{}' in directory '{}'",
                target.display(),
                temp_dir2.path().display()
            )
        );
    }

    #[test]
    fn test_find_symlink_for_target_fail_bad_target() {
        // Return error if target path is bad
        let target = Path::new("/bad-target-path");
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(
            find_symlink_for_target(target, temp_dir.path())
                .unwrap_err()
                .to_string(),
            format!("Failed to canonicalize target path '{}'", target.display())
        );
    }
}

#[cfg(feature = "functional-test")]
#[cfg_attr(not(test), allow(unused_imports, dead_code))]
mod functional_test {
    use super::*;

    use pytest_gen::functional_test;

    #[functional_test]
    fn test_get_disk_for_partition() {
        let partition = Path::new("/dev/sda1");
        let disk = get_disk_for_partition(partition).unwrap();
        assert_eq!(disk, Path::new("/dev/sda"));

        let partition = Path::new("/dev/disk/by-path/pci-0000:00:1f.2-ata-2.0-part1");
        let disk = get_disk_for_partition(partition).unwrap();
        assert_eq!(disk, Path::new("/dev/sda"));

        let partition = Path::new("/dev/sdc1");
        assert_eq!(
            get_disk_for_partition(partition).unwrap_err().to_string(),
            "Failed to get partition metadata for '/dev/sdc1'",
        );
    }
}
