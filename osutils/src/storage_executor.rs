//! Storage executor (§4.10): walks a linearized, validated storage
//! configuration and, for each action, calls the primitive that realizes it,
//! resolving cross-action references by id as it goes.
//!
//! An action whose `preserve` field is set is skipped entirely rather than
//! re-run, so applying the same configuration to an already-provisioned
//! target is a no-op for that action. Beyond device paths, applying the
//! configuration accumulates the artifacts the install pipeline must persist
//! into the target filesystem: fstab entries, crypttab entries, assembled
//! RAID arrays for `mdadm.conf`, and dname udev rules (§6).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use curtin_api::{
    config::host::storage::{
        Bcache, BcacheCacheMode, Dasd, DmCrypt, Format, LvmPartition, LvmVolgroup, Mount,
        Partition, PartitionTableType, Raid, StorageAction, Zfs, Zpool,
    },
    constants::DEFAULT_ZPOOL_PROPERTIES,
    error::ValidationError,
};
use log::info;

use crate::{
    blkid,
    block_devices::resolve_disk,
    clear_holders,
    crypttab::{Crypttab, CrypttabEntry, KeySource},
    dependencies::Dependency,
    dname::{self, StableIdentifier},
    encryption::{self, CryptKey},
    exe::RunAndCheck,
    filesystems::TabFileSystemType,
    mdadm::{self, MdadmDetail},
    mkfs,
    mkfs::{MkfsFileSystemType, MkfsOptions},
    mount as mount_util,
    tabfile::{TabFile, TabFileEntry},
    wipefs,
};

/// Maps a storage action id to the block device path (or mountpoint, for
/// `mount` actions) it resolved to, so later actions can reference earlier
/// ones by id.
#[derive(Debug, Default)]
pub struct ResolvedPaths(HashMap<String, PathBuf>);

impl ResolvedPaths {
    pub fn get(&self, id: &str) -> Result<&Path, Error> {
        self.0
            .get(id)
            .map(PathBuf::as_path)
            .with_context(|| format!("storage action '{id}' has no resolved device path yet"))
    }

    fn insert(&mut self, id: &str, path: PathBuf) {
        self.0.insert(id.to_string(), path);
    }
}

/// A formatted volume's label and uuid, kept around so a later `mount`
/// action can prefer `UUID=`/`LABEL=` over a raw device path in fstab.
#[derive(Debug, Clone, Default)]
struct FormatIdentity {
    uuid: Option<String>,
    label: Option<String>,
}

/// Every artifact applying a storage configuration produces, beyond the
/// per-id device paths: the install pipeline writes these into the target's
/// `/etc` once partitioning and formatting are done (§6 persisted state).
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub paths: ResolvedPaths,
    pub fstab: TabFile,
    pub crypttab: Crypttab,
    pub mdadm_arrays: Vec<MdadmDetail>,
    pub dname_rules: Vec<(String, StableIdentifier)>,
    /// Set once any `zpool` action runs, so [`persist`] knows to copy
    /// `/etc/zfs/zpool.cache` into the target.
    pub has_zpool: bool,
}

/// Applies every action in `actions` (assumed already linearized by
/// [`curtin_api::config::host::storage::StorageConfig::linearize`]) in
/// order, building up an [`ExecutionResult`] as dependencies are realized.
pub fn apply(actions: &[StorageAction]) -> Result<ExecutionResult, Error> {
    let mut result = ExecutionResult::default();
    let mut formats: HashMap<String, FormatIdentity> = HashMap::new();

    for action in actions {
        info!("Applying storage action '{}' ({})", action.id(), action.type_name());
        apply_one(action, &mut result, &mut formats)
            .with_context(|| format!("failed to apply storage action '{}'", action.id()))?;
    }

    Ok(result)
}

fn apply_one(
    action: &StorageAction,
    result: &mut ExecutionResult,
    formats: &mut HashMap<String, FormatIdentity>,
) -> Result<(), Error> {
    match action {
        StorageAction::Disk(disk) => {
            let resolved = resolve_disk(disk)?;
            if !disk.preserve {
                clear_holders::clear_holders(&resolved.dev_path)
                    .with_context(|| format!("failed to clear existing holders on '{}'", resolved.dev_path.display()))?;
                if let Some(mode) = disk.wipe {
                    wipefs::wipe(&resolved.dev_path, into_wipe_mode(mode))?;
                }
                if let Some(ptable) = disk.ptable {
                    create_partition_table(&resolved.dev_path, ptable)?;
                }
            }
            if let Some(name) = &disk.name {
                if let Ok(uuid) = blkid::get_partition_table_uuid(&resolved.dev_path) {
                    result
                        .dname_rules
                        .push((name.clone(), StableIdentifier::DiskPartTableUuid(uuid)));
                }
            }
            result.paths.insert(&disk.id, resolved.dev_path);
        }
        StorageAction::Partition(partition) => apply_partition(partition, &mut result.paths)?,
        StorageAction::Format(format) => apply_format(format, &mut result.paths, formats)?,
        StorageAction::Mount(mount) => apply_mount(mount, &mut result.paths, formats, &mut result.fstab)?,
        StorageAction::LvmVolgroup(vg) => apply_lvm_volgroup(vg, &mut result.paths)?,
        StorageAction::LvmPartition(lv) => apply_lvm_partition(lv, &mut result.paths)?,
        StorageAction::DmCrypt(dm) => apply_dm_crypt(dm, &mut result.paths, &mut result.crypttab)?,
        StorageAction::Raid(raid) => apply_raid(raid, result)?,
        StorageAction::Bcache(bcache) => apply_bcache(bcache, &mut result.paths)?,
        StorageAction::Zpool(zpool) => {
            apply_zpool(zpool, &mut result.paths)?;
            result.has_zpool = true;
        }
        StorageAction::Zfs(zfs) => apply_zfs(zfs, &mut result.paths)?,
        StorageAction::Dasd(dasd) => apply_dasd(dasd)?,
        StorageAction::NvmeController(_) => {}
    }

    Ok(())
}

fn into_wipe_mode(mode: curtin_api::config::host::storage::WipeMode) -> wipefs::WipeMode {
    use curtin_api::config::host::storage::WipeMode as Cfg;
    match mode {
        Cfg::Random => wipefs::WipeMode::Random,
        Cfg::Superblock => wipefs::WipeMode::Superblock,
        Cfg::SuperblockRecursive => wipefs::WipeMode::SuperblockRecursive,
        Cfg::Zero => wipefs::WipeMode::Zero,
    }
}

fn create_partition_table(device: &Path, ptable: PartitionTableType) -> Result<(), Error> {
    let label = match ptable {
        PartitionTableType::Gpt => "gpt",
        PartitionTableType::Dos | PartitionTableType::Msdos => "msdos",
        PartitionTableType::Vtoc | PartitionTableType::Unsupported => {
            bail!("unsupported partition table type {:?}", ptable)
        }
    };

    Dependency::Parted
        .cmd()
        .arg("--script")
        .arg(device)
        .arg("mklabel")
        .arg(label)
        .run_and_check()
        .with_context(|| format!("failed to create {label} partition table on '{}'", device.display()))
}

fn apply_partition(partition: &Partition, paths: &mut ResolvedPaths) -> Result<(), Error> {
    let disk_path = paths.get(&partition.device)?.to_path_buf();
    let part_path = partition_device_path(&disk_path, partition.number);

    if !partition.preserve {
        let start = partition.offset.map(|o| o.bytes()).unwrap_or(0);
        let size = partition.size.bytes();
        let end = start + size;

        // Wipe the partition's future extent on the parent disk before
        // `parted` creates it: the kernel notices the new partition the
        // moment the table is rewritten, and a stale superblock left in
        // that range can race an in-kernel auto-assembly (e.g. mdadm) before
        // curtin gets a chance to format it (§4.10).
        if let Some(mode) = partition.wipe {
            wipefs::wipe_extent(&disk_path, start, size, into_wipe_mode(mode))
                .with_context(|| format!("failed to pre-wipe partition {} extent", partition.number))?;
        }

        Dependency::Parted
            .cmd()
            .arg("--script")
            .arg(&disk_path)
            .arg("unit")
            .arg("B")
            .arg("mkpart")
            .arg("primary")
            .arg(start.to_string())
            .arg(end.to_string())
            .run_and_check()
            .with_context(|| format!("failed to create partition {} on '{}'", partition.number, disk_path.display()))?;

        if let Some(flag) = partition.flag {
            if let Some(parted_flag) = partition_flag_name(flag) {
                Dependency::Parted
                    .cmd()
                    .arg("--script")
                    .arg(&disk_path)
                    .arg("set")
                    .arg(partition.number.to_string())
                    .arg(parted_flag)
                    .arg("on")
                    .run_and_check()
                    .with_context(|| format!("failed to set flag '{parted_flag}' on partition {}", partition.number))?;
            }
        }

        crate::udevadm::settle().context("udevadm settle after partition creation failed")?;
    } else {
        verify_partition_preserved(partition, &part_path)?;
    }

    paths.insert(&partition.id, part_path);
    Ok(())
}

/// Reads back the on-disk state of a `preserve: true` partition and checks
/// it against the configured identifiers, rather than trusting the config
/// blindly (§4.10's idempotency requirement applies to preserved actions
/// too, not just newly-created ones).
fn verify_partition_preserved(partition: &Partition, part_path: &Path) -> Result<(), Error> {
    if !part_path.exists() {
        bail!(ValidationError::InvalidField {
            item: partition.id.clone(),
            field: "preserve".to_string(),
            reason: format!("partition device '{}' does not exist", part_path.display()),
        });
    }

    if let Some(expected) = &partition.uuid {
        let observed = blkid::get_partition_uuid(part_path)
            .with_context(|| format!("failed to read back PARTUUID for preserved partition '{}'", partition.id))?;
        if !observed.eq_ignore_ascii_case(expected) {
            bail!(ValidationError::InvalidField {
                item: partition.id.clone(),
                field: "uuid".to_string(),
                reason: format!("configured uuid '{expected}' does not match observed PARTUUID '{observed}'"),
            });
        }
    }

    Ok(())
}

fn partition_device_path(disk_path: &Path, number: u32) -> PathBuf {
    let disk_str = disk_path.to_string_lossy();
    let separator = if disk_str.chars().last().is_some_and(|c| c.is_ascii_digit()) {
        "p"
    } else {
        ""
    };
    PathBuf::from(format!("{disk_str}{separator}{number}"))
}

/// `boot` aliases to the ESP type-GUID when set on a GPT table (and to the
/// legacy boot flag on msdos); curtin relies on `parted`'s own handling of
/// this rather than writing the GUID itself.
fn partition_flag_name(flag: curtin_api::config::host::storage::PartitionFlag) -> Option<&'static str> {
    use curtin_api::config::host::storage::PartitionFlag as F;
    match flag {
        F::BiosGrub => Some("bios_grub"),
        F::Boot => Some("boot"),
        F::Extended => None,
        F::Home => None,
        F::Linux => None,
        F::Logical => None,
        F::Lvm => Some("lvm"),
        F::Mbr => None,
        F::Prep => Some("prep"),
        F::Raid => Some("raid"),
        F::Swap => Some("swap"),
        F::None => None,
    }
}

fn apply_format(
    format: &Format,
    paths: &mut ResolvedPaths,
    formats: &mut HashMap<String, FormatIdentity>,
) -> Result<(), Error> {
    let volume = paths.get(&format.volume)?.to_path_buf();

    let identity = if !format.preserve {
        let fstype = MkfsFileSystemType::parse(&format.fstype);
        let uuid = mkfs::run(
            &volume,
            &fstype,
            &MkfsOptions {
                label: format.label.clone(),
                uuid: format.uuid.clone(),
                release_override: None,
                sector_size: None,
                label_mode: Default::default(),
            },
        )?;
        FormatIdentity {
            uuid: Some(uuid.to_string()),
            label: format.label.clone(),
        }
    } else {
        verify_format_preserved(format, &volume)?;
        FormatIdentity {
            uuid: format.uuid.clone(),
            label: format.label.clone(),
        }
    };

    formats.insert(format.id.clone(), identity);
    paths.insert(&format.id, volume);
    Ok(())
}

/// Reads back the on-disk filesystem of a `preserve: true` format and
/// checks its type, uuid and label against the configured values, so a
/// stale or wrong config is caught before curtin relies on it rather than
/// silently trusting whatever the config happened to say.
fn verify_format_preserved(format: &Format, volume: &Path) -> Result<(), Error> {
    let observed_type = blkid::get_filesystem_type(volume)
        .with_context(|| format!("failed to read back filesystem type for preserved format '{}'", format.id))?;
    if !observed_type.eq_ignore_ascii_case(&format.fstype) {
        bail!(ValidationError::InvalidField {
            item: format.id.clone(),
            field: "fstype".to_string(),
            reason: format!(
                "configured fstype '{}' does not match observed type '{observed_type}'",
                format.fstype
            ),
        });
    }

    if let Some(expected) = &format.uuid {
        let observed = blkid::get_filesystem_uuid_raw(volume)
            .with_context(|| format!("failed to read back UUID for preserved format '{}'", format.id))?;
        if !observed.eq_ignore_ascii_case(expected) {
            bail!(ValidationError::InvalidField {
                item: format.id.clone(),
                field: "uuid".to_string(),
                reason: format!("configured uuid '{expected}' does not match observed UUID '{observed}'"),
            });
        }
    }

    if let Some(expected) = &format.label {
        let observed = blkid::get_filesystem_label(volume)
            .with_context(|| format!("failed to read back label for preserved format '{}'", format.id))?;
        if &observed != expected {
            bail!(ValidationError::InvalidField {
                item: format.id.clone(),
                field: "label".to_string(),
                reason: format!("configured label '{expected}' does not match observed label '{observed}'"),
            });
        }
    }

    Ok(())
}

fn apply_mount(
    mount: &Mount,
    paths: &mut ResolvedPaths,
    formats: &HashMap<String, FormatIdentity>,
    fstab: &mut TabFile,
) -> Result<(), Error> {
    let source = match (&mount.device, &mount.spec) {
        (Some(device_id), _) => paths.get(device_id)?.to_path_buf(),
        (None, Some(spec)) => PathBuf::from(spec),
        (None, None) => bail!("mount '{}' has neither a device reference nor a spec", mount.id),
    };

    let target = PathBuf::from(&mount.path);
    mount_util::ensure_mount_directory(&target)?;

    let fstype = mount
        .fstype
        .as_deref()
        .map(crate::filesystems::MountFileSystemType::parse)
        .unwrap_or(crate::filesystems::MountFileSystemType::Auto);

    let options: Vec<String> = mount
        .options
        .as_deref()
        .map(|o| o.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    mount_util::mount(&source, &target, fstype, &options)?;

    let tab_fstype = mount
        .fstype
        .as_deref()
        .map(TabFileSystemType::parse)
        .unwrap_or(TabFileSystemType::Auto);
    let identity = mount.device.as_deref().and_then(|id| formats.get(id));
    let entry = TabFileEntry::new_identified(
        identity.and_then(|i| i.uuid.as_deref()),
        identity.and_then(|i| i.label.as_deref()),
        &source,
        &target,
        tab_fstype,
    )
    .with_options(options);
    fstab.entries.push(entry);

    paths.insert(&mount.id, target);
    Ok(())
}

fn apply_lvm_volgroup(vg: &LvmVolgroup, paths: &mut ResolvedPaths) -> Result<(), Error> {
    let devices = vg
        .devices
        .iter()
        .map(|id| paths.get(id).map(Path::to_path_buf))
        .collect::<Result<Vec<_>, _>>()?;

    for device in &devices {
        Dependency::Pvcreate
            .cmd()
            .arg(device)
            .run_and_check()
            .with_context(|| format!("failed to run pvcreate on '{}'", device.display()))?;
    }

    Dependency::Vgcreate
        .cmd()
        .arg(&vg.name)
        .args(&devices)
        .run_and_check()
        .with_context(|| format!("failed to create volume group '{}'", vg.name))?;

    paths.insert(&vg.id, PathBuf::from(&vg.name));
    Ok(())
}

fn apply_lvm_partition(lv: &LvmPartition, paths: &mut ResolvedPaths) -> Result<(), Error> {
    let vg_name = paths.get(&lv.volgroup)?.to_string_lossy().into_owned();

    Dependency::Lvcreate
        .cmd()
        .arg("--yes")
        .arg("--name")
        .arg(&lv.name)
        .arg("--size")
        .arg(format!("{}B", lv.size.bytes()))
        .arg(&vg_name)
        .run_and_check()
        .with_context(|| format!("failed to create logical volume '{}' in '{vg_name}'", lv.name))?;

    paths.insert(
        &lv.id,
        PathBuf::from(curtin_api::constants::DEV_MAPPER_PATH).join(format!("{vg_name}-{}", lv.name)),
    );
    Ok(())
}

fn apply_dm_crypt(dm: &DmCrypt, paths: &mut ResolvedPaths, crypttab: &mut Crypttab) -> Result<(), Error> {
    let volume = paths.get(&dm.volume)?.to_path_buf();

    let key = match (&dm.key, &dm.keyfile) {
        (Some(key), _) => CryptKey::Inline(key),
        (None, Some(keyfile)) => CryptKey::File(keyfile),
        (None, None) => bail!("dm_crypt '{}' has neither 'key' nor 'keyfile' set", dm.id),
    };

    encryption::luks_format(&volume, &key)?;
    encryption::luks_open(&volume, &dm.dm_name, &key)?;

    let source_uuid = encryption::luks_uuid(&volume)
        .with_context(|| format!("failed to read luksUUID for '{}'", volume.display()))?;

    // An inline `key` is a boot-time secret curtin was handed directly; it
    // must not be written back to the target's crypttab in the clear, so
    // the entry prompts for it at boot instead. A `keyfile` already lives on
    // disk and is safe to reference by path.
    let key_source = match &dm.keyfile {
        Some(keyfile) => KeySource::KeyFile(keyfile.clone()),
        None => KeySource::None,
    };

    crypttab.entries.push(CrypttabEntry::new(
        dm.dm_name.clone(),
        format!("UUID={source_uuid}"),
        key_source,
    ));

    paths.insert(
        &dm.id,
        PathBuf::from(curtin_api::constants::DEV_MAPPER_PATH).join(&dm.dm_name),
    );
    Ok(())
}

fn apply_raid(raid: &Raid, result: &mut ExecutionResult) -> Result<(), Error> {
    let devices = raid
        .devices
        .iter()
        .chain(raid.spare_devices.iter())
        .map(|id| result.paths.get(id).map(Path::to_path_buf))
        .collect::<Result<Vec<_>, _>>()?;

    let array_name = raid.name.clone().unwrap_or_else(|| format!("/dev/md/{}", raid.id));
    let raid_path = PathBuf::from(&array_name);

    mdadm::create(&raid_path, &raid.raidlevel, devices)?;

    if let Ok(detail) = mdadm::detail(&raid_path) {
        if let Some(name) = &raid.name {
            result
                .dname_rules
                .push((name.clone(), StableIdentifier::RaidUuid(detail.uuid.clone())));
        }
        result.mdadm_arrays.push(detail);
    }

    result.paths.insert(&raid.id, raid_path);
    Ok(())
}

fn apply_bcache(bcache: &Bcache, paths: &mut ResolvedPaths) -> Result<(), Error> {
    let backing = paths.get(&bcache.backing_device)?.to_path_buf();

    let mut cmd = Dependency::MakeBcache.cmd();
    cmd.arg("-B").arg(&backing);

    if let Some(cache_id) = &bcache.cache_device {
        let cache = paths.get(cache_id)?.to_path_buf();
        cmd.arg("-C").arg(cache);
    }

    cmd.run_and_check()
        .with_context(|| format!("failed to run make-bcache for '{}'", backing.display()))?;

    crate::udevadm::settle().context("udevadm settle after make-bcache failed")?;

    let bcache_path = PathBuf::from("/dev/bcache0");
    if let Some(mode) = bcache.cache_mode {
        apply_bcache_cache_mode(&bcache_path, mode)?;
    }

    paths.insert(&bcache.id, bcache_path);
    Ok(())
}

fn apply_bcache_cache_mode(bcache_path: &Path, mode: BcacheCacheMode) -> Result<(), Error> {
    let mode_str = match mode {
        BcacheCacheMode::Writethrough => "writethrough",
        BcacheCacheMode::Writeback => "writeback",
        BcacheCacheMode::Writearound => "writearound",
        BcacheCacheMode::None => "none",
    };

    let device_name = bcache_path
        .file_name()
        .context("bcache device path has no file name")?
        .to_string_lossy();
    let sysfs_path = PathBuf::from("/sys/block").join(device_name.as_ref()).join("bcache/cache_mode");

    std::fs::write(&sysfs_path, mode_str)
        .with_context(|| format!("failed to set cache_mode '{mode_str}' via '{}'", sysfs_path.display()))
}

fn apply_zpool(zpool: &Zpool, paths: &mut ResolvedPaths) -> Result<(), Error> {
    let vdevs = zpool
        .vdevs
        .iter()
        .map(|id| paths.get(id).map(Path::to_path_buf))
        .collect::<Result<Vec<_>, _>>()?;

    let mut cmd = Dependency::Zpool.cmd();
    cmd.arg("create");

    let mut properties: HashMap<&str, &str> = DEFAULT_ZPOOL_PROPERTIES.iter().copied().collect();
    for (key, value) in &zpool.pool_properties {
        properties.insert(key, value);
    }
    for (key, value) in &properties {
        cmd.arg("-o").arg(format!("{key}={value}"));
    }
    for (key, value) in &zpool.fs_properties {
        cmd.arg("-O").arg(format!("{key}={value}"));
    }
    if let Some(mountpoint) = &zpool.mountpoint {
        cmd.arg("-m").arg(mountpoint);
    }

    cmd.arg(&zpool.pool).args(&vdevs);
    cmd.run_and_check()
        .with_context(|| format!("failed to create zpool '{}'", zpool.pool))?;

    // Pin the pool's cachefile so the target finds it on next import rather
    // than rescanning every block device (§6 persisted state).
    Dependency::Zpool
        .cmd()
        .arg("set")
        .arg("cachefile=/etc/zfs/zpool.cache")
        .arg(&zpool.pool)
        .run_and_check()
        .with_context(|| format!("failed to set cachefile for zpool '{}'", zpool.pool))?;

    paths.insert(&zpool.id, PathBuf::from(&zpool.pool));
    Ok(())
}

fn apply_zfs(zfs: &Zfs, paths: &mut ResolvedPaths) -> Result<(), Error> {
    let pool = paths.get(&zfs.pool)?.to_string_lossy().into_owned();
    let dataset = format!("{pool}/{}", zfs.volume);

    let mut cmd = Dependency::Zfs.cmd();
    cmd.arg("create");
    for (key, value) in &zfs.properties {
        cmd.arg("-o").arg(format!("{key}={value}"));
    }
    cmd.arg(&dataset);

    cmd.run_and_check()
        .with_context(|| format!("failed to create zfs dataset '{dataset}'"))?;

    // `canmount=noauto` datasets (e.g. a ZFS root meant to be mounted by the
    // initramfs rather than `zfs mount -a`) still need mounting once during
    // install so curtin can extract into them.
    if zfs.properties.get("canmount").map(String::as_str) == Some("noauto") {
        Dependency::Zfs
            .cmd()
            .arg("mount")
            .arg(&dataset)
            .run_and_check()
            .with_context(|| format!("failed to mount noauto zfs dataset '{dataset}'"))?;
    }

    paths.insert(&zfs.id, PathBuf::from(format!("/dev/zvol/{dataset}")));
    Ok(())
}

fn apply_dasd(dasd: &Dasd) -> Result<(), Error> {
    use curtin_api::config::host::storage::DasdMode;

    let mode_flag = match dasd.mode {
        DasdMode::Quick => "-p",
        DasdMode::Full => "-f",
        DasdMode::Expand => "-e",
    };

    Dependency::Dasdfmt
        .cmd()
        .arg(mode_flag)
        .arg("--yes")
        .arg("--device")
        .arg(&dasd.device_id)
        .arg("--label")
        .arg(&dasd.label)
        .run_and_check()
        .with_context(|| format!("failed to format DASD device '{}'", dasd.device_id))
}

/// Writes the artifacts [`apply`] accumulated into the target filesystem
/// rooted at `target_root` (§6 persisted state): `/etc/fstab`,
/// `/etc/crypttab` (only if non-empty), `/etc/mdadm/mdadm.conf` (only if any
/// arrays were assembled), and dname udev rules (only if any were named).
pub fn persist(result: &ExecutionResult, target_root: &Path) -> Result<(), Error> {
    result.fstab.write(target_root.join("etc/fstab"))?;

    if !result.crypttab.entries.is_empty() {
        result.crypttab.write(target_root.join("etc/crypttab"))?;
    }

    if !result.mdadm_arrays.is_empty() {
        let mdadm_dir = target_root.join("etc/mdadm");
        std::fs::create_dir_all(&mdadm_dir)
            .with_context(|| format!("failed to create '{}'", mdadm_dir.display()))?;
        mdadm::write_conf(mdadm_dir.join("mdadm.conf"), &result.mdadm_arrays)?;
    }

    if !result.dname_rules.is_empty() {
        let rules_dir = target_root.join("etc/udev/rules.d");
        std::fs::create_dir_all(&rules_dir)
            .with_context(|| format!("failed to create '{}'", rules_dir.display()))?;
        dname::write_rules(rules_dir.join("60-curtin-dname.rules"), &result.dname_rules)?;
    }

    if result.has_zpool {
        let cache_src = Path::new("/etc/zfs/zpool.cache");
        if cache_src.exists() {
            let cache_dir = target_root.join("etc/zfs");
            std::fs::create_dir_all(&cache_dir)
                .with_context(|| format!("failed to create '{}'", cache_dir.display()))?;
            std::fs::copy(cache_src, cache_dir.join("zpool.cache"))
                .context("failed to copy zpool.cache into target")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_device_path_numbered_disk() {
        assert_eq!(
            partition_device_path(Path::new("/dev/sda"), 1),
            PathBuf::from("/dev/sda1")
        );
        assert_eq!(
            partition_device_path(Path::new("/dev/nvme0n1"), 1),
            PathBuf::from("/dev/nvme0n1p1")
        );
    }

    #[test]
    fn test_resolved_paths_missing_id() {
        let paths = ResolvedPaths::default();
        assert!(paths.get("missing").is_err());
    }

    #[test]
    fn test_verify_partition_preserved_fails_on_missing_device() {
        let partition = Partition {
            id: "sda1".to_string(),
            device: "sda".to_string(),
            number: 1,
            size: 0u64.into(),
            offset: None,
            flag: None,
            uuid: None,
            preserve: true,
            wipe: None,
        };

        let err = verify_partition_preserved(&partition, Path::new("/dev/does-not-exist-curtin-test"))
            .unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());
    }
}
