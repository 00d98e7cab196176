//! Probe parser (§4.6): turns a probe snapshot — a nested dictionary keyed
//! by subsystem (`blockdev`, `filesystem`, `lvm`, `raid`, `bcache`,
//! `dmcrypt`, `mount`, `zfs`, `dasd`, `multipath`) — into storage actions.
//!
//! Probing the live system (walking `/sys`, shelling to `lvs`/`mdadm`/etc.)
//! is itself an external collaborator's job; this module only consumes
//! whatever nested-dict snapshot that collaborator produced, so it can be
//! exercised entirely from fixture data.

use std::collections::HashMap;

use curtin_api::config::{
    Bcache, BcacheCacheMode, Dasd, DasdBlocksize, DasdDiskLayout, DasdMode, DiskAction, DmCrypt,
    Format, LvmPartition, LvmVolgroup, Mount, PartitionTableType, Raid, RaidLevel, StorageAction,
    Zfs, Zpool,
};
use serde_json::Value;

/// Result of parsing one subsystem: the actions it could build, plus
/// non-fatal warnings for entries it had to skip (§4.6: "errors are
/// non-fatal warnings surfaced in the output").
#[derive(Debug, Default, Clone)]
pub struct ParseResult {
    pub actions: Vec<StorageAction>,
    pub errors: Vec<String>,
}

impl ParseResult {
    fn push(&mut self, action: StorageAction) {
        self.actions.push(action);
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn extend(&mut self, other: ParseResult) {
        self.actions.extend(other.actions);
        self.errors.extend(other.errors);
    }
}

/// The full probe snapshot, one optional nested-dict section per subsystem.
#[derive(Debug, Default, Clone)]
pub struct ProbeData {
    pub blockdev: HashMap<String, Value>,
    pub filesystem: HashMap<String, Value>,
    pub lvm: HashMap<String, Value>,
    pub raid: HashMap<String, Value>,
    pub bcache: HashMap<String, Value>,
    pub dmcrypt: HashMap<String, Value>,
    pub mount: HashMap<String, Value>,
    pub zfs: HashMap<String, Value>,
    pub dasd: HashMap<String, Value>,
    pub multipath: HashMap<String, Value>,
}

impl ProbeData {
    pub fn from_json(root: &Value) -> Self {
        let section = |key: &str| -> HashMap<String, Value> {
            root.get(key)
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        };

        ProbeData {
            blockdev: section("blockdev"),
            filesystem: section("filesystem"),
            lvm: section("lvm"),
            raid: section("raid"),
            bcache: section("bcache"),
            dmcrypt: section("dmcrypt"),
            mount: section("mount"),
            zfs: section("zfs"),
            dasd: section("dasd"),
            multipath: section("multipath"),
        }
    }
}

fn str_field<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}

fn u64_field(entry: &Value, key: &str) -> Option<u64> {
    entry.get(key).and_then(Value::as_u64)
}

/// Known sentinel values probing tools report in place of a real
/// identifier; these must never be surfaced as a stable identifier.
fn is_sentinel_zero(value: &str) -> bool {
    value.is_empty() || value.chars().all(|c| c == '0')
}

/// Floppy and cdrom major numbers (§4.6): entries under these majors are
/// never disks or partitions curtin should manage.
const MAJOR_FLOPPY: u64 = 2;
const MAJOR_CDROM: u64 = 11;

/// Parses the `blockdev` section into `disk` actions for whole devices and
/// `partition` actions for partitions, skipping floppy/cdrom majors and
/// zero-length/zero-offset partitions.
pub fn parse_blockdev(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (kname, entry) in data {
        let major = u64_field(entry, "MAJOR").unwrap_or_default();
        if major == MAJOR_FLOPPY || major == MAJOR_CDROM {
            continue;
        }

        let parent = str_field(entry, "partition_parent");
        let dm_uuid = str_field(entry, "DM_UUID").unwrap_or_default();
        if let Some(multipath_id) = dm_uuid.strip_prefix("mpath-") {
            let path = str_field(entry, "DEVPATH").or_else(|| str_field(entry, "DEVNAME"));
            let ptable = str_field(entry, "ID_PART_TABLE_TYPE").and_then(|t| match t {
                "gpt" => Some(PartitionTableType::Gpt),
                "dos" | "mbr" => Some(PartitionTableType::Dos),
                _ => None,
            });

            result.push(StorageAction::Disk(DiskAction {
                id: kname.clone(),
                serial: None,
                wwn: None,
                path: path.map(Into::into),
                multipath: Some(multipath_id.to_string()),
                ptable,
                wipe: None,
                preserve: true,
                name: None,
                grub_device: false,
            }));
            continue;
        }

        if kname.starts_with("dasd") {
            // DASD devices are reported through the `dasd` section proper;
            // the blockdev entry only needs to be skipped here.
            continue;
        }

        match parent {
            Some(parent_id) => {
                let start = u64_field(entry, "start").unwrap_or_default();
                let size = u64_field(entry, "size").unwrap_or_default();
                if start == 0 || size == 0 {
                    result.warn(format!("skipping zero-length or zero-start partition '{kname}'"));
                    continue;
                }

                result.push(StorageAction::Partition(curtin_api::config::Partition {
                    id: kname.clone(),
                    device: parent_id.to_string(),
                    number: u64_field(entry, "partition_number").unwrap_or_default() as u32,
                    size: size.into(),
                    offset: Some(start.into()),
                    flag: None,
                    uuid: str_field(entry, "PARTUUID").map(str::to_string),
                    preserve: true,
                    wipe: None,
                }));
            }
            None => {
                let serial = str_field(entry, "ID_SERIAL").filter(|s| !is_sentinel_zero(s));
                let wwn = str_field(entry, "ID_WWN").filter(|s| !is_sentinel_zero(s));
                let path = str_field(entry, "DEVPATH").or_else(|| str_field(entry, "DEVNAME"));

                if serial.is_none() && wwn.is_none() && path.is_none() {
                    result.warn(format!("no stable identifier found for disk '{kname}'"));
                }

                let ptable = str_field(entry, "ID_PART_TABLE_TYPE").and_then(|t| match t {
                    "gpt" => Some(PartitionTableType::Gpt),
                    "dos" | "mbr" => Some(PartitionTableType::Dos),
                    _ => None,
                });

                result.push(StorageAction::Disk(DiskAction {
                    id: kname.clone(),
                    serial: serial.map(str::to_string),
                    wwn: wwn.map(str::to_string),
                    path: path.map(Into::into),
                    multipath: None,
                    ptable,
                    wipe: None,
                    preserve: true,
                    name: None,
                    grub_device: false,
                }));
            }
        }
    }

    result
}

/// Parses the `filesystem` section into `format` actions, pairing each
/// entry with the blockdev that produced it.
pub fn parse_filesystem(data: &HashMap<String, Value>, blockdev: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (kname, entry) in data {
        if !blockdev.contains_key(kname) {
            result.warn(format!("filesystem on '{kname}' has no matching blockdev entry"));
            continue;
        }

        let Some(fstype) = str_field(entry, "TYPE") else {
            result.warn(format!("filesystem on '{kname}' has no reported type"));
            continue;
        };

        result.push(StorageAction::Format(Format {
            id: format!("{kname}-fmt"),
            volume: kname.clone(),
            fstype: fstype.to_string(),
            label: str_field(entry, "LABEL").map(str::to_string),
            uuid: str_field(entry, "UUID").map(str::to_string),
            preserve: true,
        }));
    }

    result
}

/// Parses the `lvm` section: one `lvm_volgroup` per VG, one
/// `lvm_partition` per LV.
pub fn parse_lvm(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (vg_name, entry) in data {
        let devices: Vec<String> = entry
            .get("devices")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        result.push(StorageAction::LvmVolgroup(LvmVolgroup {
            id: vg_name.clone(),
            name: vg_name.clone(),
            devices,
        }));

        let lvs = entry.get("logical_volumes").and_then(Value::as_object);
        for (lv_name, lv_entry) in lvs.into_iter().flatten() {
            let Some(size) = u64_field(lv_entry, "size") else {
                result.warn(format!("LV '{lv_name}' in VG '{vg_name}' has no reported size"));
                continue;
            };

            result.push(StorageAction::LvmPartition(LvmPartition {
                id: format!("{vg_name}-{lv_name}"),
                name: lv_name.clone(),
                volgroup: vg_name.clone(),
                size: size.into(),
            }));
        }
    }

    result
}

/// Parses the `raid` section into `raid` actions.
pub fn parse_raid(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (kname, entry) in data {
        let Some(level) = str_field(entry, "MD_LEVEL") else {
            result.warn(format!("raid array '{kname}' has no reported MD_LEVEL"));
            continue;
        };

        let raidlevel = match level.trim_start_matches("raid") {
            "0" => RaidLevel::Raid0,
            "1" => RaidLevel::Raid1,
            "4" => RaidLevel::Raid4,
            "5" => RaidLevel::Raid5,
            "6" => RaidLevel::Raid6,
            "10" => RaidLevel::Raid10,
            other => {
                result.warn(format!("raid array '{kname}' has unsupported level '{other}'"));
                continue;
            }
        };

        let devices: Vec<String> = entry
            .get("devices")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        result.push(StorageAction::Raid(Raid {
            id: kname.clone(),
            name: Some(kname.clone()),
            raidlevel,
            devices,
            spare_devices: Vec::new(),
            ptable: None,
            metadata: str_field(entry, "MD_METADATA").map(str::to_string),
        }));
    }

    result
}

/// Parses the `bcache` section: joins `backing`/`caching` role entries for
/// the same cset into a single `bcache` action. A backing-only entry is
/// acceptable (cache omitted); a caching-only entry is discarded since a
/// cache with no backing device isn't representable as a storage action.
pub fn parse_bcache(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (kname, entry) in data {
        let role = str_field(entry, "role").unwrap_or_default();
        if role != "backing" {
            continue;
        }

        let backing_device = str_field(entry, "backing_device").unwrap_or(kname).to_string();
        let cache_device = str_field(entry, "cache_device").map(str::to_string);
        let cache_mode = str_field(entry, "cache_mode").and_then(|m| match m {
            "writethrough" => Some(BcacheCacheMode::Writethrough),
            "writeback" => Some(BcacheCacheMode::Writeback),
            "writearound" => Some(BcacheCacheMode::Writearound),
            "none" => Some(BcacheCacheMode::None),
            _ => None,
        });

        result.push(StorageAction::Bcache(Bcache {
            id: kname.clone(),
            backing_device,
            cache_device,
            cache_mode,
        }));
    }

    result
}

/// Parses the `dmcrypt` section into `dm_crypt` actions.
pub fn parse_dmcrypt(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (kname, entry) in data {
        let Some(volume) = str_field(entry, "volume") else {
            result.warn(format!("dmcrypt entry '{kname}' has no backing volume"));
            continue;
        };

        result.push(StorageAction::DmCrypt(DmCrypt {
            id: kname.clone(),
            volume: volume.to_string(),
            dm_name: str_field(entry, "dm_name").unwrap_or(kname).to_string(),
            key: None,
            keyfile: str_field(entry, "keyfile").map(Into::into),
        }));
    }

    result
}

/// Parses the `mount` section into `mount` actions.
pub fn parse_mount(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (kname, entry) in data {
        let Some(path) = str_field(entry, "mountpoint") else {
            result.warn(format!("mount entry '{kname}' has no mountpoint"));
            continue;
        };

        result.push(StorageAction::Mount(Mount {
            id: format!("{kname}-mount"),
            device: Some(kname.clone()),
            spec: None,
            path: path.to_string(),
            fstype: str_field(entry, "fstype").map(str::to_string),
            options: str_field(entry, "options").map(str::to_string),
        }));
    }

    result
}

/// Parses the `zfs` section: direct translations to `zpool`/`zfs` actions,
/// keyed by whether the entry describes a pool or a dataset.
pub fn parse_zfs(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (name, entry) in data {
        if let Some(vdevs) = entry.get("vdevs").and_then(Value::as_array) {
            let vdevs: Vec<String> = vdevs.iter().filter_map(Value::as_str).map(str::to_string).collect();
            result.push(StorageAction::Zpool(Zpool {
                id: name.clone(),
                pool: name.clone(),
                vdevs,
                pool_properties: HashMap::new(),
                fs_properties: HashMap::new(),
                mountpoint: str_field(entry, "mountpoint").map(Into::into),
            }));
            continue;
        }

        let Some(pool) = str_field(entry, "pool") else {
            result.warn(format!("zfs entry '{name}' has no owning pool"));
            continue;
        };

        result.push(StorageAction::Zfs(Zfs {
            id: name.clone(),
            pool: pool.to_string(),
            volume: str_field(entry, "volume").unwrap_or(name).to_string(),
            properties: HashMap::new(),
        }));
    }

    result
}

/// Parses the `dasd` section into `dasd` actions, keyed by kname prefix
/// (`dasd*`) rather than by major number.
pub fn parse_dasd(data: &HashMap<String, Value>) -> ParseResult {
    let mut result = ParseResult::default();

    for (kname, entry) in data {
        let Some(device_id) = str_field(entry, "device_id") else {
            result.warn(format!("dasd entry '{kname}' has no device_id"));
            continue;
        };

        let blocksize = match u64_field(entry, "blocksize") {
            Some(512) => DasdBlocksize::B512,
            Some(1024) => DasdBlocksize::B1024,
            Some(2048) => DasdBlocksize::B2048,
            Some(4096) => DasdBlocksize::B4096,
            _ => {
                result.warn(format!("dasd entry '{kname}' has unsupported or missing blocksize"));
                continue;
            }
        };

        let disk_layout = match str_field(entry, "disk_layout") {
            Some("cdl") => DasdDiskLayout::Cdl,
            Some("ldl") => DasdDiskLayout::Ldl,
            _ => {
                result.warn(format!("dasd entry '{kname}' has unsupported or missing disk_layout"));
                continue;
            }
        };

        result.push(StorageAction::Dasd(Dasd {
            id: kname.clone(),
            device_id: device_id.to_string(),
            blocksize,
            disk_layout,
            mode: str_field(entry, "mode")
                .and_then(|m| match m {
                    "expand" => Some(DasdMode::Expand),
                    "full" => Some(DasdMode::Full),
                    "quick" => Some(DasdMode::Quick),
                    _ => None,
                })
                .unwrap_or(DasdMode::Quick),
            label: str_field(entry, "label").unwrap_or(kname).to_string(),
        }));
    }

    result
}

/// Runs every subsystem parser over a snapshot and returns the combined
/// actions and non-fatal warnings.
pub fn parse(data: &ProbeData) -> ParseResult {
    let mut result = ParseResult::default();
    result.extend(parse_blockdev(&data.blockdev));
    result.extend(parse_filesystem(&data.filesystem, &data.blockdev));
    result.extend(parse_lvm(&data.lvm));
    result.extend(parse_raid(&data.raid));
    result.extend(parse_bcache(&data.bcache));
    result.extend(parse_dmcrypt(&data.dmcrypt));
    result.extend(parse_mount(&data.mount));
    result.extend(parse_zfs(&data.zfs));
    result.extend(parse_dasd(&data.dasd));
    result
}
