//! The storage configuration: a tagged list of actions forming a dependency
//! DAG (§3, §4.4, §4.5). Each action is keyed by a unique `id`; cross
//! references between actions are by that id.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

#[cfg(feature = "schemars")]
use schemars::JsonSchema;

use crate::{error::ValidationError, primitives::ByteCount, BlockDeviceId};

pub mod dag;

pub use dag::StorageDag;

/// Top-level storage document: `storage: {version: 1, config: [...]}` (§6).
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct StorageConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<StorageAction>,
}

fn default_version() -> u32 {
    1
}

impl StorageConfig {
    /// Builds the dependency DAG and checks every invariant in §3/§4.5
    /// without running a single external command (§8 property 2).
    pub fn validate(&self) -> Result<StorageDag, ValidationError> {
        StorageDag::build(&self.config)
    }

    /// Builds the DAG and returns its linearization (§4.5, §8 property 1).
    pub fn linearize(&self) -> Result<Vec<StorageAction>, ValidationError> {
        Ok(self.validate()?.linearize())
    }
}

/// One entry of the storage configuration. The `type` tag selects the
/// variant; every other field is type-specific (§3).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum StorageAction {
    Disk(DiskAction),
    Partition(Partition),
    Format(Format),
    Mount(Mount),
    LvmVolgroup(LvmVolgroup),
    LvmPartition(LvmPartition),
    DmCrypt(DmCrypt),
    Raid(Raid),
    Bcache(Bcache),
    Zpool(Zpool),
    Zfs(Zfs),
    Dasd(Dasd),
    NvmeController(NvmeController),
}

impl StorageAction {
    pub fn id(&self) -> &str {
        match self {
            StorageAction::Disk(a) => &a.id,
            StorageAction::Partition(a) => &a.id,
            StorageAction::Format(a) => &a.id,
            StorageAction::Mount(a) => &a.id,
            StorageAction::LvmVolgroup(a) => &a.id,
            StorageAction::LvmPartition(a) => &a.id,
            StorageAction::DmCrypt(a) => &a.id,
            StorageAction::Raid(a) => &a.id,
            StorageAction::Bcache(a) => &a.id,
            StorageAction::Zpool(a) => &a.id,
            StorageAction::Zfs(a) => &a.id,
            StorageAction::Dasd(a) => &a.id,
            StorageAction::NvmeController(a) => &a.id,
        }
    }

    /// The `type` discriminant, as used in error messages and the
    /// dependency-type allow matrix.
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageAction::Disk(_) => "disk",
            StorageAction::Partition(_) => "partition",
            StorageAction::Format(_) => "format",
            StorageAction::Mount(_) => "mount",
            StorageAction::LvmVolgroup(_) => "lvm_volgroup",
            StorageAction::LvmPartition(_) => "lvm_partition",
            StorageAction::DmCrypt(_) => "dm_crypt",
            StorageAction::Raid(_) => "raid",
            StorageAction::Bcache(_) => "bcache",
            StorageAction::Zpool(_) => "zpool",
            StorageAction::Zfs(_) => "zfs",
            StorageAction::Dasd(_) => "dasd",
            StorageAction::NvmeController(_) => "nvme_controller",
        }
    }

    /// Every id this action references, in field-declaration order. Used by
    /// both the dependency walker (§4.5) and clear-holders style analyses.
    pub fn references(&self) -> Vec<&str> {
        match self {
            StorageAction::Disk(_) => vec![],
            StorageAction::Partition(a) => vec![a.device.as_str()],
            StorageAction::Format(a) => vec![a.volume.as_str()],
            StorageAction::Mount(a) => a.device.as_deref().into_iter().collect(),
            StorageAction::LvmVolgroup(a) => a.devices.iter().map(String::as_str).collect(),
            StorageAction::LvmPartition(a) => vec![a.volgroup.as_str()],
            StorageAction::DmCrypt(a) => vec![a.volume.as_str()],
            StorageAction::Raid(a) => a
                .devices
                .iter()
                .chain(a.spare_devices.iter())
                .map(String::as_str)
                .collect(),
            StorageAction::Bcache(a) => {
                let mut refs = vec![a.backing_device.as_str()];
                if let Some(c) = &a.cache_device {
                    refs.push(c.as_str());
                }
                refs
            }
            StorageAction::Zpool(a) => a.vdevs.iter().map(String::as_str).collect(),
            StorageAction::Zfs(a) => vec![a.pool.as_str()],
            StorageAction::Dasd(_) => vec![],
            StorageAction::NvmeController(_) => vec![],
        }
    }

    /// The `(source_type -> allowed_dep_types)` matrix of §3's composition
    /// invariants. A dependency whose type is not in this set is a hard
    /// validation error.
    pub fn allowed_dependency_types(&self) -> &'static [&'static str] {
        match self {
            StorageAction::Disk(_) => &[],
            StorageAction::Partition(_) => &["disk", "raid", "bcache"],
            StorageAction::Format(_) => &[
                "partition",
                "raid",
                "lvm_partition",
                "dm_crypt",
                "bcache",
                "zfs",
            ],
            StorageAction::Mount(_) => &["format"],
            StorageAction::LvmVolgroup(_) => &["disk", "partition", "raid", "dm_crypt", "bcache"],
            StorageAction::LvmPartition(_) => &["lvm_volgroup"],
            StorageAction::DmCrypt(_) => &["partition", "raid", "lvm_partition", "bcache"],
            StorageAction::Raid(_) => {
                &["disk", "partition", "dm_crypt", "lvm_partition", "bcache"]
            }
            StorageAction::Bcache(_) => &["disk", "partition", "raid", "dm_crypt"],
            StorageAction::Zpool(_) => &["disk", "partition", "raid", "dm_crypt", "lvm_partition"],
            StorageAction::Zfs(_) => &["zpool"],
            StorageAction::Dasd(_) => &[],
            StorageAction::NvmeController(_) => &[],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum PartitionTableType {
    Dos,
    Gpt,
    Msdos,
    Vtoc,
    Unsupported,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum WipeMode {
    Random,
    Superblock,
    #[serde(rename = "superblock-recursive")]
    SuperblockRecursive,
    Zero,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct DiskAction {
    pub id: BlockDeviceId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wwn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipath: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptable: Option<PartitionTableType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wipe: Option<WipeMode>,
    #[serde(default)]
    pub preserve: bool,
    /// Stable `/dev/disk/by-dname/<name>` alias (§6 dname).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub grub_device: bool,
}

impl DiskAction {
    /// At least one of serial/wwn/path/multipath must be set; enforced by
    /// the validator rather than the schema since it's a disjunction.
    pub fn has_identifier(&self) -> bool {
        self.serial.is_some() || self.wwn.is_some() || self.path.is_some() || self.multipath.is_some()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum PartitionFlag {
    BiosGrub,
    Boot,
    Extended,
    Home,
    Linux,
    Logical,
    Lvm,
    Mbr,
    Prep,
    Raid,
    Swap,
    #[serde(rename = "")]
    None,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Partition {
    pub id: BlockDeviceId,
    pub device: BlockDeviceId,
    pub number: u32,
    pub size: ByteCount,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<ByteCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<PartitionFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub preserve: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wipe: Option<WipeMode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Format {
    pub id: BlockDeviceId,
    pub volume: BlockDeviceId,
    pub fstype: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub preserve: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Mount {
    pub id: BlockDeviceId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<BlockDeviceId>,
    /// A raw (non-referencing) mount source, e.g. `none` for swap/bind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fstype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct LvmVolgroup {
    pub id: BlockDeviceId,
    pub name: String,
    pub devices: Vec<BlockDeviceId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct LvmPartition {
    pub id: BlockDeviceId,
    pub name: String,
    pub volgroup: BlockDeviceId,
    pub size: ByteCount,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct DmCrypt {
    pub id: BlockDeviceId,
    pub volume: BlockDeviceId,
    pub dm_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum RaidLevel {
    #[serde(rename = "0")]
    Raid0,
    #[serde(rename = "1")]
    Raid1,
    #[serde(rename = "4")]
    Raid4,
    #[serde(rename = "5")]
    Raid5,
    #[serde(rename = "6")]
    Raid6,
    #[serde(rename = "10")]
    Raid10,
}

impl RaidLevel {
    /// `mdadm --create --level=` argument.
    pub fn mdadm_level(&self) -> &'static str {
        match self {
            RaidLevel::Raid0 => "0",
            RaidLevel::Raid1 => "1",
            RaidLevel::Raid4 => "4",
            RaidLevel::Raid5 => "5",
            RaidLevel::Raid6 => "6",
            RaidLevel::Raid10 => "10",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Raid {
    pub id: BlockDeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub raidlevel: RaidLevel,
    pub devices: Vec<BlockDeviceId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spare_devices: Vec<BlockDeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptable: Option<PartitionTableType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum BcacheCacheMode {
    Writethrough,
    Writeback,
    Writearound,
    None,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Bcache {
    pub id: BlockDeviceId,
    pub backing_device: BlockDeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_device: Option<BlockDeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_mode: Option<BcacheCacheMode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Zpool {
    pub id: BlockDeviceId,
    pub pool: String,
    pub vdevs: Vec<BlockDeviceId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pool_properties: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fs_properties: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Zfs {
    pub id: BlockDeviceId,
    pub pool: BlockDeviceId,
    pub volume: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum DasdBlocksize {
    #[serde(rename = "512")]
    B512,
    #[serde(rename = "1024")]
    B1024,
    #[serde(rename = "2048")]
    B2048,
    #[serde(rename = "4096")]
    B4096,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum DasdDiskLayout {
    Cdl,
    Ldl,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum DasdMode {
    Expand,
    Full,
    Quick,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct Dasd {
    pub id: BlockDeviceId,
    pub device_id: String,
    pub blocksize: DasdBlocksize,
    pub disk_layout: DasdDiskLayout,
    pub mode: DasdMode,
    pub label: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct NvmeController {
    pub id: BlockDeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_gpt_config() {
        let yaml = r#"
version: 1
config:
  - type: disk
    id: sda
    path: /dev/sda
    ptable: gpt
  - type: partition
    id: sda1
    device: sda
    number: 1
    size: 499122176
    flag: boot
  - type: format
    id: sda1-fmt
    volume: sda1
    fstype: ext4
  - type: mount
    id: sda1-mount
    device: sda1-fmt
    path: /
"#;
        let config: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.config.len(), 4);
        assert_eq!(config.config[0].type_name(), "disk");
        assert_eq!(config.config[1].references(), vec!["sda"]);
        assert_eq!(config.config[2].references(), vec!["sda1"]);
        assert_eq!(config.config[3].references(), vec!["sda1-fmt"]);
    }

    #[test]
    fn test_disk_requires_identifier() {
        let disk = DiskAction {
            id: "sda".into(),
            serial: None,
            wwn: None,
            path: None,
            multipath: None,
            ptable: None,
            wipe: None,
            preserve: false,
            name: None,
            grub_device: false,
        };
        assert!(!disk.has_identifier());
    }
}
