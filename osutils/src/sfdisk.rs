use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use duct::cmd;
use serde::Deserialize;
use uuid::Uuid;

use crate::partition_types::DiscoverablePartitionType;

#[derive(Debug, PartialEq, Deserialize)]
struct SfdiskOutput {
    partitiontable: SfDisk,
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct SfDisk {
    /// Disk label type
    pub label: SfDiskLabel,

    /// Disk UUID
    pub id: Uuid,

    /// Disk device path
    pub device: PathBuf,

    /// Disk size unit (always "sectors")
    pub unit: SfDiskUnit,

    /// First LBA
    pub firstlba: u64,

    /// Last LBA
    pub lastlba: u64,

    /// Sector size
    #[serde(default = "SfDisk::default_sectorsize")]
    pub sectorsize: u64,

    /// List of partitions
    #[serde(default)]
    pub partitions: Vec<SfPartition>,

    /// Disk capacity
    #[serde(skip)]
    pub capacity: u64,
}

impl SfDisk {
    fn default_sectorsize() -> u64 {
        512
    }
}

#[derive(Debug, PartialEq, Deserialize, Clone)]
pub struct SfPartition {
    /// Partition device path
    pub node: PathBuf,

    /// Partition start offset
    pub start: u64,

    /// Partition size in sectors
    #[serde(rename = "size")]
    pub size_sectors: u64,

    /// Partition type
    #[serde(rename = "type")]
    pub partition_type: DiscoverablePartitionType,

    /// Partition UUID
    #[serde(rename = "uuid")]
    pub id: Uuid,

    /// Partition name
    pub name: Option<String>,

    /// Partition size in bytes
    #[serde(skip)]
    pub size: u64,
}

#[derive(Debug, PartialEq, Deserialize)]
pub enum SfDiskLabel {
    #[serde(rename = "gpt")]
    Gpt,
}

#[derive(Debug, PartialEq, Deserialize)]
pub enum SfDiskUnit {
    #[serde(rename = "sectors")]
    Sectors,
}

impl SfDisk {
    pub fn get_info<S>(disk_bus_path: S) -> Result<Self, Error>
    where
        S: AsRef<Path>,
    {
        let sfdisk_output_json = cmd!("sfdisk", "-J", disk_bus_path.as_ref())
            .read()
            .context(format!(
                "Failed to fetch disk information for {}",
                disk_bus_path.as_ref().display()
            ))?;

        SfDisk::parse_sfdisk_output(&sfdisk_output_json).context(format!(
            "Failed to extract disk information for {}",
            disk_bus_path.as_ref().display()
        ))
    }

    fn parse_sfdisk_output(output: &str) -> Result<Self, Error> {
        let mut disk = serde_json::from_str::<SfdiskOutput>(output)
            .context("Failed to parse disk information")?
            .partitiontable;

        // Update capacity and partition sizes
        disk.capacity = (disk.lastlba - disk.firstlba + 1) * disk.sectorsize;
        disk.partitions.iter_mut().for_each(|part| {
            part.size = part.size_sectors * disk.sectorsize;
        });

        Ok(disk)
    }
}
