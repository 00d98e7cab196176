pub mod host;
pub mod install;
pub mod loader;

pub use host::{
    error::HostConfigurationValidationError,
    storage::{
        Bcache, BcacheCacheMode, Dasd, DasdBlocksize, DasdDiskLayout, DasdMode, DiskAction,
        DmCrypt, Format, LvmPartition, LvmVolgroup, Mount, NvmeController, Partition,
        PartitionFlag, PartitionTableType, Raid, RaidLevel, StorageAction, StorageConfig, Zfs,
        Zpool,
    },
    HostConfiguration,
};

pub use install::{InstallSettings, PipelineConfig, Source, SourceType};

pub use loader::{
    cmdarg2cfg, dump_config, load_config, load_config_archive, load_config_value,
    migrate_legacy_proxy, merge_cmdarg, merge_config,
};
