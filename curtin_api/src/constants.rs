// Configuration constants

/// First line of a multi-part config archive.
pub const ARCHIVE_HEADER: &str = "#curtin-config-archive";
pub const ARCHIVE_TYPE: &str = "text/curtin-config-archive";

/// First line of a plain config document embedded inside an archive.
pub const CONFIG_HEADER: &str = "#curtin-config";
pub const CONFIG_TYPE: &str = "text/curtin-config";

/// Default pipeline stage order, used when `stages` is absent from config.
pub const DEFAULT_STAGES: &[&str] = &["early", "partitioning", "network", "extract", "hook", "final"];

/// Name of the swap filesystem.
pub const SWAP_FILESYSTEM: &str = "swap";

/// Where `dm_crypt`/lvm mapped devices show up.
pub const DEV_MAPPER_PATH: &str = "/dev/mapper";

/// Mount point of the root filesystem inside a target.
pub const ROOT_MOUNT_POINT_PATH: &str = "/";

/// Where config fragments and `post_files` are preserved inside the target
/// for later log collection (§6 persisted state).
pub const CURTIN_CONFIGS_DIR: &str = "curtin/configs";

/// Name `install.save_install_config` writes the effective, merged
/// configuration under, inside [`CURTIN_CONFIGS_DIR`].
pub const INSTALL_CFG_FILENAME: &str = "curtin-install-cfg.yaml";

/// Default set of paths a ChrootableTarget binds into the target.
pub const DEFAULT_CHROOT_MOUNTS: &[&str] = &["/dev", "/proc", "/run", "/sys"];

/// Number of polls and delay between them used by wait-for-removal loops
/// (§4.7): 150 * 0.2s ≈ 30s.
pub const REMOVAL_POLL_COUNT: u32 = 150;
pub const REMOVAL_POLL_INTERVAL_MS: u64 = 200;

/// Default properties merged into a zpool before user overrides (§4.10).
pub const DEFAULT_ZPOOL_PROPERTIES: &[(&str, &str)] = &[
    ("ashift", "12"),
    ("version", "28"),
    ("normalization", "formD"),
    ("canmount", "off"),
    ("atime", "off"),
];
