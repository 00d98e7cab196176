//! File system types used by `mount` and fstab-style tab files. `mkfs`'s own
//! family enum lives in [`crate::mkfs`], since its flag conventions differ
//! per tool rather than per logical filesystem name.

/// File system types for `mount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountFileSystemType {
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Xfs,
    Vfat,
    Ntfs,
    Iso9660,
    Tmpfs,
    Auto,
    Overlay,
    Squashfs,
}

impl MountFileSystemType {
    pub fn name(self) -> &'static str {
        match self {
            MountFileSystemType::Ext2 => "ext2",
            MountFileSystemType::Ext3 => "ext3",
            MountFileSystemType::Ext4 => "ext4",
            MountFileSystemType::Btrfs => "btrfs",
            MountFileSystemType::Xfs => "xfs",
            MountFileSystemType::Vfat => "vfat",
            MountFileSystemType::Ntfs => "ntfs",
            MountFileSystemType::Iso9660 => "iso9660",
            MountFileSystemType::Tmpfs => "tmpfs",
            MountFileSystemType::Auto => "auto",
            MountFileSystemType::Overlay => "overlay",
            MountFileSystemType::Squashfs => "squashfs",
        }
    }

    pub fn parse(fstype: &str) -> Self {
        match fstype {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "btrfs" => Self::Btrfs,
            "xfs" => Self::Xfs,
            "vfat" | "fat12" | "fat16" | "fat32" => Self::Vfat,
            "ntfs" => Self::Ntfs,
            "iso9660" => Self::Iso9660,
            "tmpfs" => Self::Tmpfs,
            "overlay" => Self::Overlay,
            "squashfs" => Self::Squashfs,
            _ => Self::Auto,
        }
    }
}

impl std::fmt::Display for MountFileSystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Provides a conversion from `MountFileSystemType` to `sys_mount::FilesystemType`
impl From<MountFileSystemType> for sys_mount::FilesystemType<'static> {
    fn from(s: MountFileSystemType) -> Self {
        sys_mount::FilesystemType::Manual(s.name())
    }
}

/// File system types for fstab-style tab files (§3 persisted target state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabFileSystemType {
    Auto,
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Xfs,
    Vfat,
    Ntfs,
    Iso9660,
    Tmpfs,
    Swap,
    Overlay,
}

impl TabFileSystemType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Btrfs => "btrfs",
            Self::Xfs => "xfs",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Iso9660 => "iso9660",
            Self::Tmpfs => "tmpfs",
            Self::Overlay => "overlay",
            Self::Swap => "swap",
        }
    }

    pub fn parse(fstype: &str) -> Self {
        match fstype {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "btrfs" => Self::Btrfs,
            "xfs" => Self::Xfs,
            "vfat" | "fat12" | "fat16" | "fat32" => Self::Vfat,
            "ntfs" => Self::Ntfs,
            "iso9660" => Self::Iso9660,
            "tmpfs" => Self::Tmpfs,
            "overlay" => Self::Overlay,
            "swap" => Self::Swap,
            _ => Self::Auto,
        }
    }
}

impl std::fmt::Display for TabFileSystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
