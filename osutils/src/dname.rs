//! Stable `/dev/disk/by-dname/<name>` udev rules (§6).
//!
//! Curtin lets config authors pin a friendly `name` on a disk, raid array,
//! or LVM logical volume; this module writes the matching udev rule so the
//! name resolves to a symlink regardless of enumeration order on later
//! boots.

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

/// The stable kernel identifier a dname rule matches against, one per
/// storage-item kind (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StableIdentifier {
    /// `ID_PART_TABLE_UUID`, for a whole disk.
    DiskPartTableUuid(String),
    /// `ID_PART_ENTRY_UUID`, for a partition.
    PartitionEntryUuid(String),
    /// `MD_UUID`, for a raid array.
    RaidUuid(String),
    /// `DM_NAME`, for an LVM logical volume.
    LvmName(String),
}

/// Maps forbidden characters in a dname to `-`, so any two names differing
/// only in forbidden characters collide onto the same sanitized suffix
/// (§8 property 10).
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

fn rule_for(identifier: &StableIdentifier, sanitized_name: &str) -> String {
    let symlink = format!("disk/by-dname/{sanitized_name}");
    match identifier {
        StableIdentifier::DiskPartTableUuid(uuid) => format!(
            "SUBSYSTEM==\"block\", ENV{{ID_PART_TABLE_UUID}}==\"{uuid}\", SYMLINK+=\"{symlink}\"\n"
        ),
        StableIdentifier::PartitionEntryUuid(uuid) => format!(
            "SUBSYSTEM==\"block\", ENV{{ID_PART_ENTRY_UUID}}==\"{uuid}\", SYMLINK+=\"{symlink}\"\n"
        ),
        StableIdentifier::RaidUuid(uuid) => format!(
            "SUBSYSTEM==\"block\", ENV{{MD_UUID}}==\"{uuid}\", SYMLINK+=\"{symlink}\"\n"
        ),
        StableIdentifier::LvmName(dm_name) => format!(
            "SUBSYSTEM==\"block\", ENV{{DM_NAME}}==\"{dm_name}\", SYMLINK+=\"{symlink}\"\n"
        ),
    }
}

/// Writes a single udev rules file containing one rule per `(name,
/// identifier)` pair, in `/etc/udev/rules.d/<priority>-curtin-dname.rules`
/// form. Callers choose the path so repeated installs into the same
/// target overwrite rather than accumulate.
pub fn write_rules(
    rules_path: impl AsRef<Path>,
    entries: &[(String, StableIdentifier)],
) -> Result<(), Error> {
    let mut contents = String::new();
    for (name, identifier) in entries {
        contents.push_str(&rule_for(identifier, &sanitize(name)));
    }

    std::fs::write(rules_path.as_ref(), contents.as_bytes())
        .with_context(|| format!("Failed to write new {}", rules_path.as_ref().display()))
}

/// The path a sanitized dname resolves to once udev has processed the rule.
pub fn symlink_path(name: &str) -> PathBuf {
    PathBuf::from("/dev/disk/by-dname").join(sanitize(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_maps_invalid_chars_to_dash() {
        assert_eq!(sanitize("root part"), "root-part");
        assert_eq!(sanitize("root/part"), "root-part");
        assert_eq!(sanitize("root_part-1"), "root_part-1");
    }

    #[test]
    fn test_sanitize_collision() {
        assert_eq!(sanitize("root part"), sanitize("root/part"));
        assert_eq!(sanitize("root.part"), sanitize("root:part"));
    }

    #[test]
    fn test_rule_for_disk() {
        let rule = rule_for(
            &StableIdentifier::DiskPartTableUuid("1234-uuid".into()),
            "my-disk",
        );
        assert!(rule.contains("ID_PART_TABLE_UUID"));
        assert!(rule.contains("disk/by-dname/my-disk"));
    }

    #[test]
    fn test_symlink_path() {
        assert_eq!(
            symlink_path("root disk"),
            PathBuf::from("/dev/disk/by-dname/root-disk")
        );
    }
}
