//! `/etc/crypttab` emission for `dm_crypt` actions (§4.10, §6).

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

/// Where a `dm_crypt` action's key material comes from, mirroring the
/// `key_source`/`keyfile` shapes the config accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// No persisted key: prompt at boot.
    None,
    /// A path to a keyfile already present in the target, e.g. on a
    /// separate unlocked volume.
    KeyFile(PathBuf),
}

impl KeySource {
    fn render(&self) -> String {
        match self {
            KeySource::None => "none".to_string(),
            KeySource::KeyFile(path) => path.to_string_lossy().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrypttabEntry {
    pub mapped_name: String,
    pub source_device: PathBuf,
    pub key_source: KeySource,
    pub options: Vec<String>,
}

impl CrypttabEntry {
    pub fn new(mapped_name: impl Into<String>, source_device: impl Into<PathBuf>, key_source: KeySource) -> Self {
        Self {
            mapped_name: mapped_name.into(),
            source_device: source_device.into(),
            key_source,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    fn render(&self) -> String {
        let options = if self.options.is_empty() {
            "luks".to_string()
        } else {
            self.options.join(",")
        };

        format!(
            "{} {} {} {}\n",
            self.mapped_name,
            self.source_device.display(),
            self.key_source.render(),
            options,
        )
    }
}

#[derive(Debug, Default)]
pub struct Crypttab {
    pub entries: Vec<CrypttabEntry>,
}

impl Crypttab {
    pub fn render(&self) -> String {
        self.entries.iter().map(|e| e.render()).collect()
    }

    pub fn write(&self, crypttab_path: impl AsRef<Path>) -> Result<(), Error> {
        std::fs::write(crypttab_path.as_ref(), self.render().as_bytes())
            .with_context(|| format!("Failed to write new {}", crypttab_path.as_ref().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_luks_with_keyfile() {
        let entry = CrypttabEntry::new(
            "crypt_root",
            "/dev/disk/by-dname/root-part",
            KeySource::KeyFile(PathBuf::from("/keys/root.key")),
        );
        assert_eq!(
            entry.render(),
            "crypt_root /dev/disk/by-dname/root-part /keys/root.key luks\n"
        );
    }

    #[test]
    fn test_render_luks_with_no_key_prompts_at_boot() {
        let entry = CrypttabEntry::new("crypt_data", "/dev/sda2", KeySource::None);
        assert_eq!(entry.render(), "crypt_data /dev/sda2 none luks\n");
    }
}
