//! Install driver settings and source declarations (§4.12, §6).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[cfg(feature = "schemars")]
use schemars::JsonSchema;

/// `install:` top-level key.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct InstallSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Extra files copied from the target into `/curtin/configs/` before
    /// unmount, so they survive for post-install diagnosis (§3, persisted
    /// target state).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_files: Vec<PathBuf>,

    /// Whether the working directory's target mounts are torn down after
    /// the pipeline completes. Defaults to true; set false to leave the
    /// target mounted for interactive debugging.
    #[serde(default = "default_true")]
    pub unmount: bool,

    /// Write the effective, merged configuration into the target at
    /// `/curtin/configs/curtin-install-cfg.yaml` before unmounting.
    #[serde(default = "default_true")]
    pub save_install_config: bool,

    /// Path a tarball of `/var/log` and the working directory is written to
    /// if the pipeline fails, for later inspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_tarfile: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// An install source: `"<type>:<uri>"` shorthand or the expanded form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum Source {
    Shorthand(String),
    Expanded {
        #[serde(rename = "type")]
        source_type: SourceType,
        uri: String,
    },
}

impl Source {
    /// Splits the shorthand form on its first `:`, or returns the expanded
    /// form's fields directly.
    pub fn resolve(&self) -> Result<(SourceType, String), String> {
        match self {
            Source::Expanded { source_type, uri } => Ok((*source_type, uri.clone())),
            Source::Shorthand(s) => {
                let (prefix, rest) = s.split_once(':').ok_or_else(|| {
                    format!("source '{s}' is missing a '<type>:' prefix")
                })?;
                let source_type = SourceType::parse(prefix)
                    .ok_or_else(|| format!("unknown source type '{prefix}'"))?;
                Ok((source_type, rest.to_string()))
            }
        }
    }
}

/// Archive format of an install source (§4.12). `Dd*` variants are written
/// directly to the target block device rather than extracted into a
/// filesystem tree.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum SourceType {
    Tgz,
    Tbz,
    Txz,
    DdTgz,
    DdTbz,
    DdTxz,
    DdTar,
    DdRaw,
    DdBz2,
    DdGz,
    DdXz,
    FsImage,
    FsImageLayered,
}

impl SourceType {
    fn parse(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "tgz" => SourceType::Tgz,
            "tbz" => SourceType::Tbz,
            "txz" => SourceType::Txz,
            "dd-tgz" => SourceType::DdTgz,
            "dd-tbz" => SourceType::DdTbz,
            "dd-txz" => SourceType::DdTxz,
            "dd-tar" => SourceType::DdTar,
            "dd-raw" => SourceType::DdRaw,
            "dd-bz2" => SourceType::DdBz2,
            "dd-gz" => SourceType::DdGz,
            "dd-xz" => SourceType::DdXz,
            // squashfs sources are a legacy alias for a layered fsimage.
            "squashfs" | "fsimage-layered" => SourceType::FsImageLayered,
            "fsimage" => SourceType::FsImage,
            _ => return None,
        })
    }

    /// Whether this source is written directly to a block device (`dd-*`)
    /// rather than unpacked into the target filesystem tree.
    pub fn is_raw_image(&self) -> bool {
        matches!(
            self,
            SourceType::DdTgz
                | SourceType::DdTbz
                | SourceType::DdTxz
                | SourceType::DdTar
                | SourceType::DdRaw
                | SourceType::DdBz2
                | SourceType::DdGz
                | SourceType::DdXz
        )
    }
}

/// A stage command: either a shell string or an argv list, matching how
/// `builtin` commands and user-supplied hooks are both expressed (§4.12).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum StageCommand {
    Shell(String),
    Argv(Vec<String>),
}

/// The resolved, ordered pipeline: stage name to the commands that run in
/// it, after defaulting and builtin substitution (§4.12).
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub stages: Vec<(String, Vec<StageCommand>)>,
}
