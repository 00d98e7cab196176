use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[cfg(feature = "schemars")]
use schemars::JsonSchema;

use crate::{
    config::install::{InstallSettings, Source, StageCommand},
    is_default,
};

pub mod error;
pub mod storage;

use error::HostConfigurationValidationError;
use storage::StorageConfig;

/// The root configuration document. A plain YAML mapping, or the result of
/// flattening a `#curtin-config-archive` (§4.3), deserializes into this.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct HostConfiguration {
    /// Install sources, keyed by an arbitrary id. Values are either a
    /// `"<type>:<uri>"` shorthand string or an expanded `{type, uri}` form.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sources: HashMap<String, Source>,

    /// Pipeline stage order (§4.12). Defaults to the five built-in stages
    /// plus `hook` when absent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<String>,

    /// Per-stage command maps, keyed by `<stage>_commands`. Stored untyped
    /// here and resolved by name at pipeline build time, since the set of
    /// stages is itself configurable.
    #[serde(flatten)]
    pub stage_commands: HashMap<String, HashMap<String, StageCommand>>,

    /// The storage DAG (§3, §4.5).
    #[serde(default, skip_serializing_if = "is_default")]
    pub storage: StorageConfig,

    /// Install driver settings: target, logging, unmount policy.
    #[serde(default, skip_serializing_if = "is_default")]
    pub install: InstallSettings,

    /// Proxy configuration; a legacy top-level `http_proxy` is migrated here
    /// by the loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,

    /// Kernel crash dump handling.
    #[serde(
        rename = "kernel-crash-dumps",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub kernel_crash_dumps: Option<KernelCrashDumps>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct ProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum KernelCrashDumps {
    Enabled,
    Disabled,
    /// Run the distro detection script if present.
    Unset,
}

impl HostConfiguration {
    /// Validates the storage DAG and any cross-cutting invariants. Does not
    /// touch disk; see [`StorageConfig::linearize`] for the actual DAG build.
    pub fn validate(&self) -> Result<(), HostConfigurationValidationError> {
        self.storage
            .validate()
            .map_err(HostConfigurationValidationError::Storage)
    }

    /// The effective stage order: explicit config, else the five built-ins.
    pub fn effective_stages(&self) -> Vec<String> {
        if self.stages.is_empty() {
            crate::constants::DEFAULT_STAGES
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            self.stages.clone()
        }
    }

    #[cfg(feature = "schemars")]
    pub fn generate_schema() -> schemars::schema::RootSchema {
        crate::schema_helpers::schema_generator().into_root_schema_for::<HostConfiguration>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_stages_default() {
        let hc = HostConfiguration::default();
        assert_eq!(
            hc.effective_stages(),
            vec!["early", "partitioning", "network", "extract", "hook", "final"]
        );
    }

    #[test]
    fn test_effective_stages_override() {
        let hc = HostConfiguration {
            stages: vec!["early".into(), "extract".into()],
            ..Default::default()
        };
        assert_eq!(hc.effective_stages(), vec!["early", "extract"]);
    }
}
