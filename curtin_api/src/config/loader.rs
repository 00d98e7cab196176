//! Configuration loading: YAML parsing, archive expansion, deep merge, and
//! dotted-key command-line overrides (§4.3).

use std::{collections::BTreeMap, fs, path::Path};

use serde_yaml::Value;

use crate::error::UsageError;

use super::HostConfiguration;

const ARCHIVE_HEADER: &str = crate::constants::ARCHIVE_HEADER;
const CONFIG_HEADER: &str = crate::constants::CONFIG_HEADER;

/// Loads a single YAML document, whether it's a plain config or an archive
/// of configs (detected by its first line), merging all constituent
/// documents in file order before decoding into [`HostConfiguration`].
pub fn load_config(path: &Path) -> Result<HostConfiguration, UsageError> {
    let merged = migrate_legacy_proxy(load_config_value(path)?);

    serde_yaml::from_value(merged).map_err(|e| UsageError::InvalidCmdArg {
        arg: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Migrates a legacy top-level `http_proxy` key into `proxy.http_proxy`
/// (§6), only when `proxy` wasn't already given explicitly.
pub fn migrate_legacy_proxy(mut doc: Value) -> Value {
    let Value::Mapping(map) = &mut doc else {
        return doc;
    };

    if map.contains_key("proxy") {
        return doc;
    }

    if let Some(http_proxy) = map.remove("http_proxy") {
        let mut proxy = serde_yaml::Mapping::new();
        proxy.insert(Value::String("http-proxy".to_string()), http_proxy);
        map.insert(Value::String("proxy".to_string()), Value::Mapping(proxy));
    }

    doc
}

/// Like [`load_config`], but stops short of decoding into
/// [`HostConfiguration`] so callers can layer `--set` overrides on top of
/// the raw document first (§4.3 dotted-key overrides).
pub fn load_config_value(path: &Path) -> Result<Value, UsageError> {
    let text = fs::read_to_string(path).map_err(|e| UsageError::InvalidCmdArg {
        arg: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if is_archive(&text) {
        load_config_archive(&text)
    } else {
        parse_document(&text)
    }
}

fn is_archive(text: &str) -> bool {
    text.lines().next().map(str::trim) == Some(ARCHIVE_HEADER)
}

/// Parses a `#curtin-config-archive` document: a YAML list of inline
/// sub-documents (each optionally tagged `#curtin-config`), deep-merged in
/// list order so later entries win on scalar conflicts.
pub fn load_config_archive(text: &str) -> Result<Value, UsageError> {
    let body = text
        .splitn(2, '\n')
        .nth(1)
        .ok_or_else(|| UsageError::InvalidCmdArg {
            arg: "config archive".to_string(),
            reason: "archive has no body after its header line".to_string(),
        })?;

    let entries: Vec<String> = serde_yaml::from_str(body).map_err(|e| UsageError::InvalidCmdArg {
        arg: "config archive".to_string(),
        reason: e.to_string(),
    })?;

    let mut merged = Value::Mapping(Default::default());
    for entry in entries {
        let doc = parse_document(&entry)?;
        merged = merge_config(merged, doc);
    }
    Ok(merged)
}

fn parse_document(text: &str) -> Result<Value, UsageError> {
    let body = text
        .strip_prefix(CONFIG_HEADER)
        .map(str::trim_start)
        .unwrap_or(text);
    serde_yaml::from_str(body).map_err(|e| UsageError::InvalidCmdArg {
        arg: "config document".to_string(),
        reason: e.to_string(),
    })
}

/// Deep-merges `overlay` onto `base`: mappings merge key by key recursively,
/// sequences and scalars in `overlay` replace the corresponding value in
/// `base` wholesale.
pub fn merge_config(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = match base_map.remove(&key) {
                    Some(base_value) => merge_config(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged_value);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Parses a single `--set key.path=value` command-line override into a
/// one-entry nested document, ready to be passed to [`merge_config`].
///
/// `value` is interpreted as YAML unless prefixed with `json:`, in which
/// case it's parsed as JSON (matching the historical `cmdarg2cfg` behavior
/// of accepting either).
pub fn cmdarg2cfg(arg: &str) -> Result<Value, UsageError> {
    let (key_path, raw_value) = arg.split_once('=').ok_or_else(|| UsageError::InvalidCmdArg {
        arg: arg.to_string(),
        reason: "expected 'key.path=value'".to_string(),
    })?;

    let value = if let Some(json_text) = raw_value.strip_prefix("json:") {
        serde_json::from_str::<serde_json::Value>(json_text)
            .map_err(|e| UsageError::InvalidCmdArg {
                arg: arg.to_string(),
                reason: format!("invalid json: {e}"),
            })
            .map(json_to_yaml)?
    } else {
        serde_yaml::from_str(raw_value).map_err(|e| UsageError::InvalidCmdArg {
            arg: arg.to_string(),
            reason: e.to_string(),
        })?
    };

    let mut nested = value;
    for segment in key_path.split('.').rev() {
        let mut mapping = serde_yaml::Mapping::new();
        mapping.insert(Value::String(segment.to_string()), nested);
        nested = Value::Mapping(mapping);
    }
    Ok(nested)
}

fn json_to_yaml(value: serde_json::Value) -> Value {
    serde_yaml::to_value(value).expect("json values always convert to yaml")
}

/// Applies a list of `key.path=value` overrides onto a config document in
/// order, each building a one-entry overlay merged via [`merge_config`].
pub fn merge_cmdarg(base: Value, args: &[String]) -> Result<Value, UsageError> {
    let mut merged = base;
    for arg in args {
        let overlay = cmdarg2cfg(arg)?;
        merged = merge_config(merged, overlay);
    }
    Ok(merged)
}

/// Serializes a [`HostConfiguration`] back to a YAML document, used to
/// write the effective merged config into the target (§3, install settings
/// `save_install_config`).
pub fn dump_config(config: &HostConfiguration) -> Result<String, UsageError> {
    serde_yaml::to_string(config).map_err(|e| UsageError::InvalidCmdArg {
        arg: "effective configuration".to_string(),
        reason: e.to_string(),
    })
}

/// Flattens a YAML mapping into dotted-key/value pairs, the inverse of the
/// nested structure [`cmdarg2cfg`] builds. Leaf scalars are rendered via
/// their YAML representation; used for `curtin config-get`-style dumps.
pub fn flatten(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Mapping(map) => {
            for (key, value) in map {
                let key = key.as_str().unwrap_or_default();
                let next_prefix = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(value, next_prefix, out);
            }
        }
        other => {
            out.insert(
                prefix,
                serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_config_overwrites_scalars_and_merges_maps() {
        let base: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3\n").unwrap();
        let overlay: Value = serde_yaml::from_str("b:\n  c: 20\ne: 5\n").unwrap();
        let merged = merge_config(base, overlay);
        let text = serde_yaml::to_string(&merged).unwrap();
        let back: BTreeMap<String, Value> = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back["a"], Value::Number(1.into()));
        assert_eq!(back["e"], Value::Number(5.into()));
    }

    #[test]
    fn test_cmdarg2cfg_builds_nested_mapping() {
        let cfg = cmdarg2cfg("install.target=/mnt").unwrap();
        let flattened = flatten(&cfg);
        assert_eq!(flattened.get("install.target").map(String::as_str), Some("/mnt"));
    }

    #[test]
    fn test_cmdarg2cfg_accepts_json_prefixed_value() {
        let cfg = cmdarg2cfg(r#"storage.version=json:1"#).unwrap();
        let flattened = flatten(&cfg);
        assert_eq!(flattened.get("storage.version").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_migrate_legacy_proxy_moves_top_level_key() {
        let doc: Value = serde_yaml::from_str("http_proxy: http://proxy:3128\n").unwrap();
        let migrated = migrate_legacy_proxy(doc);
        let flattened = flatten(&migrated);
        assert_eq!(
            flattened.get("proxy.http-proxy").map(String::as_str),
            Some("http://proxy:3128")
        );
        assert!(!flattened.contains_key("http_proxy"));
    }

    #[test]
    fn test_migrate_legacy_proxy_leaves_explicit_proxy_alone() {
        let doc: Value =
            serde_yaml::from_str("http_proxy: http://legacy:3128\nproxy:\n  http-proxy: http://explicit:3128\n")
                .unwrap();
        let migrated = migrate_legacy_proxy(doc);
        let flattened = flatten(&migrated);
        assert_eq!(
            flattened.get("proxy.http-proxy").map(String::as_str),
            Some("http://explicit:3128")
        );
    }

    #[test]
    fn test_load_config_archive_merges_entries_in_order() {
        let archive = "#curtin-config-archive\n- 'a: 1'\n- 'a: 2\\nb: 3'\n";
        let merged = load_config_archive(archive).unwrap();
        let flattened = flatten(&merged);
        assert_eq!(flattened.get("a").map(String::as_str), Some("2"));
        assert_eq!(flattened.get("b").map(String::as_str), Some("3"));
    }
}
