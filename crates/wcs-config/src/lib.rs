//! Layered YAML configuration for the work coordinator (spec §6).
//!
//! Loads and deep-merges YAML layers, canonicalizes the result to a stable
//! key order (so the content hash is reproducible regardless of how the
//! layers were assembled), rejects literal secret values embedded in the
//! document, and binds the canonical JSON into a typed `CoordinatorConfig`.

pub mod consumption;
pub mod secrets;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub use consumption::{report_unused_keys, UnusedKeyPolicy, UnusedKeyReport};
pub use secrets::{resolve_secrets, ResolvedSecrets};

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut contents = Vec::with_capacity(paths.len());
    for p in paths {
        contents.push(fs::read_to_string(p).with_context(|| format!("read config: {p}"))?);
    }
    let borrowed: Vec<&str> = contents.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&borrowed)
}

/// Same as [`load_layered_yaml`] but takes YAML source text directly,
/// for tests and for callers that have already fetched layers from
/// elsewhere (env, remote config store).
pub fn load_layered_yaml_from_strings(layers: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for (i, s) in layers.iter().enumerate() {
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(s).with_context(|| format!("parse yaml layer {i}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);
    let config_json: Value =
        serde_json::from_str(&canonical).context("canonical json parse failed")?;

    reject_embedded_secrets(&config_json)?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Configuration must carry secret *names* (env var names to resolve at
/// runtime via [`secrets::resolve_secrets`]), never literal secret values.
/// Walks every string leaf and rejects anything that looks like a resolved
/// credential.
fn reject_embedded_secrets(v: &Value) -> Result<()> {
    walk_for_secrets(v, &mut String::new())
}

fn walk_for_secrets(v: &Value, pointer: &mut String) -> Result<()> {
    match v {
        Value::Object(map) => {
            for (k, val) in map {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(k);
                walk_for_secrets(val, pointer)?;
                pointer.truncate(len);
            }
            Ok(())
        }
        Value::Array(arr) => {
            for (i, val) in arr.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&i.to_string());
                walk_for_secrets(val, pointer)?;
                pointer.truncate(len);
            }
            Ok(())
        }
        Value::String(s) => {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED: literal secret value at {pointer}");
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn looks_like_secret(s: &str) -> bool {
    const LITERAL_PREFIXES: &[&str] = &["sk-", "AKIA", "ghp_", "xox"];
    if LITERAL_PREFIXES.iter().any(|p| s.starts_with(p)) {
        return true;
    }
    if s.contains("-----BEGIN") {
        return true;
    }
    false
}

/// Typed, validated view of the coordinator's configuration keys (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub polling_interval_ms: u64,
    pub lease_seconds: i64,
    pub stale_threshold_seconds: i64,
    pub partition_count: i32,
    pub max_partitions_per_instance: i32,
    pub max_delivery_attempts: i32,
    pub max_concurrent_calls: usize,
    pub max_concurrent_streams: usize,
    pub parallelize_streams: bool,
    pub debug_mode: bool,
    pub database_url_env: String,
    pub transport_credentials_env: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1000,
            lease_seconds: 300,
            stale_threshold_seconds: 600,
            partition_count: 10_000,
            max_partitions_per_instance: 100,
            max_delivery_attempts: 10,
            max_concurrent_calls: 10,
            max_concurrent_streams: 10,
            parallelize_streams: true,
            debug_mode: false,
            database_url_env: "WCS_DATABASE_URL".to_string(),
            transport_credentials_env: None,
        }
    }
}

impl CoordinatorConfig {
    /// Bind the canonical config JSON into a `CoordinatorConfig`, falling
    /// back to defaults for any key the document omits.
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let defaults = serde_json::to_value(Self::default())?;
        let mut merged = defaults;
        deep_merge(&mut merged, loaded.config_json.clone());
        serde_json::from_value(merged).context("binding CoordinatorConfig from config_json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.polling_interval_ms, 1000);
        assert_eq!(cfg.lease_seconds, 300);
        assert_eq!(cfg.stale_threshold_seconds, 600);
        assert_eq!(cfg.partition_count, 10_000);
        assert_eq!(cfg.max_partitions_per_instance, 100);
        assert_eq!(cfg.max_delivery_attempts, 10);
    }

    #[test]
    fn yaml_overrides_bind_onto_config() {
        let yaml = r#"
lease_seconds: 45
debug_mode: true
"#;
        let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
        let cfg = CoordinatorConfig::from_loaded(&loaded).unwrap();
        assert_eq!(cfg.lease_seconds, 45);
        assert!(cfg.debug_mode);
        // untouched keys keep their defaults
        assert_eq!(cfg.partition_count, 10_000);
    }
}
