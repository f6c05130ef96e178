//! Config hash stability: identical content hashes identically regardless of
//! key order or how many layers it was assembled from; different content
//! hashes differently.

use wcs_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
lease_seconds: 300
stale_threshold_seconds: 600
database_url_env: "WCS_DATABASE_URL"
"#;

const BASE_YAML_REORDERED: &str = r#"
database_url_env: "WCS_DATABASE_URL"
stale_threshold_seconds: 600
lease_seconds: 300
"#;

const OVERLAY_YAML: &str = r#"
lease_seconds: 45
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();

    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();

    assert_eq!(original.config_hash, reordered.config_hash);
    assert_eq!(original.canonical_json, reordered.canonical_json);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let modified = r#"
lease_seconds: 900
stale_threshold_seconds: 600
database_url_env: "WCS_DATABASE_URL"
"#;
    let b = load_layered_yaml_from_strings(&[modified]).unwrap();

    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn merged_layers_produce_stable_hash_and_overlay_wins() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();

    assert_eq!(a.config_hash, b.config_hash);

    let lease = a
        .config_json
        .pointer("/lease_seconds")
        .and_then(|v| v.as_i64())
        .unwrap();
    assert_eq!(lease, 45, "overlay should override base lease_seconds");
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn empty_config_produces_stable_hash() {
    let a = load_layered_yaml_from_strings(&["{}"]).unwrap();
    let b = load_layered_yaml_from_strings(&["{}"]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}
