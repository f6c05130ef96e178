//! Unused-key reporting: keys the coordinator doesn't read are flagged in
//! `Warn` mode and rejected in `Fail` mode, without flagging keys it does
//! read.

use wcs_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

#[test]
fn warn_mode_reports_unused_keys_without_error() {
    let yaml = r#"
lease_seconds: 300
unused_section:
  foo: 123
  bar: 456
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();

    assert!(!report.is_clean());
    assert!(report
        .unused_leaf_pointers
        .contains(&"/unused_section/foo".to_string()));
    assert!(report
        .unused_leaf_pointers
        .contains(&"/unused_section/bar".to_string()));
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let yaml = r#"
lease_seconds: 300
unused_section:
  foo: 1
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let result = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn only_consumed_keys_are_clean() {
    let yaml = r#"
lease_seconds: 300
debug_mode: true
database_url_env: "WCS_DATABASE_URL"
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert!(report.is_clean());
}

#[test]
fn exact_leaf_consumption_does_not_consume_sibling_keys() {
    let yaml = r#"
lease_seconds: 300
lease_seconds_extra: 999
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert!(report
        .unused_leaf_pointers
        .contains(&"/lease_seconds_extra".to_string()));
}

#[test]
fn deterministic_unused_pointer_ordering() {
    let yaml = r#"
lease_seconds: 300
unused:
  b: 2
  a: 1
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/unused/a".to_string(), "/unused/b".to_string()]
    );
}
