//! Unused-key reporting: every config pointer `CoordinatorConfig` actually
//! reads is registered here. Anything present in the document but not on
//! this list is either a typo or dead configuration, surfaced as a `Warn`
//! (logged, non-fatal) or `Fail` (rejected at boot) report.

use anyhow::{bail, Result};
use serde_json::Value;

const CONSUMED: &[&str] = &[
    "/polling_interval_ms",
    "/lease_seconds",
    "/stale_threshold_seconds",
    "/partition_count",
    "/max_partitions_per_instance",
    "/max_delivery_attempts",
    "/max_concurrent_calls",
    "/max_concurrent_streams",
    "/parallelize_streams",
    "/debug_mode",
    "/database_url_env",
    "/transport_credentials_env",
];

pub fn consumed_pointers() -> &'static [&'static str] {
    CONSUMED
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Default)]
pub struct UnusedKeyReport {
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Walk every leaf pointer in `config_json`, compare against
/// [`consumed_pointers`], and either return a report (`Warn`) or fail
/// (`Fail`) when unconsumed leaves remain. Only exact-leaf pointers count:
/// a sibling of a consumed key is never treated as consumed.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, &mut String::new(), &mut leaves);
    leaves.sort();

    let unused: Vec<String> = leaves
        .into_iter()
        .filter(|p| !CONSUMED.contains(&p.as_str()))
        .collect();

    if policy == UnusedKeyPolicy::Fail && !unused.is_empty() {
        bail!("CONFIG_UNUSED_KEYS: unconsumed config pointers: {unused:?}");
    }

    Ok(UnusedKeyReport {
        unused_leaf_pointers: unused,
    })
}

fn collect_leaf_pointers(v: &Value, pointer: &mut String, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, val) in map {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(k);
                collect_leaf_pointers(val, pointer, out);
                pointer.truncate(len);
            }
        }
        _ => out.push(pointer.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_keys_are_clean() {
        let cfg = json!({ "lease_seconds": 45, "debug_mode": true });
        let report = report_unused_keys(&cfg, UnusedKeyPolicy::Warn).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn warn_mode_reports_without_erroring() {
        let cfg = json!({ "lease_seconds": 45, "typo_field": 1 });
        let report = report_unused_keys(&cfg, UnusedKeyPolicy::Warn).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.unused_leaf_pointers, vec!["/typo_field".to_string()]);
    }

    #[test]
    fn fail_mode_errors_on_unused_keys() {
        let cfg = json!({ "typo_field": 1 });
        let result = report_unused_keys(&cfg, UnusedKeyPolicy::Fail);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("CONFIG_UNUSED_KEYS"));
    }

    #[test]
    fn sibling_of_consumed_key_is_not_silently_consumed() {
        let cfg = json!({ "lease_seconds": 1, "lease_seconds_extra": 2 });
        let report = report_unused_keys(&cfg, UnusedKeyPolicy::Warn).unwrap();
        assert_eq!(
            report.unused_leaf_pointers,
            vec!["/lease_seconds_extra".to_string()]
        );
    }
}
