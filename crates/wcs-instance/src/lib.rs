//! Stable process identity and database readiness gating (spec component C8).
//!
//! `ServiceInstance` is the identity a process carries into every
//! coordination call (`instance_id`/`host`/`process_id`); `DatabaseReadinessCheck`
//! is the seam the coordinator loop polls before issuing that call, so a
//! database outage degrades to "skip this tick" rather than a crash.

use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Identity a process presents to the coordination function. Generated once
/// at boot and held for the process lifetime — instances do not rejoin under
/// a previous `instance_id` after a restart.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub instance_id: Uuid,
    pub service_name: String,
    pub host: String,
    pub process_id: u32,
}

impl ServiceInstance {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            service_name: service_name.into(),
            host: hostname(),
            process_id: std::process::id(),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs()
}

/// Gates the coordinator loop: when this returns `false`, the loop skips the
/// coordination call entirely for that tick (spec §7's "database unready"
/// taxonomy entry).
#[async_trait]
pub trait DatabaseReadinessCheck: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// `SELECT 1`-backed readiness probe against the coordinator's own pool.
pub struct PgReadinessCheck {
    pool: PgPool,
}

impl PgReadinessCheck {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseReadinessCheck for PgReadinessCheck {
    async fn is_ready(&self) -> bool {
        sqlx::query_scalar::<_, i32>("select 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

/// Builds a `ServiceInstance` and verifies the supplied pool answers once,
/// so a misconfigured `WCS_DATABASE_URL` fails at boot rather than on the
/// first coordinator-loop tick.
pub async fn bootstrap(service_name: impl Into<String>, pool: &PgPool) -> Result<ServiceInstance> {
    sqlx::query_scalar::<_, i32>("select 1")
        .fetch_one(pool)
        .await
        .context("database not reachable at boot")?;
    Ok(ServiceInstance::new(service_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_instance_gets_a_distinct_id() {
        let a = ServiceInstance::new("svc");
        let b = ServiceInstance::new("svc");
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[test]
    fn uptime_is_monotonic() {
        let first = uptime_secs();
        let second = uptime_secs();
        assert!(second >= first);
    }
}
