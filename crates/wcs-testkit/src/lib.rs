//! Scenario-test harness: composes the real coordination function, the real
//! publisher worker, and the real ordered stream processor into one
//! test-driveable loop.
//!
//! Crate-local scenario tests under each crate's `tests/` directory
//! (`scenario_*.rs`, skipping gracefully when `WCS_DATABASE_URL` is unset)
//! still build their own `CoordinationRequest`s directly against `wcs_db`;
//! this crate is for scenarios that need the async worker loops actually
//! running, not just the coordination call in isolation.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use wcs_instance::{DatabaseReadinessCheck, PgReadinessCheck};
use wcs_runtime::{InboxHandler, NoopInboxHandler, PublisherHandle, PublisherWorker, PublisherWorkerConfig};
use wcs_transport::{IdentityPublishStrategy, InProcessTransport, PublishStrategy, Transport};
use wcs_uow::UnitOfWorkContext;

/// Connects to `WCS_DATABASE_URL` and runs migrations, matching
/// `wcs_db::testkit_db_pool` (re-exported here so scenario tests that pull
/// in the harness do not also need a direct `wcs-db` dependency).
pub async fn testkit_db_pool() -> Result<PgPool> {
    wcs_db::testkit_db_pool()
        .await
        .context("bootstrapping testkit db pool")
}

/// A fresh, random `UnitOfWorkContext` for a scenario test instance. Each
/// call gets a distinct `instance_id` so concurrent scenario tests sharing
/// one database never collide on partition ownership.
pub fn scenario_context(service_name: impl Into<String>) -> UnitOfWorkContext {
    UnitOfWorkContext {
        instance_id: Uuid::new_v4().into(),
        service_name: service_name.into(),
        host: "scenario-harness".into(),
        process_id: std::process::id(),
        lease_duration_s: 300,
        partition_count: 16,
        stale_threshold_s: 600,
        max_delivery_attempts: 10,
    }
}

/// Readiness check that is always ready, for scenarios that don't exercise
/// Scenario F's database-unready path.
pub struct AlwaysReady;

#[async_trait::async_trait]
impl DatabaseReadinessCheck for AlwaysReady {
    async fn is_ready(&self) -> bool {
        true
    }
}

/// A running publisher worker plus the in-process transport it publishes
/// through, ready for a scenario test to admit work against `pool` and then
/// observe `transport`'s recorded publishes.
pub struct ScenarioHarness {
    pub pool: PgPool,
    pub transport: Arc<InProcessTransport>,
    handle: PublisherHandle,
    cancellation: tokio_util::sync::CancellationToken,
}

impl ScenarioHarness {
    /// Spawns a publisher worker against `pool` using a real `PgReadinessCheck`
    /// and a fresh `InProcessTransport`, polling every `polling_interval`.
    /// Claimed inbox work is dispatched through the worker's own ordered
    /// stream processor with a no-op handler; use
    /// [`Self::spawn_with_inbox_handler`] to observe real handler outcomes.
    pub fn spawn(
        pool: PgPool,
        ctx: UnitOfWorkContext,
        config: PublisherWorkerConfig,
    ) -> Self {
        Self::spawn_with_inbox_handler(pool, ctx, config, Arc::new(NoopInboxHandler))
    }

    /// Same as [`Self::spawn`] but with a caller-supplied [`InboxHandler`],
    /// for scenarios that need to observe the ordered stream processor
    /// actually invoking handler logic and reporting outcomes.
    pub fn spawn_with_inbox_handler(
        pool: PgPool,
        ctx: UnitOfWorkContext,
        config: PublisherWorkerConfig,
        inbox_handler: Arc<dyn InboxHandler>,
    ) -> Self {
        let readiness = Arc::new(PgReadinessCheck::new(pool.clone()));
        let transport = Arc::new(InProcessTransport::new());
        let strategy: Arc<dyn PublishStrategy> = Arc::new(IdentityPublishStrategy);

        let worker = PublisherWorker::with_inbox_handler(
            pool.clone(),
            ctx,
            readiness,
            transport.clone() as Arc<dyn Transport>,
            strategy,
            inbox_handler,
            config,
        );

        let cancellation = tokio_util::sync::CancellationToken::new();
        let handle = worker.spawn(cancellation.clone());

        Self {
            pool,
            transport,
            handle,
            cancellation,
        }
    }

    pub fn metrics(&self) -> Arc<wcs_runtime::PublisherMetrics> {
        self.handle.metrics.clone()
    }

    /// Cancels both worker loops and waits for them to drain.
    pub async fn shutdown(self) {
        self.cancellation.cancel();
        self.handle.coordinator.await.ok();
        self.handle.publisher.await.ok();
    }
}
