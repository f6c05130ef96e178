//! Publisher worker: a coordinator loop that ticks the coordination function
//! and a publisher loop that drains claimed outbox work through a
//! `Transport`, the two tied together by an `mpsc` channel.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wcs_instance::DatabaseReadinessCheck;
use wcs_schemas::{Completion, Failure, FailureReason, MessageId, OutboxWork, StatusFlags};
use wcs_transport::{PublishStrategy, Transport};
use wcs_uow::{ScopedUnitOfWork, UnitOfWorkContext};

use crate::stream::{InboxHandler, StreamProcessor, StreamProcessorConfig};

/// Consecutive unready ticks before the coordinator loop escalates from a
/// quiet skip to a logged warning (spec §8 Scenario F).
const NOT_READY_WARN_THRESHOLD: u32 = 10;

#[derive(Debug, Default)]
pub struct PublisherMetrics {
    consecutive_not_ready: AtomicU32,
    buffered_messages: AtomicU64,
    total_lease_renewals: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublisherMetricsSnapshot {
    pub consecutive_not_ready: u32,
    pub buffered_messages: u64,
    pub total_lease_renewals: u64,
}

impl PublisherMetrics {
    pub fn snapshot(&self) -> PublisherMetricsSnapshot {
        PublisherMetricsSnapshot {
            consecutive_not_ready: self.consecutive_not_ready.load(Ordering::Relaxed),
            buffered_messages: self.buffered_messages.load(Ordering::Relaxed),
            total_lease_renewals: self.total_lease_renewals.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherWorkerConfig {
    pub polling_interval: Duration,
    pub lease_duration_s: i64,
    pub partition_count: i32,
    pub stale_threshold_s: i64,
    pub channel_capacity: usize,
    pub stream: StreamProcessorConfig,
    /// Gates `debug!`-level spans around each coordination tick (spec §6
    /// `debug_mode`); does not change behavior, only log verbosity.
    pub debug_mode: bool,
}

impl Default for PublisherWorkerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(1000),
            lease_duration_s: 300,
            partition_count: 10_000,
            stale_threshold_s: 600,
            channel_capacity: 256,
            stream: StreamProcessorConfig::default(),
            debug_mode: false,
        }
    }
}

/// Two cooperating loops plus the shared state they pass work and outcomes
/// through. Built with [`PublisherWorker::new`], started with
/// [`PublisherWorker::spawn`].
pub struct PublisherWorker {
    pool: PgPool,
    ctx: UnitOfWorkContext,
    readiness: Arc<dyn DatabaseReadinessCheck>,
    transport: Arc<dyn Transport>,
    strategy: Arc<dyn PublishStrategy>,
    inbox_handler: Arc<dyn InboxHandler>,
    config: PublisherWorkerConfig,
    metrics: Arc<PublisherMetrics>,
}

/// Handles to the two spawned tasks; aborting either one stops that half of
/// the worker without affecting the other.
pub struct PublisherHandle {
    pub coordinator: JoinHandle<()>,
    pub publisher: JoinHandle<()>,
    pub metrics: Arc<PublisherMetrics>,
}

impl PublisherWorker {
    pub fn new(
        pool: PgPool,
        ctx: UnitOfWorkContext,
        readiness: Arc<dyn DatabaseReadinessCheck>,
        transport: Arc<dyn Transport>,
        strategy: Arc<dyn PublishStrategy>,
        config: PublisherWorkerConfig,
    ) -> Self {
        Self::with_inbox_handler(
            pool,
            ctx,
            readiness,
            transport,
            strategy,
            Arc::new(crate::stream::NoopInboxHandler),
            config,
        )
    }

    /// Same as [`Self::new`] but with an explicit [`InboxHandler`] for
    /// claimed inbox work, rather than the no-op default.
    pub fn with_inbox_handler(
        pool: PgPool,
        ctx: UnitOfWorkContext,
        readiness: Arc<dyn DatabaseReadinessCheck>,
        transport: Arc<dyn Transport>,
        strategy: Arc<dyn PublishStrategy>,
        inbox_handler: Arc<dyn InboxHandler>,
        config: PublisherWorkerConfig,
    ) -> Self {
        Self {
            pool,
            ctx,
            readiness,
            transport,
            strategy,
            inbox_handler,
            config,
            metrics: Arc::new(PublisherMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<PublisherMetrics> {
        self.metrics.clone()
    }

    pub fn spawn(self, cancellation: CancellationToken) -> PublisherHandle {
        let (tx, rx) = mpsc::channel::<OutboxWork>(self.config.channel_capacity);

        let pending_completions = Arc::new(Mutex::new(Vec::<Completion>::new()));
        let pending_failures = Arc::new(Mutex::new(Vec::<Failure>::new()));
        let pending_renewals = Arc::new(Mutex::new(Vec::<MessageId>::new()));
        let pending_inbox_completions = Arc::new(Mutex::new(Vec::<Completion>::new()));
        let pending_inbox_failures = Arc::new(Mutex::new(Vec::<Failure>::new()));

        let stream_processor = StreamProcessor::new(
            self.config.stream.clone(),
            inbox_stream_handler(
                self.inbox_handler.clone(),
                pending_inbox_completions.clone(),
                pending_inbox_failures.clone(),
            ),
        );

        let coordinator = tokio::spawn(coordinator_loop(
            self.pool.clone(),
            self.ctx.clone(),
            self.readiness.clone(),
            self.config.clone(),
            self.metrics.clone(),
            tx,
            pending_completions.clone(),
            pending_failures.clone(),
            pending_renewals.clone(),
            pending_inbox_completions,
            pending_inbox_failures,
            stream_processor,
            cancellation.clone(),
        ));

        let publisher = tokio::spawn(publisher_loop(
            rx,
            self.transport.clone(),
            self.strategy.clone(),
            self.metrics.clone(),
            pending_completions,
            pending_failures,
            pending_renewals,
            cancellation,
        ));

        PublisherHandle {
            coordinator,
            publisher,
            metrics: self.metrics.clone(),
        }
    }
}

/// Adapts an [`InboxHandler`] into the [`crate::stream::StreamHandler`]
/// closure shape `StreamProcessor` expects, reporting the outcome into the
/// same accumulators the coordinator loop drains on its next tick.
fn inbox_stream_handler(
    handler: Arc<dyn InboxHandler>,
    pending_completions: Arc<Mutex<Vec<Completion>>>,
    pending_failures: Arc<Mutex<Vec<Failure>>>,
) -> crate::stream::StreamHandler {
    Arc::new(move |work: wcs_schemas::InboxWork| {
        let handler = handler.clone();
        let pending_completions = pending_completions.clone();
        let pending_failures = pending_failures.clone();
        Box::pin(async move {
            match handler.handle(&work).await {
                Ok(()) => {
                    pending_completions.lock().await.push(Completion {
                        message_id: work.message_id,
                        completed_status: StatusFlags::RECEIVED | StatusFlags::PROCESSED,
                    });
                }
                Err(error) => {
                    pending_failures.lock().await.push(Failure {
                        message_id: work.message_id,
                        error: Some(error.to_string()),
                        failure_reason: FailureReason::Unknown,
                    });
                }
            }
        })
    })
}

#[allow(clippy::too_many_arguments)]
async fn coordinator_loop(
    pool: PgPool,
    ctx: UnitOfWorkContext,
    readiness: Arc<dyn DatabaseReadinessCheck>,
    config: PublisherWorkerConfig,
    metrics: Arc<PublisherMetrics>,
    tx: mpsc::Sender<OutboxWork>,
    pending_completions: Arc<Mutex<Vec<Completion>>>,
    pending_failures: Arc<Mutex<Vec<Failure>>>,
    pending_renewals: Arc<Mutex<Vec<MessageId>>>,
    pending_inbox_completions: Arc<Mutex<Vec<Completion>>>,
    pending_inbox_failures: Arc<Mutex<Vec<Failure>>>,
    stream_processor: Arc<StreamProcessor>,
    cancellation: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.polling_interval);

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                tracing::info!("coordinator loop cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        if !readiness.is_ready().await {
            let count = metrics.consecutive_not_ready.fetch_add(1, Ordering::Relaxed) + 1;
            if count == NOT_READY_WARN_THRESHOLD {
                tracing::warn!(
                    consecutive_not_ready = count,
                    "database has not been ready for several consecutive ticks"
                );
            }
            continue;
        }
        metrics.consecutive_not_ready.store(0, Ordering::Relaxed);

        let mut uow = ScopedUnitOfWork::new(ctx.clone());
        for completion in pending_completions.lock().await.drain(..) {
            uow.queue_outbox_completion(completion);
        }
        for failure in pending_failures.lock().await.drain(..) {
            uow.queue_outbox_failure(failure);
        }
        for completion in pending_inbox_completions.lock().await.drain(..) {
            uow.queue_inbox_completion(completion);
        }
        for failure in pending_inbox_failures.lock().await.drain(..) {
            uow.queue_inbox_failure(failure);
        }
        let renewals: Vec<MessageId> = pending_renewals.lock().await.drain(..).collect();
        let renewal_count = renewals.len() as u64;
        for message_id in renewals {
            uow.queue_outbox_lease_renewal(message_id);
        }

        let flags = wcs_schemas::CoordinationFlags {
            debug_mode: config.debug_mode,
        };
        if config.debug_mode {
            tracing::debug!("coordination tick starting");
        }

        let batch = match uow.flush(&pool, Utc::now(), Some(flags)).await {
            Ok(batch) => batch,
            Err(error) => {
                tracing::error!(%error, "coordination call failed");
                uow.finish();
                continue;
            }
        };
        uow.finish();

        if renewal_count > 0 {
            metrics
                .total_lease_renewals
                .fetch_add(renewal_count, Ordering::Relaxed);
        }

        metrics
            .buffered_messages
            .fetch_add(batch.outbox_work.len() as u64, Ordering::Relaxed);

        for work in batch.inbox_work {
            stream_processor.admit(work).await;
        }

        for work in batch.outbox_work {
            if tx.send(work).await.is_err() {
                tracing::warn!("publisher loop gone, stopping coordinator loop");
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn publisher_loop(
    mut rx: mpsc::Receiver<OutboxWork>,
    transport: Arc<dyn Transport>,
    strategy: Arc<dyn PublishStrategy>,
    metrics: Arc<PublisherMetrics>,
    pending_completions: Arc<Mutex<Vec<Completion>>>,
    pending_failures: Arc<Mutex<Vec<Failure>>>,
    pending_renewals: Arc<Mutex<Vec<MessageId>>>,
    cancellation: CancellationToken,
) {
    loop {
        let work = tokio::select! {
            _ = cancellation.cancelled() => {
                tracing::info!("publisher loop cancelled");
                return;
            }
            maybe_work = rx.recv() => match maybe_work {
                Some(work) => work,
                None => return,
            },
        };

        metrics.buffered_messages.fetch_sub(1, Ordering::Relaxed);

        if !transport.is_ready() {
            // Scenario D: the transport is unavailable. Renew the lease
            // instead of publishing so the message stays claimed by this
            // instance and is retried next tick rather than reaped.
            pending_renewals.lock().await.push(work.message_id);
            continue;
        }

        let envelope = wcs_schemas::Envelope::new(work.message_id, work.event_data.clone());
        let destination = strategy.destination_for(&work.destination);

        match transport.publish(&envelope, &destination).await {
            Ok(outcome) if outcome.accepted => {
                pending_completions.lock().await.push(Completion {
                    message_id: work.message_id,
                    completed_status: StatusFlags::PUBLISHED | StatusFlags::PROCESSED,
                });
            }
            Ok(_) => {
                pending_failures.lock().await.push(Failure {
                    message_id: work.message_id,
                    error: Some(format!("publish to {} was not accepted", destination.name)),
                    failure_reason: FailureReason::TransientError,
                });
            }
            Err(error) => {
                pending_failures.lock().await.push(Failure {
                    message_id: work.message_id,
                    error: Some(error.to_string()),
                    failure_reason: FailureReason::TransientError,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_starts_at_zero() {
        let metrics = PublisherMetrics::default();
        let snap = metrics.snapshot();
        assert_eq!(snap.consecutive_not_ready, 0);
        assert_eq!(snap.buffered_messages, 0);
        assert_eq!(snap.total_lease_renewals, 0);
    }

    #[test]
    fn default_config_matches_spec_polling_interval() {
        let config = PublisherWorkerConfig::default();
        assert_eq!(config.polling_interval, Duration::from_millis(1000));
        assert_eq!(config.lease_duration_s, 300);
    }
}
