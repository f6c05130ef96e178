//! Scoped unit-of-work strategy (spec component C5): a producer accumulates
//! outbox/inbox writes and lease renewals across a logical unit of work,
//! then flushes them in a single coordination call rather than one call per
//! queued item.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use wcs_schemas::{
    Completion, CoordinationFlags, CoordinationRequest, Failure, MessageId,
    NewInboxMessage, NewOutboxMessage, PerspectiveCheckpointCompletion,
    PerspectiveCheckpointFailure, WorkBatch,
};

/// Identity and timing fields every coordination call carries regardless of
/// what has been queued (spec §4.1's fixed header fields).
#[derive(Debug, Clone)]
pub struct UnitOfWorkContext {
    pub instance_id: MessageId,
    pub service_name: String,
    pub host: String,
    pub process_id: u32,
    pub lease_duration_s: i64,
    pub partition_count: i32,
    pub stale_threshold_s: i64,
    pub max_delivery_attempts: i32,
}

/// Accumulates writes for one logical unit of work. Not `Send` across task
/// boundaries by convention — a single task owns it start to finish.
pub struct ScopedUnitOfWork {
    ctx: UnitOfWorkContext,
    flags: Option<CoordinationFlags>,

    outbox_completions: Vec<Completion>,
    outbox_failures: Vec<Failure>,
    inbox_completions: Vec<Completion>,
    inbox_failures: Vec<Failure>,
    new_outbox_messages: Vec<NewOutboxMessage>,
    new_inbox_messages: Vec<NewInboxMessage>,
    renew_outbox_lease_ids: Vec<MessageId>,
    renew_inbox_lease_ids: Vec<MessageId>,
    perspective_checkpoint_completions: Vec<PerspectiveCheckpointCompletion>,
    perspective_checkpoint_failures: Vec<PerspectiveCheckpointFailure>,

    flushed: bool,
}

impl ScopedUnitOfWork {
    pub fn new(ctx: UnitOfWorkContext) -> Self {
        Self {
            ctx,
            flags: None,
            outbox_completions: Vec::new(),
            outbox_failures: Vec::new(),
            inbox_completions: Vec::new(),
            inbox_failures: Vec::new(),
            new_outbox_messages: Vec::new(),
            new_inbox_messages: Vec::new(),
            renew_outbox_lease_ids: Vec::new(),
            renew_inbox_lease_ids: Vec::new(),
            perspective_checkpoint_completions: Vec::new(),
            perspective_checkpoint_failures: Vec::new(),
            flushed: true,
        }
    }

    pub fn queue_outbox_message(&mut self, message: NewOutboxMessage) {
        self.new_outbox_messages.push(message);
        self.flushed = false;
    }

    pub fn queue_inbox_message(&mut self, message: NewInboxMessage) {
        self.new_inbox_messages.push(message);
        self.flushed = false;
    }

    pub fn queue_outbox_completion(&mut self, completion: Completion) {
        self.outbox_completions.push(completion);
        self.flushed = false;
    }

    pub fn queue_inbox_completion(&mut self, completion: Completion) {
        self.inbox_completions.push(completion);
        self.flushed = false;
    }

    pub fn queue_outbox_failure(&mut self, failure: Failure) {
        self.outbox_failures.push(failure);
        self.flushed = false;
    }

    pub fn queue_inbox_failure(&mut self, failure: Failure) {
        self.inbox_failures.push(failure);
        self.flushed = false;
    }

    pub fn queue_outbox_lease_renewal(&mut self, message_id: MessageId) {
        self.renew_outbox_lease_ids.push(message_id);
        self.flushed = false;
    }

    pub fn queue_inbox_lease_renewal(&mut self, message_id: MessageId) {
        self.renew_inbox_lease_ids.push(message_id);
        self.flushed = false;
    }

    pub fn queue_perspective_checkpoint_completion(
        &mut self,
        completion: PerspectiveCheckpointCompletion,
    ) {
        self.perspective_checkpoint_completions.push(completion);
        self.flushed = false;
    }

    pub fn queue_perspective_checkpoint_failure(&mut self, failure: PerspectiveCheckpointFailure) {
        self.perspective_checkpoint_failures.push(failure);
        self.flushed = false;
    }

    /// Builds a request from the currently queued items without draining
    /// them — callers only clear the queues once the call built from this
    /// request has actually succeeded.
    fn build_request(&self, now: DateTime<Utc>) -> CoordinationRequest {
        CoordinationRequest {
            instance_id: self.ctx.instance_id,
            service_name: self.ctx.service_name.clone(),
            host: self.ctx.host.clone(),
            process_id: self.ctx.process_id,
            metadata: serde_json::Value::Null,
            now,
            lease_duration_s: self.ctx.lease_duration_s,
            partition_count: self.ctx.partition_count,
            stale_threshold_s: self.ctx.stale_threshold_s,
            max_delivery_attempts: self.ctx.max_delivery_attempts,
            flags: self.flags,
            outbox_completions: self.outbox_completions.clone(),
            outbox_failures: self.outbox_failures.clone(),
            inbox_completions: self.inbox_completions.clone(),
            inbox_failures: self.inbox_failures.clone(),
            new_outbox_messages: self.new_outbox_messages.clone(),
            new_inbox_messages: self.new_inbox_messages.clone(),
            renew_outbox_lease_ids: self.renew_outbox_lease_ids.clone(),
            renew_inbox_lease_ids: self.renew_inbox_lease_ids.clone(),
            perspective_checkpoint_completions: self.perspective_checkpoint_completions.clone(),
            perspective_checkpoint_failures: self.perspective_checkpoint_failures.clone(),
        }
    }

    /// Drops everything currently queued. Only called once a coordination
    /// call built from the same queues has returned `Ok`.
    fn clear_queued(&mut self) {
        self.outbox_completions.clear();
        self.outbox_failures.clear();
        self.inbox_completions.clear();
        self.inbox_failures.clear();
        self.new_outbox_messages.clear();
        self.new_inbox_messages.clear();
        self.renew_outbox_lease_ids.clear();
        self.renew_inbox_lease_ids.clear();
        self.perspective_checkpoint_completions.clear();
        self.perspective_checkpoint_failures.clear();
        self.flushed = true;
    }

    /// Issues one coordination call carrying everything queued so far.
    /// Returns `WorkBatch::default()` without a database round trip when
    /// nothing is queued. Queued items are only cleared once the call
    /// succeeds — if it errors, everything stays queued for the next flush
    /// to retry.
    pub async fn flush(
        &mut self,
        pool: &PgPool,
        now: DateTime<Utc>,
        flags: Option<CoordinationFlags>,
    ) -> Result<WorkBatch> {
        self.flags = flags;
        let request = self.build_request(now);

        if request.is_empty() {
            self.flushed = true;
            return Ok(WorkBatch::default());
        }

        let batch = wcs_db::coordinate(pool, &request).await?;
        self.clear_queued();
        Ok(batch)
    }

    /// Explicit end-of-scope call. Rust has no async `Drop`, so callers must
    /// invoke this (or `flush`) themselves; an unflushed scope with queued
    /// writes logs a warning instead of silently dropping them.
    pub fn finish(self) {
        if !self.flushed {
            tracing::warn!(
                service_name = %self.ctx.service_name,
                "ScopedUnitOfWork dropped with unflushed queued writes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ctx() -> UnitOfWorkContext {
        UnitOfWorkContext {
            instance_id: MessageId::new(),
            service_name: "svc".into(),
            host: "h".into(),
            process_id: 1,
            lease_duration_s: 300,
            partition_count: 16,
            stale_threshold_s: 600,
            max_delivery_attempts: 10,
        }
    }

    #[test]
    fn queuing_marks_not_flushed() {
        let mut uow = ScopedUnitOfWork::new(ctx());
        uow.queue_outbox_lease_renewal(MessageId::new());
        assert!(!uow.flushed);
    }

    #[test]
    fn build_request_does_not_drain_queued_items() {
        let mut uow = ScopedUnitOfWork::new(ctx());
        uow.queue_outbox_message(NewOutboxMessage {
            message_id: MessageId::new(),
            destination: "T".into(),
            envelope_type: "Order".into(),
            event_data: Value::Null,
            metadata: Value::Null,
            scope: None,
            stream_id: None,
            partition_number: None,
        });

        let request = uow.build_request(Utc::now());
        assert_eq!(request.new_outbox_messages.len(), 1);
        assert_eq!(uow.new_outbox_messages.len(), 1, "queued items survive until the call succeeds");
    }

    #[test]
    fn clear_queued_drains_everything_and_marks_flushed() {
        let mut uow = ScopedUnitOfWork::new(ctx());
        uow.queue_outbox_lease_renewal(MessageId::new());
        uow.clear_queued();
        assert!(uow.flushed);
        assert!(uow.renew_outbox_lease_ids.is_empty());
    }

    #[test]
    fn fresh_scope_has_nothing_to_flush() {
        let mut uow = ScopedUnitOfWork::new(ctx());
        let request = uow.build_request(Utc::now());
        assert!(request.is_empty());
    }
}
