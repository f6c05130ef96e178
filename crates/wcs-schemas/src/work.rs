//! Coordination-call request/response shapes (spec §4.1) and the in-memory
//! `WorkBatch` result (spec §3). Shared between `wcs-db` (which issues the
//! call) and `wcs-runtime`/`wcs-uow` (which build requests and consume
//! results) to avoid a dependency cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{InstanceId, MessageId};
use crate::status::{FailureReason, StatusFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkSource {
    Outbox,
    Inbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub message_id: MessageId,
    pub destination: String,
    pub envelope_type: String,
    pub event_data: Value,
    pub metadata: Value,
    pub scope: Option<Value>,
    pub stream_id: Option<String>,
    pub partition_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInboxMessage {
    pub message_id: MessageId,
    pub handler_name: String,
    pub event_data: Value,
    pub metadata: Value,
    pub scope: Option<Value>,
    pub stream_id: Option<String>,
    pub partition_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub message_id: MessageId,
    pub completed_status: StatusFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub message_id: MessageId,
    pub error: Option<String>,
    pub failure_reason: FailureReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveCheckpointCompletion {
    pub request_id: MessageId,
    pub response_type: String,
    pub response_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveCheckpointFailure {
    pub request_id: MessageId,
    pub error: String,
}

/// Optional per-call behavior switches (spec §4.1 `flags`). Empty today;
/// kept as a struct (rather than a raw `Option<()>`) so new per-call
/// switches can be added without changing the coordination-call signature.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CoordinationFlags {
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationRequest {
    pub instance_id: InstanceId,
    pub service_name: String,
    pub host: String,
    pub process_id: u32,
    pub metadata: Value,
    pub now: DateTime<Utc>,
    pub lease_duration_s: i64,
    pub partition_count: i32,
    pub stale_threshold_s: i64,
    pub max_delivery_attempts: i32,
    pub flags: Option<CoordinationFlags>,

    pub outbox_completions: Vec<Completion>,
    pub outbox_failures: Vec<Failure>,
    pub inbox_completions: Vec<Completion>,
    pub inbox_failures: Vec<Failure>,

    pub new_outbox_messages: Vec<NewOutboxMessage>,
    pub new_inbox_messages: Vec<NewInboxMessage>,

    pub renew_outbox_lease_ids: Vec<MessageId>,
    pub renew_inbox_lease_ids: Vec<MessageId>,

    pub perspective_checkpoint_completions: Vec<PerspectiveCheckpointCompletion>,
    pub perspective_checkpoint_failures: Vec<PerspectiveCheckpointFailure>,
}

impl CoordinationRequest {
    /// True when every list the caller would flush is empty — the scoped
    /// unit-of-work (C5) uses this to skip the coordination call entirely.
    pub fn is_empty(&self) -> bool {
        self.outbox_completions.is_empty()
            && self.outbox_failures.is_empty()
            && self.inbox_completions.is_empty()
            && self.inbox_failures.is_empty()
            && self.new_outbox_messages.is_empty()
            && self.new_inbox_messages.is_empty()
            && self.renew_outbox_lease_ids.is_empty()
            && self.renew_inbox_lease_ids.is_empty()
            && self.perspective_checkpoint_completions.is_empty()
            && self.perspective_checkpoint_failures.is_empty()
    }
}

/// One claimed outbox row, as returned by the coordination call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxWork {
    pub message_id: MessageId,
    pub destination: String,
    pub envelope_type: String,
    pub event_data: Value,
    pub metadata: Value,
    pub scope: Option<Value>,
    pub stream_id: Option<String>,
    pub partition_number: Option<i32>,
    pub status: StatusFlags,
    pub attempts: i32,
    pub is_newly_stored: bool,
    pub is_orphaned: bool,
}

/// One claimed inbox row, as returned by the coordination call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxWork {
    pub message_id: MessageId,
    pub handler_name: String,
    pub event_data: Value,
    pub metadata: Value,
    pub scope: Option<Value>,
    pub stream_id: Option<String>,
    pub partition_number: Option<i32>,
    pub status: StatusFlags,
    pub attempts: i32,
    pub is_newly_stored: bool,
    pub is_orphaned: bool,
}

/// A per-message admission diagnostic (spec §4.1 "optional error diagnostic
/// row for any admission failure").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionDiagnostic {
    pub message_id: MessageId,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkBatch {
    pub outbox_work: Vec<OutboxWork>,
    pub inbox_work: Vec<InboxWork>,
    pub diagnostics: Vec<AdmissionDiagnostic>,
}

impl WorkBatch {
    pub fn is_empty(&self) -> bool {
        self.outbox_work.is_empty() && self.inbox_work.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn empty_request() -> CoordinationRequest {
        CoordinationRequest {
            instance_id: InstanceId::new(),
            service_name: "svc".into(),
            host: "h".into(),
            process_id: 1,
            metadata: Value::Null,
            now: Utc::now(),
            lease_duration_s: 300,
            partition_count: 10_000,
            stale_threshold_s: 600,
            max_delivery_attempts: 10,
            flags: None,
            outbox_completions: vec![],
            outbox_failures: vec![],
            inbox_completions: vec![],
            inbox_failures: vec![],
            new_outbox_messages: vec![],
            new_inbox_messages: vec![],
            renew_outbox_lease_ids: vec![],
            renew_inbox_lease_ids: vec![],
            perspective_checkpoint_completions: vec![],
            perspective_checkpoint_failures: vec![],
        }
    }

    #[test]
    fn empty_request_reports_empty() {
        assert!(empty_request().is_empty());
    }

    #[test]
    fn one_queued_item_is_not_empty() {
        let mut req = empty_request();
        req.renew_outbox_lease_ids.push(MessageId::new());
        assert!(!req.is_empty());
    }

    #[test]
    fn work_batch_emptiness() {
        let mut wb = WorkBatch::default();
        assert!(wb.is_empty());
        wb.outbox_work.push(OutboxWork {
            message_id: MessageId::new(),
            destination: "T".into(),
            envelope_type: "Order".into(),
            event_data: Value::Null,
            metadata: Value::Null,
            scope: None,
            stream_id: None,
            partition_number: None,
            status: StatusFlags::STORED,
            attempts: 1,
            is_newly_stored: true,
            is_orphaned: false,
        });
        assert!(!wb.is_empty());
    }
}
