//! Data contracts shared across the work coordinator: time-ordered ids, the
//! envelope/hop model, status bitflags, and the coordination-call
//! request/response shapes.

pub mod envelope;
pub mod ids;
pub mod status;
pub mod work;

pub use envelope::{
    CallerInfo, CausationHop, Envelope, ExecutionStrategy, Hop, HopType, PolicyDecision,
    SecurityContext,
};
pub use ids::{CausationId, CorrelationId, InstanceId, MessageId, Xid};
pub use status::{FailureReason, StatusFlags};
pub use work::{
    AdmissionDiagnostic, Completion, CoordinationFlags, CoordinationRequest, Failure, InboxWork,
    NewInboxMessage, NewOutboxMessage, OutboxWork, PerspectiveCheckpointCompletion,
    PerspectiveCheckpointFailure, WorkBatch, WorkSource,
};
