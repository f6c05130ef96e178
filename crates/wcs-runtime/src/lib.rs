//! Async worker loops that sit on top of the coordination function: the
//! publisher worker (coordinator loop + publisher loop, spec component C4)
//! and the ordered stream processor (per-stream FIFO dispatch, spec
//! component C6).

pub mod publisher;
pub mod stream;

pub use publisher::{
    PublisherHandle, PublisherMetrics, PublisherMetricsSnapshot, PublisherWorker,
    PublisherWorkerConfig,
};
pub use stream::{
    InboxHandler, NoopInboxHandler, StreamHandler, StreamProcessor, StreamProcessorConfig,
};
