//! Ordered stream processor (spec component C6): dispatches claimed work
//! one message at a time per `stream_id`, so a handler is never invoked
//! concurrently with another message from the same stream even when the
//! coordination call hands back several streams' work in one batch. Cross-
//! stream dispatch is bounded by `max_concurrent_streams` via a semaphore.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};

use wcs_schemas::InboxWork;

#[derive(Debug, Clone)]
pub struct StreamProcessorConfig {
    pub max_concurrent_streams: usize,
    /// `false` collapses dispatch to a single global worker regardless of
    /// `max_concurrent_streams` (spec §4.4), useful for deterministic tests.
    pub parallelize_streams: bool,
}

impl StreamProcessorConfig {
    /// The effective concurrency the semaphore is built with: 1 when
    /// streams are not parallelized, `max_concurrent_streams` otherwise.
    fn effective_concurrency(&self) -> usize {
        if self.parallelize_streams {
            self.max_concurrent_streams.max(1)
        } else {
            1
        }
    }
}

impl Default for StreamProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 10,
            parallelize_streams: true,
        }
    }
}

/// Application-supplied inbox message handling, invoked once per dequeued
/// message in stream order by [`StreamProcessor`]. Mirrors `PublishStrategy`
/// on the producer side: the processor only guarantees ordering, handling
/// itself is the implementor's business.
#[async_trait]
pub trait InboxHandler: Send + Sync {
    async fn handle(&self, work: &InboxWork) -> Result<()>;
}

/// Handler that marks every item handled without doing any application
/// work. Default wiring for deployments that have not registered a real
/// handler yet — the seam `InboxHandler` exists for is filling in
/// `handle_name`-specific business logic.
pub struct NoopInboxHandler;

#[async_trait]
impl InboxHandler for NoopInboxHandler {
    async fn handle(&self, _work: &InboxWork) -> Result<()> {
        Ok(())
    }
}

/// A handler invoked once per dequeued message, in stream order. Errors are
/// the caller's business (typically: queue an inbox failure for the next
/// coordination call) — this processor only guarantees ordering, not retry.
pub type StreamHandler =
    Arc<dyn Fn(InboxWork) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync>;

struct StreamQueue {
    pending: VecDeque<InboxWork>,
    running: bool,
}

/// Holds one FIFO queue per `stream_id` and spawns a worker for a stream
/// only on its false-to-true running transition, so a stream with no
/// in-flight worker gets one started the moment work arrives for it, and a
/// stream already being drained just has its new work appended.
pub struct StreamProcessor {
    queues: Mutex<HashMap<String, StreamQueue>>,
    semaphore: Arc<Semaphore>,
    handler: StreamHandler,
}

impl StreamProcessor {
    pub fn new(config: StreamProcessorConfig, handler: StreamHandler) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.effective_concurrency())),
            handler,
        })
    }

    /// Admits one claimed inbox message, keyed by `stream_id`. Messages with
    /// no `stream_id` are dispatched under a per-message synthetic key
    /// (their own `message_id`), since ordering is meaningless for them.
    pub async fn admit(self: &Arc<Self>, work: InboxWork) {
        let key = work
            .stream_id
            .clone()
            .unwrap_or_else(|| work.message_id.to_string());

        let mut queues = self.queues.lock().await;
        let queue = queues.entry(key.clone()).or_insert_with(|| StreamQueue {
            pending: VecDeque::new(),
            running: false,
        });
        queue.pending.push_back(work);

        if queue.running {
            return;
        }
        queue.running = true;
        drop(queues);

        let this = self.clone();
        tokio::spawn(async move {
            this.drain(key).await;
        });
    }

    async fn drain(self: Arc<Self>, key: String) {
        loop {
            let next = {
                let mut queues = self.queues.lock().await;
                let Some(queue) = queues.get_mut(&key) else {
                    return;
                };
                match queue.pending.pop_front() {
                    Some(work) => work,
                    None => {
                        queue.running = false;
                        return;
                    }
                }
            };

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            (self.handler)(next).await;
            drop(permit);
        }
    }

    /// Number of streams with a non-empty queue or an in-flight worker.
    pub async fn active_stream_count(&self) -> usize {
        self.queues.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wcs_schemas::{MessageId, StatusFlags};

    fn work(stream_id: &str, seq: i32) -> InboxWork {
        InboxWork {
            message_id: MessageId::new(),
            handler_name: "test-handler".into(),
            event_data: Value::from(seq),
            metadata: Value::Null,
            scope: None,
            stream_id: Some(stream_id.into()),
            partition_number: None,
            status: StatusFlags::STORED,
            attempts: 1,
            is_newly_stored: true,
            is_orphaned: false,
        }
    }

    #[tokio::test]
    async fn same_stream_messages_are_handled_in_order() {
        let order = Arc::new(Mutex::new(Vec::<i64>::new()));
        let order_clone = order.clone();

        let handler: StreamHandler = Arc::new(move |w: InboxWork| {
            let order = order_clone.clone();
            Box::pin(async move {
                let seq = w.event_data.as_i64().unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                order.lock().await.push(seq);
            })
        });

        let processor = StreamProcessor::new(StreamProcessorConfig::default(), handler);
        processor.admit(work("S", 1)).await;
        processor.admit(work("S", 2)).await;
        processor.admit(work("S", 3)).await;

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*order.lock().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn distinct_streams_progress_independently() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let handler: StreamHandler = Arc::new(move |_w: InboxWork| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        let processor = StreamProcessor::new(StreamProcessorConfig::default(), handler);
        processor.admit(work("A", 1)).await;
        processor.admit(work("B", 1)).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parallelize_streams_false_serializes_distinct_streams() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let concurrent_clone = concurrent.clone();
        let max_concurrent_clone = max_concurrent.clone();

        let handler: StreamHandler = Arc::new(move |_w: InboxWork| {
            let concurrent = concurrent_clone.clone();
            let max_concurrent = max_concurrent_clone.clone();
            Box::pin(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            })
        });

        let config = StreamProcessorConfig {
            max_concurrent_streams: 10,
            parallelize_streams: false,
        };
        let processor = StreamProcessor::new(config, handler);
        processor.admit(work("A", 1)).await;
        processor.admit(work("B", 1)).await;
        processor.admit(work("C", 1)).await;

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
