//! `Transport` is the one sanctioned path an envelope takes to leave the
//! process: every publish call flows through an implementation of this
//! trait, a single gateway chokepoint rather than scattered send sites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use bitflags::bitflags;
use serde_json::Value;
use wcs_schemas::Envelope;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransportCapabilities: u8 {
        const PUBLISH_SUBSCRIBE = 0x01;
        const RELIABLE          = 0x02;
        const ORDERED           = 0x04;
        const REQUEST_RESPONSE  = 0x08;
    }
}

/// A named endpoint an envelope is published to or subscribed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub name: String,
}

impl Destination {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub accepted: bool,
}

/// Opaque subscription handle; dropping it does not unsubscribe on its own —
/// callers hold it only to keep the handler alive for the process lifetime.
pub struct Subscription {
    pub id: u64,
}

pub type BoxedHandler =
    Box<dyn Fn(Envelope<Value>) -> anyhow::Result<()> + Send + Sync + 'static>;

/// The sanctioned send/receive seam. Implementations decide how `publish`
/// and `subscribe` map onto whatever wire protocol backs them; callers never
/// reach past this trait to a protocol client directly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(
        &self,
        envelope: &Envelope<Value>,
        destination: &Destination,
    ) -> Result<PublishOutcome>;

    async fn subscribe(
        &self,
        destination: &Destination,
        handler: BoxedHandler,
    ) -> Result<Subscription>;

    fn is_ready(&self) -> bool;

    fn capabilities(&self) -> TransportCapabilities;
}

/// Chooses which destination an outbox record actually publishes to. Kept
/// as a trait (rather than a field on `OutboxWork`) so routing policy can
/// vary independently of the wire format — e.g. environment-based topic
/// prefixes — without touching `Transport` implementations.
pub trait PublishStrategy: Send + Sync {
    fn destination_for(&self, configured: &str) -> Destination;
}

/// Default strategy: the configured destination name is used verbatim.
pub struct IdentityPublishStrategy;

impl PublishStrategy for IdentityPublishStrategy {
    fn destination_for(&self, configured: &str) -> Destination {
        Destination::new(configured)
    }
}

/// In-process reference transport. Publishes are recorded in memory and
/// dispatched synchronously to any matching subscriber; readiness is
/// toggleable so publisher-worker tests can exercise the "transport
/// unready, buffer and retry" path (spec §8 Scenario D) without a real
/// broker.
pub struct InProcessTransport {
    ready: AtomicBool,
    published: Mutex<Vec<(Destination, Envelope<Value>)>>,
    subscribers: Mutex<Vec<(Destination, BoxedHandler)>>,
    next_subscription_id: std::sync::atomic::AtomicU64,
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            published: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            next_subscription_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Test hook: flips readiness, exercising Scenario D's buffering path.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn published_to(&self, destination: &Destination) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == destination)
            .count()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn publish(
        &self,
        envelope: &Envelope<Value>,
        destination: &Destination,
    ) -> Result<PublishOutcome> {
        if !self.is_ready() {
            anyhow::bail!("transport not ready: {}", destination.name);
        }

        self.published
            .lock()
            .unwrap()
            .push((destination.clone(), envelope.clone()));

        for (dest, handler) in self.subscribers.lock().unwrap().iter() {
            if dest == destination {
                handler(envelope.clone())?;
            }
        }

        Ok(PublishOutcome { accepted: true })
    }

    async fn subscribe(
        &self,
        destination: &Destination,
        handler: BoxedHandler,
    ) -> Result<Subscription> {
        let id = self
            .next_subscription_id
            .fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap()
            .push((destination.clone(), handler));
        Ok(Subscription { id })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::PUBLISH_SUBSCRIBE
            | TransportCapabilities::RELIABLE
            | TransportCapabilities::ORDERED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wcs_schemas::{Envelope, MessageId};

    fn envelope() -> Envelope<Value> {
        Envelope::new(MessageId::new(), json!({"qty": 1}))
    }

    #[tokio::test]
    async fn publish_records_and_dispatches_to_subscriber() {
        let transport = InProcessTransport::new();
        let destination = Destination::new("orders");

        let received = std::sync::Arc::new(Mutex::new(0u32));
        let received_clone = received.clone();
        transport
            .subscribe(
                &destination,
                Box::new(move |_env| {
                    *received_clone.lock().unwrap() += 1;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let outcome = transport.publish(&envelope(), &destination).await.unwrap();
        assert!(outcome.accepted);
        assert_eq!(transport.published_to(&destination), 1);
        assert_eq!(*received.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn publish_fails_while_not_ready() {
        let transport = InProcessTransport::new();
        transport.set_ready(false);
        let result = transport.publish(&envelope(), &Destination::new("orders")).await;
        assert!(result.is_err());
        assert_eq!(transport.published_count(), 0);
    }

    #[test]
    fn identity_strategy_passes_name_through() {
        let strategy = IdentityPublishStrategy;
        assert_eq!(strategy.destination_for("orders").name, "orders");
    }
}
