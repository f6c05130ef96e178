//! The envelope model (spec §3, component C2).
//!
//! An `Envelope<T>` carries a payload across network hops, immutable except
//! by appending hops. Serializes to JSON with three logical sections:
//! `event_data` (the payload), `metadata` (hops/security/policy trail), and
//! `scope` (partition/stream/sequence hints) — see `wcs-db`'s wire mapping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ids::{CausationId, InstanceId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopType {
    Current,
    Causation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    Inline,
    Queued,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    pub service_name: String,
    pub host: String,
    pub process_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub principal: String,
    pub scopes: Vec<String>,
}

/// One policy decision recorded in a hop's trail (e.g. a rate-limit or
/// authorization verdict made while handling that hop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub policy_name: String,
    pub allowed: bool,
    pub reason: Option<String>,
}

/// One entry in an envelope's traversal log: records where, when, and under
/// what strategy the envelope was processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub service_instance: InstanceId,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub hop_type: HopType,
    pub topic: Option<String>,
    pub stream_key: Option<String>,
    pub partition_index: Option<i32>,
    pub sequence_number: Option<i64>,
    pub execution_strategy: ExecutionStrategy,
    pub caller_info: CallerInfo,
    pub security_context: Option<SecurityContext>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub metadata: BTreeMap<String, Value>,
    pub trail: Vec<PolicyDecision>,
}

impl Hop {
    pub fn causation_id(&self, causation_id: CausationId) -> CausationHop {
        CausationHop {
            hop: self.clone(),
            causation_id,
        }
    }
}

/// A `Hop` tagged as the causation-type entry for a given causation id.
/// Exists so callers can pair a hop with the causation id that motivated it
/// without widening `Hop` itself with a field only meaningful for one variant.
#[derive(Debug, Clone)]
pub struct CausationHop {
    pub hop: Hop,
    pub causation_id: CausationId,
}

mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.num_milliseconds().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(d)?;
        Ok(Duration::milliseconds(millis))
    }
}

/// Immutable (except by appending hops) message carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub message_id: MessageId,
    pub payload: T,
    pub hops: Vec<Hop>,
}

impl<T> Envelope<T> {
    pub fn new(message_id: MessageId, payload: T) -> Self {
        Self {
            message_id,
            payload,
            hops: Vec::new(),
        }
    }

    /// Append a hop to the traversal log. Envelopes are otherwise immutable;
    /// this is the one sanctioned mutation.
    pub fn append_hop(&mut self, hop: Hop) {
        self.hops.push(hop);
    }

    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            message_id: self.message_id,
            payload: f(self.payload),
            hops: self.hops,
        }
    }
}

impl<T: PartialEq> PartialEq for Envelope<T> {
    fn eq(&self, other: &Self) -> bool {
        self.message_id == other.message_id
            && self.payload == other.payload
            && self.hops == other.hops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_hop() -> Hop {
        Hop {
            service_instance: InstanceId::new(),
            timestamp: Utc::now(),
            hop_type: HopType::Current,
            topic: Some("orders".into()),
            stream_key: Some("acct-1".into()),
            partition_index: Some(3),
            sequence_number: Some(1),
            execution_strategy: ExecutionStrategy::Queued,
            caller_info: CallerInfo {
                service_name: "order-service".into(),
                host: "host-a".into(),
                process_id: 123,
            },
            security_context: None,
            duration: Duration::milliseconds(42),
            metadata: BTreeMap::new(),
            trail: vec![PolicyDecision {
                policy_name: "rate-limit".into(),
                allowed: true,
                reason: None,
            }],
        }
    }

    #[test]
    fn round_trip_preserves_message_id_payload_and_hop_count() {
        let mut env = Envelope::new(MessageId::from_uuid(Uuid::now_v7()), json!({"x": 1}));
        env.append_hop(sample_hop());

        let json_str = serde_json::to_string(&env).unwrap();
        let back: Envelope<Value> = serde_json::from_str(&json_str).unwrap();

        assert_eq!(back, env);
        assert_eq!(back.hops.len(), 1);
    }

    #[test]
    fn append_hop_is_the_only_mutation_path() {
        let mut env = Envelope::new(MessageId::new(), 7i64);
        assert!(env.hops.is_empty());
        env.append_hop(sample_hop());
        env.append_hop(sample_hop());
        assert_eq!(env.hops.len(), 2);
    }
}
