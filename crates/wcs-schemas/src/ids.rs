//! Time-ordered 128-bit identifiers.
//!
//! `Xid` wraps a UUIDv7: a 48-bit millisecond timestamp followed by random
//! bits. Because the timestamp occupies the high-order bytes, `Ord` on the
//! raw `Uuid` bytes already matches creation-time order — no custom
//! comparison is needed for invariant 6 (stream total order by message id).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Xid(Uuid);

impl Xid {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for Xid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for Xid {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<Xid> for Uuid {
    fn from(id: Xid) -> Self {
        id.0
    }
}

pub type MessageId = Xid;
pub type CorrelationId = Xid;
pub type CausationId = Xid;
pub type InstanceId = Xid;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_ids_sort_in_creation_order() {
        let a = Xid::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Xid::new();
        assert!(a < b, "later-generated id must sort after earlier one");
    }

    #[test]
    fn round_trips_through_uuid() {
        let a = Xid::new();
        let u: Uuid = a.into();
        let b = Xid::from_uuid(u);
        assert_eq!(a, b);
    }
}
