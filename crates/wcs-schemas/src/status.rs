//! Record status bitflags (spec §3).
//!
//! A single 32-bit field per outbox/inbox record; multiple bits may be set
//! simultaneously (e.g. `STORED | PUBLISHED`). Stored in Postgres as `int4`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct StatusFlags: i32 {
        const STORED    = 0x0001;
        const PUBLISHED = 0x0002;
        const COMPLETED = 0x0004;
        const PROCESSED = 0x0008;
        const RECEIVED  = 0x0010;
        const FAILED    = 0x8000;
    }
}

impl StatusFlags {
    /// Once `FAILED` is set the record is excluded from the claim index
    /// (invariant 5) though it remains visible to dead-letter queries.
    pub fn is_failed(&self) -> bool {
        self.contains(Self::FAILED)
    }

    /// A record is claimable only while unterminated: not failed and not
    /// already processed to completion.
    pub fn is_claimable(&self) -> bool {
        !self.is_failed() && !self.contains(Self::PROCESSED)
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    ValidationError,
    TransientError,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ValidationError => "ValidationError",
            FailureReason::TransientError => "TransientError",
            FailureReason::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ValidationError" => Some(FailureReason::ValidationError),
            "TransientError" => Some(FailureReason::TransientError),
            "Unknown" => Some(FailureReason::Unknown),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_bits_coexist() {
        let s = StatusFlags::STORED | StatusFlags::PUBLISHED;
        assert!(s.contains(StatusFlags::STORED));
        assert!(s.contains(StatusFlags::PUBLISHED));
        assert!(!s.is_failed());
        assert!(s.is_claimable());
    }

    #[test]
    fn failed_excludes_from_claim_index() {
        let s = StatusFlags::STORED | StatusFlags::FAILED;
        assert!(s.is_failed());
        assert!(!s.is_claimable());
    }

    #[test]
    fn failure_reason_round_trips() {
        for r in [
            FailureReason::ValidationError,
            FailureReason::TransientError,
            FailureReason::Unknown,
        ] {
            assert_eq!(FailureReason::parse(r.as_str()), Some(r));
        }
    }
}
