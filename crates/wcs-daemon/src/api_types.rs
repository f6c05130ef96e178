//! Request and response types for all wcs-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use serde::{Deserialize, Serialize};
use wcs_runtime::PublisherMetricsSnapshot;

// ---------------------------------------------------------------------------
// /v1/healthz
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub database_reachable: bool,
}

// ---------------------------------------------------------------------------
// /v1/metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub publisher: PublisherMetricsSnapshot,
}
