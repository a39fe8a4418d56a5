//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server runs.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connected peers.
    pub connections: usize,
    /// Distinct announced module names.
    pub modules: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, modules: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        modules,
    }
}
