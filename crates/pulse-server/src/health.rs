//! `/health` response body.

use std::time::Instant;

use pulse_settings::BackendKind;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections.
    pub connections: usize,
    /// Active I/O backend.
    pub backend: String,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, backend: BackendKind) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        backend: backend.to_string(),
    }
}
