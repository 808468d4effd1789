//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is up.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered client sessions.
    pub sessions: usize,
    /// Handlers registered on the event bus.
    pub bus_handlers: usize,
    /// Whether the client bridge accepts requests.
    pub bridge_running: bool,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    sessions: usize,
    bus_handlers: usize,
    bridge_running: bool,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        bus_handlers,
        bridge_running,
    }
}
