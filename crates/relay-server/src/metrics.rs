//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Registered sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Outbound frames dropped on a full queue (counter).
pub const WS_FRAMES_DROPPED_TOTAL: &str = "ws_frames_dropped_total";
/// Sessions evicted after a failed write (counter).
pub const SESSIONS_EVICTED_TOTAL: &str = "sessions_evicted_total";
/// Sessions closed by the idle sweeper (counter).
pub const SESSIONS_IDLE_CLOSED_TOTAL: &str = "sessions_idle_closed_total";
/// Inbound frames dropped by the rate limiter (counter).
pub const WS_FRAMES_RATE_LIMITED_TOTAL: &str = "ws_frames_rate_limited_total";
/// Inbound frames that failed to parse (counter).
pub const WS_FRAMES_INVALID_TOTAL: &str = "ws_frames_invalid_total";
/// Bridge subscriptions accepted (counter).
pub const BRIDGE_SUBSCRIPTIONS_TOTAL: &str = "bridge_subscriptions_total";
/// Bridge subscribe/publish requests rejected (counter, label: op).
pub const BRIDGE_REJECTIONS_TOTAL: &str = "bridge_rejections_total";
/// Client publishes emitted onto the bus (counter).
pub const BRIDGE_PUBLISHES_TOTAL: &str = "bridge_publishes_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            SESSIONS_ACTIVE,
            WS_FRAMES_DROPPED_TOTAL,
            SESSIONS_EVICTED_TOTAL,
            SESSIONS_IDLE_CLOSED_TOTAL,
            WS_FRAMES_RATE_LIMITED_TOTAL,
            WS_FRAMES_INVALID_TOTAL,
            BRIDGE_SUBSCRIPTIONS_TOTAL,
            BRIDGE_REJECTIONS_TOTAL,
            BRIDGE_PUBLISHES_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
