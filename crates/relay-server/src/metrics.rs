//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a global recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket disconnections (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound frames dropped on a full connection queue (counter).
pub const WS_DROPPED_FRAMES_TOTAL: &str = "ws_dropped_frames_total";
/// Refused handshakes (counter, labels: reason).
pub const HANDSHAKE_FAILURES_TOTAL: &str = "handshake_failures_total";
/// Payloads published to a session channel (counter, labels: role).
pub const RELAY_FRAMES_TOTAL: &str = "relay_frames_total";
/// Publishes abandoned after retries (counter).
pub const RELAY_PUBLISH_FAILURES_TOTAL: &str = "relay_publish_failures_total";
/// Sessions registered (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Sessions terminated (counter, labels: cause).
pub const SESSIONS_KILLED_TOTAL: &str = "sessions_killed_total";
/// Heartbeat frames received (counter).
pub const HEARTBEATS_TOTAL: &str = "heartbeats_total";
