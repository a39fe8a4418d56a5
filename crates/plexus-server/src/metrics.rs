//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle the `/metrics` route renders from. Call once at
/// startup, before the first metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Frames dropped on a full outbound queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Upgrade requests refused at the connection cap (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Failed `module:authenticate` attempts (counter).
pub const BROKER_AUTH_FAILURES_TOTAL: &str = "broker_auth_failures_total";
/// Error replies sent to a peer (counter, labels: code).
pub const BROKER_REJECTIONS_TOTAL: &str = "broker_rejections_total";
/// Routed frames (counter, labels: kind).
pub const BROKER_EVENTS_TOTAL: &str = "broker_events_total";
/// Peers evicted after a failed send (counter).
pub const BROKER_DELIVERY_FAILURES_TOTAL: &str = "broker_delivery_failures_total";
/// Occupied module slots (gauge).
pub const BROKER_MODULES_REGISTERED: &str = "broker_modules_registered";
