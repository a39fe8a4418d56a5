//! Liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::PeerConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Nothing arrived from the peer within the timeout.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a connection until it goes silent for `timeout` or `cancel` fires.
///
/// Checks every `interval`. Pings themselves are sent by the writer task;
/// a pong, like any other inbound frame, marks the connection alive.
pub async fn run_heartbeat(
    connection: Arc<PeerConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if !connection.check_alive() && connection.last_seen_elapsed() >= timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
