//! WebSocket peer connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use plexus_core::PeerId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{PeerTransport, SendError};

/// The broker-facing half of one WebSocket connection.
///
/// Frames go into a bounded queue drained by the session's writer task.
/// Closing cancels `closed`, which every task of the session watches.
pub struct PeerConnection {
    id: PeerId,
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Set on any inbound frame; cleared by each heartbeat check.
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl PeerConnection {
    /// Wrap a send queue. `closed` is usually a child of the shutdown token.
    pub fn new(id: PeerId, tx: mpsc::Sender<Arc<str>>, closed: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            closed,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Token cancelled when the connection should close.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Whether close has been requested.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Record inbound activity (text, pong, anything).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or since connect).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Read and clear the alive flag.
    ///
    /// Returns `true` if anything arrived since the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl PeerTransport for PeerConnection {
    fn send(&self, frame: Arc<str>) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
