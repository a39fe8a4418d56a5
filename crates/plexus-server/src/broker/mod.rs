//! The broker: Peer Registry, Module Directory, and the Event Router.
//!
//! Registry and directory sit behind one `parking_lot::Mutex`. Nothing that
//! touches a transport runs under it: fan-out snapshots the recipients,
//! releases the lock, sends, then re-locks to evict peers whose send failed.

pub mod directory;
pub mod registry;
pub mod router;

use std::fmt;
use std::sync::Arc;

use ::metrics::{counter, gauge};
use parking_lot::Mutex;
use plexus_core::{Envelope, PeerId};
use tracing::{debug, info, warn};

use crate::metrics as names;

pub use directory::{ModuleDirectory, ModuleListing, SlotListing};
pub use registry::{Peer, PeerInfo, PeerLink, PeerRegistry};
pub use router::Routed;

/// Why a frame could not be handed to a peer's transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection is gone.
    #[error("peer transport closed")]
    Closed,
    /// The outbound queue is at capacity; this frame was not queued.
    #[error("peer send queue full")]
    Full,
}

/// The two things the broker needs from a connection.
pub trait PeerTransport: Send + Sync {
    /// Queue one text frame without blocking.
    fn send(&self, frame: Arc<str>) -> Result<(), SendError>;

    /// Ask the transport to close the connection. Idempotent.
    fn close(&self);
}

/// Broker policy.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Shared secret for `module:authenticate`. `None` admits everyone.
    pub shared_secret: Option<String>,
    /// Cumulative full-queue drops after which a peer is evicted.
    pub max_dropped_messages: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            max_dropped_messages: 100,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .field("max_dropped_messages", &self.max_dropped_messages)
            .finish()
    }
}

/// Result of one send attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    /// Queue full; frame dropped, peer kept.
    Dropped,
    /// Peer must be evicted.
    Dead,
}

#[derive(Default)]
pub(crate) struct BrokerState {
    pub(crate) registry: PeerRegistry,
    pub(crate) directory: ModuleDirectory,
}

/// One isolated broker instance.
pub struct Broker {
    config: BrokerConfig,
    state: Mutex<BrokerState>,
}

impl Broker {
    /// Create a broker with no peers.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BrokerState::default()),
        }
    }

    /// Whether a shared secret gates this broker.
    pub fn requires_auth(&self) -> bool {
        self.config.shared_secret.is_some()
    }

    /// Register a freshly opened connection.
    ///
    /// Without a shared secret the peer starts authenticated and is sent a
    /// `module:authenticated` acknowledgement right away.
    pub fn connect(&self, id: PeerId, transport: Arc<dyn PeerTransport>) -> PeerInfo {
        let authenticated = !self.requires_auth();
        let link = Arc::new(PeerLink::new(id, transport));
        let peer = Peer::new(Arc::clone(&link), authenticated);
        let info = peer.info();
        self.state.lock().registry.insert(peer);

        info!(peer_id = %info.id, authenticated, "peer connected");
        if authenticated {
            self.reply_to(&link, &Envelope::authenticated());
        }
        info
    }

    /// Forget a peer and free its slot. No-op for unknown ids.
    pub fn disconnect(&self, id: &PeerId) -> Option<PeerInfo> {
        let (peer, slots) = {
            let mut state = self.state.lock();
            let peer = state.registry.remove(id)?;
            let _ = state.directory.unregister(id);
            (peer, state.directory.slot_count())
        };
        gauge!(names::BROKER_MODULES_REGISTERED).set(slots as f64);
        if peer.is_announced() {
            info!(peer_id = %id, module = %peer.name, index = ?peer.index, "peer disconnected");
        } else {
            info!(peer_id = %id, "peer disconnected");
        }
        Some(peer.info())
    }

    /// Disconnect and close the transport.
    fn evict(&self, id: &PeerId) {
        let link = self.state.lock().registry.get(id).map(|p| Arc::clone(&p.link));
        if self.disconnect(id).is_some() {
            counter!(names::BROKER_DELIVERY_FAILURES_TOTAL).increment(1);
            let drops = link.as_ref().map_or(0, |l| l.drop_count());
            warn!(peer_id = %id, drops, "evicted peer after failed delivery");
        }
        if let Some(link) = link {
            link.transport().close();
        }
    }

    /// Public state of one peer.
    pub fn peer(&self, id: &PeerId) -> Option<PeerInfo> {
        self.state.lock().registry.get(id).map(Peer::info)
    }

    /// Connected peers.
    pub fn peer_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Introspection listing of the Module Directory.
    pub fn modules(&self) -> Vec<ModuleListing> {
        self.state.lock().directory.list()
    }

    /// Distinct module names with at least one occupied slot.
    pub fn module_count(&self) -> usize {
        self.state.lock().directory.module_count()
    }

    /// Occupant of a module slot.
    pub fn lookup(&self, name: &str, index: plexus_core::SlotIndex) -> Option<PeerId> {
        self.state.lock().directory.lookup(name, index).cloned()
    }

    /// Attempt one send and apply the slow-consumer policy.
    fn deliver(&self, link: &PeerLink, frame: Arc<str>) -> Delivery {
        match link.transport().send(frame) {
            Ok(()) => Delivery::Sent,
            Err(SendError::Closed) => {
                debug!(peer_id = %link.id(), "send to closed transport");
                Delivery::Dead
            }
            Err(SendError::Full) => {
                counter!(names::WS_BROADCAST_DROPS_TOTAL).increment(1);
                let drops = link.record_drop();
                if drops >= self.config.max_dropped_messages {
                    warn!(peer_id = %link.id(), drops, "slow consumer, disconnecting");
                    Delivery::Dead
                } else {
                    debug!(peer_id = %link.id(), drops, "send queue full, dropped frame");
                    Delivery::Dropped
                }
            }
        }
    }

    /// Send a server-originated envelope to one peer, evicting it on death.
    fn reply_to(&self, link: &PeerLink, envelope: &Envelope) {
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(event_type = %envelope.event_type, error = %e, "failed to serialize reply");
                return;
            }
        };
        if self.deliver(link, json.into()) == Delivery::Dead {
            self.evict(link.id());
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&BrokerState) -> R) -> R {
        f(&self.state.lock())
    }
}
