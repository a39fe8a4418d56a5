//! Peer Registry: the sole owner of per-connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use plexus_core::{PeerId, SlotIndex};

use super::PeerTransport;

/// Send half of a peer plus its slow-consumer accounting.
///
/// Cloned out of the registry for fan-out so sends never run under the lock.
pub struct PeerLink {
    id: PeerId,
    transport: Arc<dyn PeerTransport>,
    dropped: AtomicU64,
}

impl PeerLink {
    pub(crate) fn new(id: PeerId, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            id,
            transport,
            dropped: AtomicU64::new(0),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub(crate) fn transport(&self) -> &dyn PeerTransport {
        self.transport.as_ref()
    }

    /// Record one dropped frame and return the running total.
    pub(crate) fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Frames dropped because the outbound queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One active connection.
pub struct Peer {
    pub(crate) link: Arc<PeerLink>,
    /// Completed the handshake, or no secret is configured.
    pub authenticated: bool,
    /// Announced module name; empty until announced.
    pub name: String,
    /// Announced slot index.
    pub index: SlotIndex,
}

impl Peer {
    pub(crate) fn new(link: Arc<PeerLink>, authenticated: bool) -> Self {
        Self {
            link,
            authenticated,
            name: String::new(),
            index: None,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &PeerId {
        self.link.id()
    }

    /// Whether the peer has announced a module identity.
    pub fn is_announced(&self) -> bool {
        !self.name.is_empty()
    }

    /// Owned copy of the public state.
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id().clone(),
            authenticated: self.authenticated,
            name: self.name.clone(),
            index: self.index,
        }
    }
}

/// Detached view of a [`Peer`], safe to hold after the lock is released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    /// Connection id.
    pub id: PeerId,
    /// Authentication state.
    pub authenticated: bool,
    /// Announced module name, empty if none.
    pub name: String,
    /// Announced slot index.
    pub index: SlotIndex,
}

/// Connected peers in connection order.
#[derive(Default)]
pub struct PeerRegistry {
    peers: IndexMap<PeerId, Peer>,
}

impl PeerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new peer. Ids are unique per connection, so this never replaces.
    pub fn insert(&mut self, peer: Peer) {
        let _ = self.peers.insert(peer.id().clone(), peer);
    }

    /// Remove a peer, keeping the order of the rest. `None` if already gone.
    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.shift_remove(id)
    }

    /// Look up a peer.
    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Look up a peer for mutation.
    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    /// All peers, oldest connection first.
    pub fn all(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Whether `id` is connected.
    #[cfg(test)]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// No peers connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
