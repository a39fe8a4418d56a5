//! Peer identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque connection identity, assigned when the transport opens.
///
/// Stable for the lifetime of one connection and never reused while that
/// connection is open (`UUIDv7` under the hood).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh `peer_<uuid>` identifier.
    pub fn new() -> Self {
        Self(format!("peer_{}", Uuid::now_v7()))
    }

    /// Wrap an existing identifier (tests, external transports).
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_prefix() {
        let id = PeerId::new();
        assert!(id.as_str().starts_with("peer_"), "got: {id}");
    }

    #[test]
    fn peer_ids_are_unique() {
        let a = PeerId::new();
        let b = PeerId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_round_trips_display() {
        let id = PeerId::from_raw("custom");
        assert_eq!(id.to_string(), "custom");
        assert_eq!(id.as_ref(), "custom");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PeerId::from_raw("peer_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"peer_1\"");
    }
}
