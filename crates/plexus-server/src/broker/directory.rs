//! Module Directory: `(name, index)` slots over announced peers.
//!
//! Holds ids only. The registry owns the peers; the directory is a derived
//! index and every id in it must also be present in the registry.

use std::collections::BTreeMap;

use plexus_core::{PeerId, SlotIndex};
use serde::Serialize;

/// One module name in an introspection listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleListing {
    /// Module name.
    pub name: String,
    /// Occupied slots under this name.
    pub count: usize,
    /// Singleton slot first, then ascending index.
    pub slots: Vec<SlotListing>,
}

/// One occupied slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotListing {
    /// Slot index; `null` for the singleton.
    pub index: SlotIndex,
    /// Occupying connection.
    pub peer_id: PeerId,
}

/// Name → index → occupant.
///
/// `None` sorts before `Some(_)`, so the singleton slot always lists first.
#[derive(Debug, Default)]
pub struct ModuleDirectory {
    modules: BTreeMap<String, BTreeMap<SlotIndex, PeerId>>,
}

impl ModuleDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `peer` in the `(name, index)` slot.
    ///
    /// Returns the previous occupant when a *different* peer is superseded.
    /// The caller must already have removed `peer` from any other slot.
    pub fn register(&mut self, peer: &PeerId, name: &str, index: SlotIndex) -> Option<PeerId> {
        let previous = self
            .modules
            .entry(name.to_owned())
            .or_default()
            .insert(index, peer.clone());
        previous.filter(|old| old != peer)
    }

    /// Remove `peer` from whatever slot it occupies.
    ///
    /// Returns `false` if it held none (never announced, or superseded).
    pub fn unregister(&mut self, peer: &PeerId) -> bool {
        let found = self.modules.iter().find_map(|(name, slots)| {
            slots
                .iter()
                .find(|(_, occupant)| *occupant == peer)
                .map(|(index, _)| (name.clone(), *index))
        });
        let Some((name, index)) = found else {
            return false;
        };
        if let Some(slots) = self.modules.get_mut(&name) {
            let _ = slots.remove(&index);
            if slots.is_empty() {
                let _ = self.modules.remove(&name);
            }
        }
        true
    }

    /// Occupant of `(name, index)`.
    pub fn lookup(&self, name: &str, index: SlotIndex) -> Option<&PeerId> {
        self.modules.get(name)?.get(&index)
    }

    /// Every module name with its occupied slots, sorted by name.
    pub fn list(&self) -> Vec<ModuleListing> {
        self.modules
            .iter()
            .map(|(name, slots)| ModuleListing {
                name: name.clone(),
                count: slots.len(),
                slots: slots
                    .iter()
                    .map(|(index, peer_id)| SlotListing {
                        index: *index,
                        peer_id: peer_id.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Occupied slots across all names.
    pub fn slot_count(&self) -> usize {
        self.modules.values().map(BTreeMap::len).sum()
    }

    /// Distinct module names present.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Every occupant id, for consistency checks.
    #[cfg(test)]
    pub fn occupants(&self) -> impl Iterator<Item = &PeerId> {
        self.modules.values().flat_map(BTreeMap::values)
    }
}
