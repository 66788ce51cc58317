//! Mission item table.
//!
//! The store starts every session empty and accumulates items only
//! through inbound mission-item uploads; nothing prunes it. Re-uploading
//! a sequence number that is already present is rejected and the stored
//! item is left untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One waypoint-like entry of the mission protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissionItem {
    pub seq: u16,
    pub frame: u8,
    pub command: u16,
    pub current: bool,
    pub autocontinue: bool,
    pub param1: f64,
    pub param2: f64,
    pub param3: f64,
    pub param4: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("mission sequence {0} already present")]
pub struct DuplicateSequence(pub u16);

#[derive(Debug, Clone, Default)]
pub struct MissionStore {
    items: BTreeMap<u16, MissionItem>,
}

impl MissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Current size in the protocol's u16 representation.
    pub fn count(&self) -> u16 {
        self.items.len() as u16
    }

    pub fn get(&self, seq: u16) -> Option<&MissionItem> {
        self.items.get(&seq)
    }

    pub fn contains(&self, seq: u16) -> bool {
        self.items.contains_key(&seq)
    }

    pub fn insert(&mut self, item: MissionItem) -> Result<(), DuplicateSequence> {
        if self.items.contains_key(&item.seq) {
            return Err(DuplicateSequence(item.seq));
        }
        self.items.insert(item.seq, item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(seq: u16) -> MissionItem {
        MissionItem {
            seq,
            frame: 0,
            command: 16,
            current: seq == 0,
            autocontinue: true,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: 47.397_742,
            y: 8.545_594,
            z: 50.0,
        }
    }

    #[test]
    fn starts_empty_and_accumulates() {
        let mut store = MissionStore::new();
        assert!(store.is_empty());

        store.insert(item(0)).unwrap();
        store.insert(item(1)).unwrap();
        store.insert(item(2)).unwrap();

        assert_eq!(store.count(), 3);
        assert_eq!(store.get(1), Some(&item(1)));
        assert!(!store.contains(3));
    }

    #[test]
    fn duplicate_sequence_is_rejected_without_overwrite() {
        let mut store = MissionStore::new();
        store.insert(item(4)).unwrap();

        let mut replacement = item(4);
        replacement.z = 120.0;

        assert_eq!(store.insert(replacement), Err(DuplicateSequence(4)));
        assert_eq!(store.get(4), Some(&item(4)));
        assert_eq!(store.count(), 1);
    }
}
