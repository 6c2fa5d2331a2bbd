//! TraceStore (consumed, spec §6): `get(scale, index) -> Tile` where a
//! `Tile` carries an ordered commit window plus one `Trace` per trace id.
//! The reference implementation here is in-memory, mirroring how
//! [`pixeltriage_expectations::MemoryDocumentStore`] stands in for a real
//! backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use pixeltriage_core::{Commit, Trace};

/// Opaque identifier for one trace (one parameter combination). Distinct
/// from `TestName`: several traces (different configs/devices) can share
/// the same test.
pub type TraceId = String;

#[derive(Debug, Clone, Default)]
pub struct Tile {
    pub commits: Vec<Commit>,
    pub traces: BTreeMap<TraceId, Trace>,
}

impl Tile {
    /// Right-open tip: the last valid commit index, or `None` for an
    /// empty tile (spec §4.1 "determine `lastCommitIndex`").
    #[must_use]
    pub fn last_commit_index(&self) -> Option<usize> {
        self.commits.len().checked_sub(1)
    }
}

/// Consumed trace backend (spec §6 "TraceStore (consumed)"). `scale`
/// selects a down-sampling tier (0 = full resolution); `index` selects
/// which window at that scale.
pub trait TraceStore: Send + Sync {
    fn get(&self, scale: u32, index: u32) -> Tile;
}

/// Single-tile in-memory reference implementation, swappable at runtime
/// (used by tests and by a server deployment with no external trace
/// backend configured).
#[derive(Default)]
pub struct InMemoryTraceStore {
    tile: RwLock<Tile>,
}

impl InMemoryTraceStore {
    #[must_use]
    pub fn new(tile: Tile) -> Self {
        Self { tile: RwLock::new(tile) }
    }

    pub fn set_tile(&self, tile: Tile) {
        *self.tile.write().unwrap_or_else(std::sync::PoisonError::into_inner) = tile;
    }
}

impl TraceStore for InMemoryTraceStore {
    fn get(&self, _scale: u32, _index: u32) -> Tile {
        self.tile.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_commit_index_is_none_for_empty_tile() {
        assert_eq!(Tile::default().last_commit_index(), None);
    }

    #[test]
    fn in_memory_store_returns_what_was_set() {
        let mut tile = Tile::default();
        tile.commits.push(Commit { hash: "h1".into(), author: "a".into(), commit_time: 1 });
        let store = InMemoryTraceStore::new(tile);
        assert_eq!(store.get(0, 0).last_commit_index(), Some(0));
    }
}
