//! In-memory cache of the latest durable State and MaxIndex per replica.
//!
//! The cache is authoritative only for values written by this process; it
//! starts empty after a restart and is populated lazily by reads. Writers
//! update it while building a write batch, so a failed commit must
//! invalidate the touched replicas to keep the cache from running ahead of
//! disk.

use std::collections::HashMap;

use parking_lot::RwLock;

use logstead_types::{ClusterId, NodeId, RaftState};

#[derive(Debug, Default)]
pub(crate) struct RdbCache {
    states: RwLock<HashMap<(ClusterId, NodeId), RaftState>>,
    max_indexes: RwLock<HashMap<(ClusterId, NodeId), u64>>,
}

impl RdbCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `state` as the replica's latest. Returns `true` iff it
    /// differs from the cached value, i.e. the caller needs to write it.
    pub(crate) fn set_state(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        state: RaftState,
    ) -> bool {
        let mut states = self.states.write();
        match states.insert((cluster_id, node_id), state) {
            Some(previous) => previous != state,
            None => true,
        }
    }

    /// Records the replica's latest durable max entry index.
    pub(crate) fn set_max_index(&self, cluster_id: ClusterId, node_id: NodeId, max_index: u64) {
        self.max_indexes.write().insert((cluster_id, node_id), max_index);
    }

    /// Cached max entry index, if this process has seen one.
    pub(crate) fn max_index(&self, cluster_id: ClusterId, node_id: NodeId) -> Option<u64> {
        self.max_indexes.read().get(&(cluster_id, node_id)).copied()
    }

    /// Drops both cached values for a replica. Called after a failed commit
    /// or after the replica's records were deleted or replaced wholesale.
    pub(crate) fn invalidate(&self, cluster_id: ClusterId, node_id: NodeId) {
        self.states.write().remove(&(cluster_id, node_id));
        self.max_indexes.write().remove(&(cluster_id, node_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_state_deduplicates() {
        let cache = RdbCache::new();
        let state = RaftState { term: 2, vote: 1, commit: 10 };

        assert!(cache.set_state(1, 1, state));
        assert!(!cache.set_state(1, 1, state));

        let newer = RaftState { term: 3, ..state };
        assert!(cache.set_state(1, 1, newer));
    }

    #[test]
    fn test_state_cache_is_per_replica() {
        let cache = RdbCache::new();
        let state = RaftState { term: 1, vote: 0, commit: 0 };
        assert!(cache.set_state(1, 1, state));
        assert!(cache.set_state(1, 2, state));
        assert!(cache.set_state(2, 1, state));
    }

    #[test]
    fn test_max_index_roundtrip() {
        let cache = RdbCache::new();
        assert_eq!(cache.max_index(1, 1), None);
        cache.set_max_index(1, 1, 55);
        assert_eq!(cache.max_index(1, 1), Some(55));
        cache.set_max_index(1, 1, 7);
        assert_eq!(cache.max_index(1, 1), Some(7));
    }

    #[test]
    fn test_invalidate_clears_both_sides() {
        let cache = RdbCache::new();
        let state = RaftState { term: 1, vote: 0, commit: 0 };
        cache.set_state(3, 4, state);
        cache.set_max_index(3, 4, 9);

        cache.invalidate(3, 4);

        assert_eq!(cache.max_index(3, 4), None);
        // an identical state must be written again after invalidation
        assert!(cache.set_state(3, 4, state));
    }
}
