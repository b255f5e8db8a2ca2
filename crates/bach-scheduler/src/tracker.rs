//! Conflict key tracker - last transaction to touch each key

use crate::tx_id::TxId;
use std::collections::HashMap;
use std::hash::Hash;

/// Maps each conflict key to the last transaction that touched it.
///
/// Rebuilt for every block and driven strictly left to right: `update` and
/// `touch_all` must be called with increasing ids. The global barrier is the
/// most recent transaction with an unknown footprint; keys never seen since
/// resolve to it.
#[derive(Debug)]
pub struct ConflictKeyTracker<K> {
    last_writer: HashMap<K, TxId>,
    global_barrier: Option<TxId>,
}

impl<K: Eq + Hash + Clone> ConflictKeyTracker<K> {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            last_writer: HashMap::new(),
            global_barrier: None,
        }
    }

    /// Last transaction explicitly recorded for `key`
    pub fn get(&self, key: &K) -> Option<TxId> {
        self.last_writer.get(key).copied()
    }

    /// Last transaction for `key`, falling back to the global barrier
    pub fn resolve(&self, key: &K) -> Option<TxId> {
        self.get(key).or(self.global_barrier)
    }

    /// Record `id` as the last transaction to touch `key`
    pub fn update(&mut self, key: K, id: TxId) {
        debug_assert!(
            self.last_writer.get(&key).map_or(true, |prev| *prev < id),
            "tracker updated out of order"
        );
        self.last_writer.insert(key, id);
    }

    /// Register a transaction that conflicts with everything.
    ///
    /// Returns the distinct transactions `id` must be ordered after, in
    /// ascending order. Every tracked key then points at `id`, and `id`
    /// becomes the new global barrier.
    pub fn touch_all(&mut self, id: TxId) -> Vec<TxId> {
        let mut predecessors: Vec<TxId> = self.last_writer.values().copied().collect();
        predecessors.sort_unstable();
        predecessors.dedup();

        // every tracked writer is the barrier or ordered after it
        if predecessors.is_empty() {
            predecessors.extend(self.global_barrier);
        }

        for writer in self.last_writer.values_mut() {
            *writer = id;
        }
        self.global_barrier = Some(id);

        predecessors
    }

    /// Most recent unknown-footprint transaction
    pub fn global_barrier(&self) -> Option<TxId> {
        self.global_barrier
    }

    /// Number of explicitly tracked keys
    pub fn len(&self) -> usize {
        self.last_writer.len()
    }

    /// Check if no key is tracked
    pub fn is_empty(&self) -> bool {
        self.last_writer.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for ConflictKeyTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker() {
        let tracker: ConflictKeyTracker<&str> = ConflictKeyTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.get(&"a"), None);
        assert_eq!(tracker.resolve(&"a"), None);
        assert_eq!(tracker.global_barrier(), None);
    }

    #[test]
    fn test_update_and_get() {
        let mut tracker = ConflictKeyTracker::new();
        tracker.update("a", TxId::new(0));
        tracker.update("a", TxId::new(2));
        tracker.update("b", TxId::new(1));

        assert_eq!(tracker.get(&"a"), Some(TxId::new(2)));
        assert_eq!(tracker.get(&"b"), Some(TxId::new(1)));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_touch_all_with_no_history() {
        let mut tracker: ConflictKeyTracker<&str> = ConflictKeyTracker::new();
        assert!(tracker.touch_all(TxId::new(0)).is_empty());
        assert_eq!(tracker.global_barrier(), Some(TxId::new(0)));
    }

    #[test]
    fn test_consecutive_touch_all_chains_through_barrier() {
        let mut tracker: ConflictKeyTracker<&str> = ConflictKeyTracker::new();
        tracker.touch_all(TxId::new(0));
        assert_eq!(tracker.touch_all(TxId::new(1)), vec![TxId::new(0)]);
        assert_eq!(tracker.global_barrier(), Some(TxId::new(1)));
    }

    #[test]
    fn test_touch_all_returns_distinct_writers() {
        let mut tracker = ConflictKeyTracker::new();
        tracker.update("a", TxId::new(0));
        tracker.update("b", TxId::new(0));
        tracker.update("c", TxId::new(1));

        assert_eq!(tracker.touch_all(TxId::new(2)), vec![TxId::new(0), TxId::new(1)]);
        assert_eq!(tracker.get(&"a"), Some(TxId::new(2)));
        assert_eq!(tracker.get(&"c"), Some(TxId::new(2)));
    }

    #[test]
    fn test_unseen_key_resolves_to_barrier() {
        let mut tracker = ConflictKeyTracker::new();
        tracker.update("a", TxId::new(0));
        tracker.touch_all(TxId::new(1));

        assert_eq!(tracker.get(&"b"), None);
        assert_eq!(tracker.resolve(&"b"), Some(TxId::new(1)));

        tracker.update("b", TxId::new(3));
        assert_eq!(tracker.resolve(&"b"), Some(TxId::new(3)));
    }
}
