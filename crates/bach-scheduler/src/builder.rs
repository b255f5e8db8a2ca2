//! Single-pass construction of the dependency graph
//!
//! Transactions are scanned in block order. A transaction with a known
//! footprint is ordered after the last transaction that touched any of its
//! keys (or the global barrier for keys not seen since); a transaction with no
//! keys at all still waits for the barrier. A transaction with an unknown
//! footprint is ordered after everything visible so far and becomes the new
//! barrier.

use crate::dependency::DependencyGraph;
use crate::error::{SchedulerError, SchedulerResult};
use crate::tracker::ConflictKeyTracker;
use crate::tx_id::{ConflictFootprint, TxId};
use std::collections::HashSet;
use std::hash::Hash;

/// Builds a sealed [`DependencyGraph`] from ordered conflict footprints
pub struct GraphBuilder<K> {
    tracker: ConflictKeyTracker<K>,
    graph: DependencyGraph,
    next: usize,
    unknown: usize,
}

impl<K: Eq + Hash + Clone> GraphBuilder<K> {
    /// Create a builder for a block of `len` transactions
    pub fn new(len: usize) -> Self {
        Self {
            tracker: ConflictKeyTracker::new(),
            graph: DependencyGraph::new(len),
            next: 0,
            unknown: 0,
        }
    }

    /// Build a sealed graph, calling `criticals` once per transaction in order
    pub fn build<T, F, C>(transactions: &[T], mut criticals: F) -> SchedulerResult<DependencyGraph>
    where
        F: FnMut(&T) -> C,
        C: Into<ConflictFootprint<K>>,
    {
        let mut builder = Self::new(transactions.len());
        for tx in transactions {
            builder.push(criticals(tx).into())?;
        }
        builder.finish()
    }

    /// Build a sealed graph from footprints computed ahead of time
    pub fn from_footprints<I>(footprints: I) -> SchedulerResult<DependencyGraph>
    where
        I: IntoIterator<Item = ConflictFootprint<K>>,
        I::IntoIter: ExactSizeIterator,
    {
        let footprints = footprints.into_iter();
        let mut builder = Self::new(footprints.len());
        for footprint in footprints {
            builder.push(footprint)?;
        }
        builder.finish()
    }

    /// Add the next transaction and its dependency edges
    pub fn push(&mut self, footprint: ConflictFootprint<K>) -> SchedulerResult<TxId> {
        let id = TxId::try_from(self.next)?;
        if self.next >= self.graph.len() {
            return Err(SchedulerError::TxOutOfRange {
                id,
                len: self.graph.len(),
            });
        }

        let predecessors = match footprint {
            ConflictFootprint::Known(mut keys) => {
                let mut seen = HashSet::with_capacity(keys.len());
                keys.retain(|key| seen.insert(key.clone()));

                let mut predecessors: Vec<TxId> = if keys.is_empty() {
                    self.tracker.global_barrier().into_iter().collect()
                } else {
                    keys.iter().filter_map(|key| self.tracker.resolve(key)).collect()
                };
                predecessors.sort_unstable();
                predecessors.dedup();

                // all lookups for this transaction happen before any update
                for key in keys {
                    self.tracker.update(key, id);
                }
                predecessors
            }
            ConflictFootprint::Unknown => {
                self.unknown += 1;
                self.tracker.touch_all(id)
            }
        };

        for pred in predecessors {
            if pred != id {
                self.graph.add_edge(pred, id)?;
            }
        }
        self.next += 1;
        Ok(id)
    }

    /// Number of transactions pushed with an unknown footprint
    pub fn unknown_count(&self) -> usize {
        self.unknown
    }

    /// Seal the graph; the tracker is discarded
    pub fn finish(mut self) -> SchedulerResult<DependencyGraph> {
        debug_assert_eq!(self.next, self.graph.len(), "graph finished before every push");
        let ready = self.graph.seal()?;
        tracing::debug!(
            transactions = self.graph.len(),
            edges = self.graph.edge_count(),
            ready,
            unknown = self.unknown,
            "dependency graph built"
        );
        Ok(self.graph)
    }
}
