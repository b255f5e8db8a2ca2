//! Dependency graph for transaction ordering
//!
//! A DAG over transaction ids where an edge `p -> s` means `s` must not start
//! before `p` has finished. Edges are added single-threaded at build time;
//! after [`DependencyGraph::seal`] the graph is consumed concurrently through
//! [`DependencyGraph::wait_pop`] and [`DependencyGraph::consume`].

use crate::error::{SchedulerError, SchedulerResult};
use crate::tx_id::TxId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A transaction vertex
///
/// `out_edges` is frozen at seal; `in_degree` only decreases afterwards.
#[derive(Debug, Default)]
struct Vertex {
    /// Unfinished predecessors
    in_degree: AtomicUsize,
    /// Transactions that depend on this one
    out_edges: Vec<TxId>,
    /// Set once `consume` has run for this vertex
    consumed: AtomicBool,
}

/// Dependency graph for one block
#[derive(Debug)]
pub struct DependencyGraph {
    vertices: Vec<Vertex>,
    /// Vertices whose in-degree reached zero and that nobody claimed yet
    ready: Mutex<VecDeque<TxId>>,
    ready_cond: Condvar,
    consumed_count: AtomicUsize,
    edge_count: usize,
    sealed: bool,
    /// Set when execution failed; releases every waiter
    halted: AtomicBool,
}

impl DependencyGraph {
    /// Create a graph of `len` transactions with no edges
    pub fn new(len: usize) -> Self {
        Self {
            vertices: (0..len).map(|_| Vertex::default()).collect(),
            ready: Mutex::new(VecDeque::new()),
            ready_cond: Condvar::new(),
            consumed_count: AtomicUsize::new(0),
            edge_count: 0,
            sealed: false,
            halted: AtomicBool::new(false),
        }
    }

    /// Add a dependency edge: `from` must finish before `to` starts
    ///
    /// Edges must point from a lower id to a higher id, which keeps the graph
    /// acyclic by construction.
    pub fn add_edge(&mut self, from: TxId, to: TxId) -> SchedulerResult<()> {
        if self.sealed {
            return Err(SchedulerError::GraphSealed);
        }
        self.check_range(from)?;
        self.check_range(to)?;
        if from >= to {
            return Err(SchedulerError::BackwardEdge { from, to });
        }

        self.vertices[from.index()].out_edges.push(to);
        *self.vertices[to.index()].in_degree.get_mut() += 1;
        self.edge_count += 1;
        Ok(())
    }

    /// Freeze the edges and enqueue every vertex without predecessors
    ///
    /// Returns the number of initially ready transactions.
    pub fn seal(&mut self) -> SchedulerResult<usize> {
        if self.sealed {
            return Err(SchedulerError::GraphSealed);
        }
        if u32::try_from(self.vertices.len()).is_err() {
            return Err(SchedulerError::BlockTooLarge(self.vertices.len()));
        }
        self.sealed = true;

        let queue = self.ready.get_mut();
        for (idx, vertex) in self.vertices.iter_mut().enumerate() {
            if *vertex.in_degree.get_mut() == 0 {
                queue.push_back(TxId::try_from(idx)?);
            }
        }

        tracing::trace!(
            transactions = self.vertices.len(),
            edges = self.edge_count,
            ready = queue.len(),
            "dependency graph sealed"
        );
        Ok(queue.len())
    }

    /// Block until a transaction is ready or the graph is drained.
    ///
    /// Returns `None` once every transaction has been consumed, or after the
    /// graph was halted. Once that happens, every blocked and future caller
    /// returns `None` without waiting.
    pub fn wait_pop(&self) -> Option<TxId> {
        debug_assert!(self.sealed, "wait_pop on unsealed graph");
        if !self.sealed {
            return None;
        }

        let mut queue = self.ready.lock();
        loop {
            if self.is_halted() {
                return None;
            }
            if let Some(id) = queue.pop_front() {
                return Some(id);
            }
            if self.is_drained() {
                return None;
            }
            self.ready_cond.wait(&mut queue);
        }
    }

    /// Take a ready transaction without blocking
    pub fn try_pop(&self) -> Option<TxId> {
        if self.is_halted() {
            return None;
        }
        self.ready.lock().pop_front()
    }

    /// Mark `id` finished and release its dependents.
    ///
    /// The first dependent whose in-degree drops to zero is handed back to the
    /// caller instead of going through the queue; any further ones are
    /// enqueued. Consuming the same id twice is an integrity violation.
    pub fn consume(&self, id: TxId) -> SchedulerResult<Option<TxId>> {
        self.check_range(id)?;
        let vertex = &self.vertices[id.index()];
        if vertex.consumed.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::DoubleConsume(id));
        }

        let mut direct = None;
        let mut released = Vec::new();
        for &succ in &vertex.out_edges {
            let prev = self.vertices[succ.index()]
                .in_degree
                .fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "in-degree underflow at {succ}");
            if prev == 1 {
                if direct.is_none() {
                    direct = Some(succ);
                } else {
                    released.push(succ);
                }
            }
        }

        if !released.is_empty() {
            let count = released.len();
            self.ready.lock().extend(released);
            for _ in 0..count {
                self.ready_cond.notify_one();
            }
        }

        let consumed = self.consumed_count.fetch_add(1, Ordering::AcqRel) + 1;
        if consumed == self.vertices.len() {
            // take the lock so no waiter sits between its drained check and wait
            let _queue = self.ready.lock();
            self.ready_cond.notify_all();
        }

        Ok(direct)
    }

    /// Stop handing out work and wake every waiter
    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::Release);
        let _queue = self.ready.lock();
        self.ready_cond.notify_all();
    }

    /// Check if the graph was halted after a failure
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Check if every transaction has been consumed
    pub fn is_drained(&self) -> bool {
        self.consumed_count.load(Ordering::Acquire) == self.vertices.len()
    }

    /// Check if the graph has been sealed
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Get total number of transactions
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of transactions consumed so far
    pub fn consumed_count(&self) -> usize {
        self.consumed_count.load(Ordering::Acquire)
    }

    /// Get total number of dependency edges
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Current in-degree (unfinished predecessors) of a transaction
    pub fn in_degree(&self, id: TxId) -> usize {
        self.vertices
            .get(id.index())
            .map(|v| v.in_degree.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Transactions that depend on the given transaction
    pub fn dependents(&self, id: TxId) -> &[TxId] {
        self.vertices
            .get(id.index())
            .map(|v| v.out_edges.as_slice())
            .unwrap_or(&[])
    }

    /// All edges as `(from, to)` pairs, ordered by `from`
    pub fn edges(&self) -> Vec<(TxId, TxId)> {
        self.vertices
            .iter()
            .enumerate()
            .filter_map(|(idx, v)| TxId::try_from(idx).ok().map(|from| (from, v)))
            .flat_map(|(from, v)| v.out_edges.iter().map(move |to| (from, *to)))
            .collect()
    }

    /// Snapshot of the ready queue
    pub fn ready_ids(&self) -> Vec<TxId> {
        self.ready.lock().iter().copied().collect()
    }

    fn check_range(&self, id: TxId) -> SchedulerResult<()> {
        if id.index() < self.vertices.len() {
            Ok(())
        } else {
            Err(SchedulerError::TxOutOfRange {
                id,
                len: self.vertices.len(),
            })
        }
    }
}
