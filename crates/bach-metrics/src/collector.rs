//! Execution metrics collector

use crate::LatencyHistogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How a block was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Dependency graph drained by one or more workers
    Parallel,
    /// Plain id-order loop, or the graph drained on the calling thread
    Serial,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Serial => write!(f, "serial"),
        }
    }
}

/// Figures for the most recently executed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Execution mode
    pub mode: ExecutionMode,
    /// Worker threads that drained the graph (0 for the calling thread)
    pub workers: usize,
    /// Transactions in the block
    pub transactions: usize,
    /// Dependency edges built
    pub edges: usize,
    /// Transactions with an unknown footprint
    pub unknown: usize,
    /// Graph build time
    pub build_us: u64,
    /// Execution time
    pub run_us: u64,
}

/// Counters and latency histograms for block execution
///
/// Shared between the driver and whoever reports on it; every recorder takes
/// `&self`.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    parallel_blocks: AtomicU64,
    serial_blocks: AtomicU64,
    failed_blocks: AtomicU64,
    transactions_executed: AtomicU64,
    dependency_edges: AtomicU64,
    unknown_footprints: AtomicU64,
    verification_failures: AtomicU64,
    graph_build: LatencyHistogram,
    graph_run: LatencyHistogram,
    last_block: Mutex<Option<BlockSummary>>,
}

impl ExecutionMetrics {
    /// Create an empty metrics store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a built dependency graph
    pub fn record_graph(&self, edges: usize, unknown: usize, elapsed: Duration) {
        self.dependency_edges.fetch_add(edges as u64, Ordering::Relaxed);
        self.unknown_footprints.fetch_add(unknown as u64, Ordering::Relaxed);
        self.graph_build.observe(elapsed);
    }

    /// Record a block that executed to completion
    pub fn record_block(&self, summary: BlockSummary) {
        match summary.mode {
            ExecutionMode::Parallel => self.parallel_blocks.fetch_add(1, Ordering::Relaxed),
            ExecutionMode::Serial => self.serial_blocks.fetch_add(1, Ordering::Relaxed),
        };
        self.transactions_executed
            .fetch_add(summary.transactions as u64, Ordering::Relaxed);
        self.graph_run.observe_micros(summary.run_us);

        tracing::trace!(mode = %summary.mode, transactions = summary.transactions, "block recorded");
        *self.last_block.lock() = Some(summary);
    }

    /// Record a block whose execution returned an error
    pub fn record_failed_block(&self) {
        self.failed_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a state or receipts root mismatch
    pub fn record_verification_failure(&self) {
        self.verification_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Blocks drained by worker threads
    pub fn parallel_blocks(&self) -> u64 {
        self.parallel_blocks.load(Ordering::Relaxed)
    }

    /// Blocks executed on the calling thread
    pub fn serial_blocks(&self) -> u64 {
        self.serial_blocks.load(Ordering::Relaxed)
    }

    /// Blocks that failed to execute
    pub fn failed_blocks(&self) -> u64 {
        self.failed_blocks.load(Ordering::Relaxed)
    }

    /// Transactions executed across all completed blocks
    pub fn transactions_executed(&self) -> u64 {
        self.transactions_executed.load(Ordering::Relaxed)
    }

    /// Dependency edges built across all blocks
    pub fn dependency_edges(&self) -> u64 {
        self.dependency_edges.load(Ordering::Relaxed)
    }

    /// Transactions that fell back to an unknown footprint
    pub fn unknown_footprints(&self) -> u64 {
        self.unknown_footprints.load(Ordering::Relaxed)
    }

    /// Root mismatches found while verifying
    pub fn verification_failures(&self) -> u64 {
        self.verification_failures.load(Ordering::Relaxed)
    }

    /// Graph build latency
    pub fn graph_build(&self) -> &LatencyHistogram {
        &self.graph_build
    }

    /// Block execution latency
    pub fn graph_run(&self) -> &LatencyHistogram {
        &self.graph_run
    }

    /// Summary of the last completed block
    pub fn last_block(&self) -> Option<BlockSummary> {
        self.last_block.lock().clone()
    }
}
