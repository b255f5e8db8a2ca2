//! Metrics snapshot and JSON export

use crate::{BlockSummary, ExecutionMetrics, HistogramSummary};
use serde::{Deserialize, Serialize};

/// Block counts by outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockCounts {
    /// Blocks drained by worker threads
    pub parallel: u64,
    /// Blocks executed on the calling thread
    pub serial: u64,
    /// Blocks that failed
    pub failed: u64,
}

/// Snapshot of all execution metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Block counts
    pub blocks: BlockCounts,
    /// Transactions executed
    pub transactions_executed: u64,
    /// Dependency edges built
    pub dependency_edges: u64,
    /// Unknown-footprint fallbacks
    pub unknown_footprints: u64,
    /// Root mismatches
    pub verification_failures: u64,
    /// Graph build latency
    pub graph_build: HistogramSummary,
    /// Block execution latency
    pub graph_run: HistogramSummary,
    /// Last completed block
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_block: Option<BlockSummary>,
}

impl MetricsSnapshot {
    /// Create a snapshot from an [`ExecutionMetrics`] instance
    pub fn from_metrics(metrics: &ExecutionMetrics) -> Self {
        Self {
            blocks: BlockCounts {
                parallel: metrics.parallel_blocks(),
                serial: metrics.serial_blocks(),
                failed: metrics.failed_blocks(),
            },
            transactions_executed: metrics.transactions_executed(),
            dependency_edges: metrics.dependency_edges(),
            unknown_footprints: metrics.unknown_footprints(),
            verification_failures: metrics.verification_failures(),
            graph_build: metrics.graph_build().summary(),
            graph_run: metrics.graph_run().summary(),
            last_block: metrics.last_block(),
        }
    }

    /// Export snapshot as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export snapshot as compact JSON string
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
