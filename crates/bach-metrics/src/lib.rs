//! # bach-metrics
//!
//! Execution metrics for BachLedger's block executor.
//!
//! Features:
//! - Block, transaction and dependency edge counters
//! - Latency histograms for graph build and execution
//! - JSON export

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collector;
mod export;
mod histogram;

pub use collector::{BlockSummary, ExecutionMetrics, ExecutionMode};
pub use export::{BlockCounts, MetricsSnapshot};
pub use histogram::{HistogramSummary, LatencyHistogram};

/// Time a block of code, evaluating to `(result, elapsed)`
#[macro_export]
macro_rules! timed {
    ($block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        (result, start.elapsed())
    }};
}
