//! Latency histogram

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default bucket upper bounds in microseconds
const DEFAULT_BUCKETS_US: [u64; 12] = [
    10, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 50_000, 250_000, 1_000_000,
];

/// Histogram of durations in microseconds
///
/// Observations above the last bound land in a separate overflow bucket.
#[derive(Debug)]
pub struct LatencyHistogram {
    bounds: Vec<u64>,
    /// One count per bound plus the overflow bucket
    counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
    max: AtomicU64,
}

impl LatencyHistogram {
    /// Create histogram with default buckets
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_BUCKETS_US.to_vec())
    }

    /// Create histogram with custom bucket bounds (microseconds, ascending)
    pub fn with_bounds(mut bounds: Vec<u64>) -> Self {
        bounds.sort_unstable();
        bounds.dedup();
        let counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record a duration
    pub fn observe(&self, elapsed: Duration) {
        self.observe_micros(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    /// Record a value in microseconds
    pub fn observe_micros(&self, micros: u64) {
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(micros, Ordering::Relaxed);

        let bucket = self.bounds.partition_point(|bound| *bound < micros);
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Mean in microseconds, 0 when empty
    pub fn mean(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Largest observation
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Number of observations
    pub fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Upper bucket bound below which a `q` fraction of observations fall.
    ///
    /// Observations in the overflow bucket report the recorded maximum.
    pub fn quantile(&self, q: f64) -> u64 {
        let total = self.total_count();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;

        let mut seen = 0;
        for (idx, count) in self.counts.iter().enumerate() {
            seen += count.load(Ordering::Relaxed);
            if seen >= target {
                return self.bounds.get(idx).copied().unwrap_or_else(|| self.max());
            }
        }
        self.max()
    }

    /// Point-in-time summary for export
    pub fn summary(&self) -> HistogramSummary {
        HistogramSummary {
            count: self.total_count(),
            mean_us: self.mean(),
            p50_us: self.quantile(0.5),
            p99_us: self.quantile(0.99),
            max_us: self.max(),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Exported view of a [`LatencyHistogram`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Total observation count
    pub count: u64,
    /// Mean in microseconds
    pub mean_us: f64,
    /// Median bucket bound
    pub p50_us: u64,
    /// 99th percentile bucket bound
    pub p99_us: u64,
    /// Largest observation
    pub max_us: u64,
}
