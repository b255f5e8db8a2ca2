//! Executor configuration

use crate::error::{ExecutionError, ExecutionResult};
use serde::{Deserialize, Serialize};

/// Upper bound on worker threads accepted by [`ExecutorConfig::validate`]
pub const MAX_WORKER_THREADS: usize = 512;

/// Block executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Build a dependency graph and execute through the scheduler.
    /// When false, transactions run one by one in block order.
    #[serde(default = "default_enable_parallel")]
    pub enable_parallel: bool,
    /// Worker threads draining the graph; 0 drains it on the calling thread
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_enable_parallel() -> bool {
    true
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enable_parallel: default_enable_parallel(),
            worker_threads: default_worker_threads(),
        }
    }
}

impl ExecutorConfig {
    /// Plain block-order execution, no graph
    pub fn serial() -> Self {
        Self {
            enable_parallel: false,
            worker_threads: 0,
        }
    }

    /// Graph execution with `workers` threads
    pub fn with_workers(workers: usize) -> Self {
        Self {
            enable_parallel: true,
            worker_threads: workers,
        }
    }

    /// Worker threads the driver will actually spawn
    pub fn effective_workers(&self) -> usize {
        if self.enable_parallel {
            self.worker_threads
        } else {
            0
        }
    }

    /// Check the configuration
    pub fn validate(&self) -> ExecutionResult<()> {
        if self.worker_threads > MAX_WORKER_THREADS {
            return Err(ExecutionError::InvalidConfig(format!(
                "worker_threads {} exceeds {}",
                self.worker_threads, MAX_WORKER_THREADS
            )));
        }
        Ok(())
    }
}
