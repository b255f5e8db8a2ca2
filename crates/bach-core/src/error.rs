//! Block execution error types

use crate::driver::BlockRoots;
use bach_scheduler::{BoxError, SchedulerError};
use thiserror::Error;

/// Block execution errors
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Graph construction or execution failed
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Worker pool could not be created
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// State committer rejected the outcomes
    #[error("commit failed: {0}")]
    Commit(#[source] BoxError),

    /// Recomputed roots differ from the block header
    #[error("bad state or receipt root: expected {expected}, got {actual}")]
    BadStateOrReceiptRoot {
        /// Roots carried by the block
        expected: BlockRoots,
        /// Roots recomputed locally
        actual: BlockRoots,
    },

    /// Invalid executor configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl ExecutionError {
    /// Transaction whose execution failed, if any
    pub fn failed_transaction(&self) -> Option<bach_scheduler::TxId> {
        match self {
            ExecutionError::Scheduler(
                SchedulerError::Execution { id, .. } | SchedulerError::Panicked { id, .. },
            ) => Some(*id),
            _ => None,
        }
    }
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;
