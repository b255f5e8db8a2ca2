//! Error types for the scheduler

use crate::tx_id::TxId;
use thiserror::Error;

/// Boxed error returned by an execute callback
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Edge endpoint outside the block
    #[error("transaction {id} out of range for block of {len}")]
    TxOutOfRange {
        /// Offending id
        id: TxId,
        /// Number of transactions in the block
        len: usize,
    },

    /// Edge that does not point from a lower id to a higher id
    #[error("backward dependency {from} -> {to}")]
    BackwardEdge {
        /// Predecessor
        from: TxId,
        /// Dependent
        to: TxId,
    },

    /// Graph and transaction batch disagree on block size
    #[error("graph has {graph} vertices but batch has {transactions} transactions")]
    SizeMismatch {
        /// Vertices in the graph
        graph: usize,
        /// Transactions in the batch
        transactions: usize,
    },

    /// Block has more transactions than `TxId` can number
    #[error("block of {0} transactions exceeds the transaction id space")]
    BlockTooLarge(usize),

    /// Graph mutated after seal
    #[error("dependency graph already sealed")]
    GraphSealed,

    /// Same transaction consumed twice
    #[error("transaction {0} consumed twice")]
    DoubleConsume(TxId),

    /// `execute_unit` called before an execute function was registered
    #[error("no execute function registered")]
    ExecuteFunctionMissing,

    /// Execute callback failed
    #[error("transaction {id} failed: {source}")]
    Execution {
        /// Failing transaction
        id: TxId,
        /// Error returned by the callback
        #[source]
        source: BoxError,
    },

    /// Execute callback panicked
    #[error("transaction {id} panicked: {message}")]
    Panicked {
        /// Panicking transaction
        id: TxId,
        /// Panic payload, if it was a string
        message: String,
    },

    /// Outcomes requested before every transaction executed
    #[error("block not finished: {executed} of {total} executed")]
    Unfinished {
        /// Transactions consumed so far
        executed: usize,
        /// Transactions in the block
        total: usize,
    },
}

impl SchedulerError {
    /// Returns true for errors that indicate a defect in graph construction
    /// rather than a failure of the executed transaction.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            SchedulerError::TxOutOfRange { .. }
                | SchedulerError::BackwardEdge { .. }
                | SchedulerError::GraphSealed
                | SchedulerError::SizeMismatch { .. }
                | SchedulerError::DoubleConsume(_)
        )
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
