//! # bach-core
//!
//! Block execution for BachLedger.
//!
//! This crate ties the scheduler to the rest of the ledger:
//! - Contract conflict policy deriving per-transaction footprints
//! - Block execution driver (serial, or parallel over a worker pool)
//! - State commit and header root verification
//! - Executor configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod conflict;
mod driver;
mod error;

pub use config::{ExecutorConfig, MAX_WORKER_THREADS};
pub use conflict::{
    Address, ConflictKey, ContractCall, ParallelPolicy, Selector, SELECTOR_SIZE, WORD_SIZE,
};
pub use driver::{
    BlockExecutionDriver, BlockExecutionResult, BlockRoots, ExecutedBlock, StateCommitter,
    TransactionExecutor,
};
pub use error::{ExecutionError, ExecutionResult};

pub use bach_metrics::{ExecutionMetrics, ExecutionMode, MetricsSnapshot};
pub use bach_scheduler::{ConflictFootprint, SchedulerError, TxId};
