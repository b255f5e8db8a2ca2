//! # bach-scheduler
//!
//! DAG-based parallel transaction scheduling for BachLedger.
//!
//! A block of ordered transactions is turned into a dependency graph over
//! transaction ids. Workers then drain that graph concurrently, and the
//! result is identical to executing the block one transaction at a time in
//! block order.
//!
//! Features:
//! - Conflict key tracking with a global barrier for unknown footprints
//! - Dependency graph with atomic in-degrees and a blocking ready queue
//! - Single-pass graph construction from per-transaction footprints
//! - Parallel scheduler driven by any number of workers (including zero)

#![warn(missing_docs)]
#![warn(clippy::all)]

mod builder;
mod dependency;
mod error;
mod scheduler;
mod tracker;
mod tx_id;

pub use builder::GraphBuilder;
pub use dependency::DependencyGraph;
pub use error::{BoxError, SchedulerError, SchedulerResult};
pub use scheduler::ParallelScheduler;
pub use tracker::ConflictKeyTracker;
pub use tx_id::{ConflictFootprint, TxId};
