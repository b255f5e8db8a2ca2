//! Block execution driver
//!
//! Builds the dependency graph for a block, drains it with the configured
//! worker pool and hands the outcomes to the state committer.

use crate::config::ExecutorConfig;
use crate::error::{ExecutionError, ExecutionResult};
use bach_metrics::{timed, BlockSummary, ExecutionMetrics, ExecutionMode};
use bach_scheduler::{
    ConflictFootprint, GraphBuilder, ParallelScheduler, SchedulerError, SchedulerResult, TxId,
};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Executes single transactions and derives their conflict footprints
///
/// `execute` may be called from any worker thread. It is only called once
/// every conflicting transaction earlier in the block has returned.
pub trait TransactionExecutor: Sync {
    /// Transaction type
    type Transaction: Sync;
    /// Conflict key type
    type Key: Eq + Hash + Clone + Send;
    /// Per-transaction result, e.g. a receipt
    type Outcome: Send + Sync;
    /// Execution error
    type Error: std::error::Error + Send + Sync + 'static;

    /// Conflict footprint of a transaction
    fn criticals(&self, tx: &Self::Transaction) -> ConflictFootprint<Self::Key>;

    /// Execute one transaction
    fn execute(&self, tx: &Self::Transaction, id: TxId) -> Result<Self::Outcome, Self::Error>;
}

/// Turns a block's outcomes into state and receipts roots
pub trait StateCommitter<O> {
    /// Commit error
    type Error: std::error::Error + Send + Sync + 'static;

    /// Commit outcomes in block order and return the resulting roots
    fn commit(&mut self, outcomes: &[O]) -> Result<BlockRoots, Self::Error>;
}

/// Header fields recomputed after execution
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRoots {
    /// State root
    pub state_root: [u8; 32],
    /// Receipts root
    pub receipts_root: [u8; 32],
}

impl BlockRoots {
    /// Create from the two roots
    pub fn new(state_root: [u8; 32], receipts_root: [u8; 32]) -> Self {
        Self {
            state_root,
            receipts_root,
        }
    }
}

impl fmt::Display for BlockRoots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state=0x{} receipts=0x{}",
            hex::encode(self.state_root),
            hex::encode(self.receipts_root)
        )
    }
}

impl fmt::Debug for BlockRoots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRoots({self})")
    }
}

/// Outcomes of an executed block
#[derive(Debug, Clone)]
pub struct ExecutedBlock<O> {
    /// Per-transaction outcomes in block order
    pub outcomes: Vec<O>,
    /// Execution figures
    pub summary: BlockSummary,
}

/// Outcomes and roots of a committed block
#[derive(Debug, Clone)]
pub struct BlockExecutionResult<O> {
    /// Per-transaction outcomes in block order
    pub outcomes: Vec<O>,
    /// Roots after commit
    pub roots: BlockRoots,
    /// Execution figures
    pub summary: BlockSummary,
}

/// Block execution driver
pub struct BlockExecutionDriver {
    config: ExecutorConfig,
    /// Present when at least one worker thread is configured
    pool: Option<ThreadPool>,
    metrics: Arc<ExecutionMetrics>,
}

impl BlockExecutionDriver {
    /// Create a driver with its own metrics
    pub fn new(config: ExecutorConfig) -> ExecutionResult<Self> {
        Self::with_metrics(config, Arc::new(ExecutionMetrics::new()))
    }

    /// Create a driver recording into shared metrics
    pub fn with_metrics(
        config: ExecutorConfig,
        metrics: Arc<ExecutionMetrics>,
    ) -> ExecutionResult<Self> {
        config.validate()?;

        let workers = config.effective_workers();
        let pool = if workers > 0 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("bach-exec-{i}"))
                    .build()?,
            )
        } else {
            None
        };

        tracing::info!(
            enable_parallel = config.enable_parallel,
            workers,
            "block execution driver created"
        );
        Ok(Self {
            config,
            pool,
            metrics,
        })
    }

    /// Driver configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Worker threads draining each block
    pub fn workers(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.current_num_threads())
    }

    /// Metrics shared with this driver
    pub fn metrics(&self) -> &Arc<ExecutionMetrics> {
        &self.metrics
    }

    /// Execute a block and return its outcomes in block order
    pub fn execute_block<E: TransactionExecutor>(
        &self,
        executor: &E,
        transactions: &[E::Transaction],
    ) -> ExecutionResult<ExecutedBlock<E::Outcome>> {
        let result = if self.config.enable_parallel {
            self.execute_graph(executor, transactions)
        } else {
            self.execute_in_order(executor, transactions)
        };

        match result {
            Ok(block) => {
                tracing::info!(
                    mode = %block.summary.mode,
                    workers = block.summary.workers,
                    transactions = block.summary.transactions,
                    edges = block.summary.edges,
                    build_us = block.summary.build_us,
                    run_us = block.summary.run_us,
                    "block executed"
                );
                self.metrics.record_block(block.summary.clone());
                Ok(block)
            }
            Err(err) => {
                tracing::error!(error = %err, "block execution failed");
                self.metrics.record_failed_block();
                Err(err)
            }
        }
    }

    /// Execute a block and commit its outcomes
    pub fn commit_block<E, C>(
        &self,
        executor: &E,
        committer: &mut C,
        transactions: &[E::Transaction],
    ) -> ExecutionResult<BlockExecutionResult<E::Outcome>>
    where
        E: TransactionExecutor,
        C: StateCommitter<E::Outcome>,
    {
        let block = self.execute_block(executor, transactions)?;
        let roots = committer
            .commit(&block.outcomes)
            .map_err(|e| ExecutionError::Commit(Box::new(e)))?;

        tracing::debug!(%roots, "block committed");
        Ok(BlockExecutionResult {
            outcomes: block.outcomes,
            roots,
            summary: block.summary,
        })
    }

    /// Execute and commit a received block, then check its header roots.
    ///
    /// A mismatch is fatal to the block and is not retried here.
    pub fn verify_block<E, C>(
        &self,
        executor: &E,
        committer: &mut C,
        transactions: &[E::Transaction],
        expected: &BlockRoots,
    ) -> ExecutionResult<BlockExecutionResult<E::Outcome>>
    where
        E: TransactionExecutor,
        C: StateCommitter<E::Outcome>,
    {
        let result = self.commit_block(executor, committer, transactions)?;
        if result.roots != *expected {
            tracing::error!(
                expected = %expected,
                actual = %result.roots,
                "bad state or receipt root"
            );
            self.metrics.record_verification_failure();
            return Err(ExecutionError::BadStateOrReceiptRoot {
                expected: *expected,
                actual: result.roots,
            });
        }
        Ok(result)
    }

    fn execute_graph<E: TransactionExecutor>(
        &self,
        executor: &E,
        transactions: &[E::Transaction],
    ) -> ExecutionResult<ExecutedBlock<E::Outcome>> {
        let (graph, build_time) = timed!({
            let footprints: Vec<ConflictFootprint<E::Key>> = match &self.pool {
                Some(pool) => pool.install(|| {
                    transactions
                        .par_iter()
                        .map(|tx| executor.criticals(tx))
                        .collect()
                }),
                None => transactions.iter().map(|tx| executor.criticals(tx)).collect(),
            };
            let unknown = footprints.iter().filter(|f| !f.is_known()).count();
            GraphBuilder::from_footprints(footprints).map(|graph| (graph, unknown))
        });
        let (graph, unknown) = graph?;
        let edges = graph.edge_count();
        self.metrics.record_graph(edges, unknown, build_time);

        let mut scheduler = ParallelScheduler::new(graph, transactions)?;
        scheduler.set_execute_function(|tx, id| executor.execute(tx, id));

        let (drained, run_time) = timed!({ self.drain(&scheduler) });
        drained?;

        let workers = self.workers();
        let outcomes = scheduler.into_outcomes()?;
        Ok(ExecutedBlock {
            summary: BlockSummary {
                mode: if workers > 0 {
                    ExecutionMode::Parallel
                } else {
                    ExecutionMode::Serial
                },
                workers,
                transactions: outcomes.len(),
                edges,
                unknown,
                build_us: micros(build_time),
                run_us: micros(run_time),
            },
            outcomes,
        })
    }

    /// Run `execute_unit` until the graph drains or a worker fails
    fn drain<T, O>(&self, scheduler: &ParallelScheduler<'_, T, O>) -> SchedulerResult<usize>
    where
        T: Sync,
        O: Send + Sync,
    {
        let Some(pool) = &self.pool else {
            let mut executed = 0;
            while !scheduler.has_finished() && !scheduler.has_failed() {
                executed += scheduler.execute_unit()?;
            }
            return Ok(executed);
        };

        let per_worker = pool.broadcast(|ctx| {
            let mut executed = 0;
            while !scheduler.has_finished() && !scheduler.has_failed() {
                executed += scheduler.execute_unit()?;
            }
            tracing::trace!(worker = ctx.index(), executed, "worker done");
            Ok::<_, SchedulerError>(executed)
        });

        per_worker.into_iter().sum()
    }

    fn execute_in_order<E: TransactionExecutor>(
        &self,
        executor: &E,
        transactions: &[E::Transaction],
    ) -> ExecutionResult<ExecutedBlock<E::Outcome>> {
        let (outcomes, run_time) = timed!({
            transactions
                .iter()
                .enumerate()
                .map(|(idx, tx)| {
                    let id = TxId::try_from(idx)?;
                    tracing::trace!(%id, "executing transaction");
                    executor.execute(tx, id).map_err(|e| SchedulerError::Execution {
                        id,
                        source: Box::new(e),
                    })
                })
                .collect::<SchedulerResult<Vec<_>>>()
        });
        let outcomes = outcomes?;

        Ok(ExecutedBlock {
            summary: BlockSummary {
                mode: ExecutionMode::Serial,
                workers: 0,
                transactions: outcomes.len(),
                edges: 0,
                unknown: 0,
                build_us: 0,
                run_us: micros(run_time),
            },
            outcomes,
        })
    }
}

fn micros(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, thiserror::Error)]
    #[error("account {0} overdrawn")]
    struct Overdrawn(u8);

    /// Moves `amount` from one account to another; `None` footprint for
    /// transactions flagged as opaque
    struct Transfer {
        from: u8,
        to: u8,
        amount: u64,
        opaque: bool,
    }

    struct Ledger {
        balances: Mutex<HashMap<u8, u64>>,
    }

    impl Ledger {
        fn new() -> Self {
            Self {
                balances: Mutex::new((0..16).map(|a| (a, 100)).collect()),
            }
        }
    }

    impl TransactionExecutor for Ledger {
        type Transaction = Transfer;
        type Key = u8;
        type Outcome = u64;
        type Error = Overdrawn;

        fn criticals(&self, tx: &Transfer) -> ConflictFootprint<u8> {
            if tx.opaque {
                ConflictFootprint::Unknown
            } else {
                ConflictFootprint::Known(vec![tx.from, tx.to])
            }
        }

        fn execute(&self, tx: &Transfer, _id: TxId) -> Result<u64, Overdrawn> {
            let mut balances = self.balances.lock();
            let from = balances.get(&tx.from).copied().unwrap_or(0);
            if from < tx.amount {
                return Err(Overdrawn(tx.from));
            }
            balances.insert(tx.from, from - tx.amount);
            *balances.entry(tx.to).or_insert(0) += tx.amount;
            Ok(balances[&tx.to])
        }
    }

    struct SumCommitter;

    impl StateCommitter<u64> for SumCommitter {
        type Error = std::io::Error;

        fn commit(&mut self, outcomes: &[u64]) -> Result<BlockRoots, std::io::Error> {
            let mut receipts_root = [0u8; 32];
            for (i, outcome) in outcomes.iter().enumerate() {
                receipts_root[i % 32] ^= *outcome as u8;
            }
            Ok(BlockRoots::new([outcomes.len() as u8; 32], receipts_root))
        }
    }

    fn transfers() -> Vec<Transfer> {
        (0..64u8)
            .map(|i| Transfer {
                from: i % 16,
                to: (i * 7 + 3) % 16,
                amount: u64::from(i % 5) + 1,
                opaque: i % 13 == 0,
            })
            .collect()
    }

    #[test]
    fn test_parallel_matches_in_order() {
        let txs = transfers();
        let serial = BlockExecutionDriver::new(ExecutorConfig::serial())
            .unwrap()
            .execute_block(&Ledger::new(), &txs)
            .unwrap();
        let parallel = BlockExecutionDriver::new(ExecutorConfig::with_workers(4))
            .unwrap()
            .execute_block(&Ledger::new(), &txs)
            .unwrap();

        assert_eq!(serial.outcomes, parallel.outcomes);
        assert_eq!(serial.summary.mode, ExecutionMode::Serial);
        assert_eq!(parallel.summary.mode, ExecutionMode::Parallel);
        assert_eq!(parallel.summary.workers, 4);
        assert_eq!(parallel.summary.unknown, 5);
    }

    #[test]
    fn test_zero_workers_drains_on_caller() {
        let txs = transfers();
        let driver = BlockExecutionDriver::new(ExecutorConfig::with_workers(0)).unwrap();
        assert_eq!(driver.workers(), 0);

        let block = driver.execute_block(&Ledger::new(), &txs).unwrap();
        assert_eq!(block.outcomes.len(), txs.len());
        assert_eq!(block.summary.mode, ExecutionMode::Serial);
        assert!(block.summary.edges > 0);
        assert_eq!(driver.metrics().serial_blocks(), 1);
    }

    #[test]
    fn test_verify_block_rejects_bad_roots() {
        let txs = transfers();
        let driver = BlockExecutionDriver::new(ExecutorConfig::with_workers(2)).unwrap();
        let committed = driver
            .commit_block(&Ledger::new(), &mut SumCommitter, &txs)
            .unwrap();

        let verified = driver
            .verify_block(&Ledger::new(), &mut SumCommitter, &txs, &committed.roots)
            .unwrap();
        assert_eq!(verified.roots, committed.roots);

        let bad = BlockRoots::new(committed.roots.state_root, [0xff; 32]);
        let err = driver
            .verify_block(&Ledger::new(), &mut SumCommitter, &txs, &bad)
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::BadStateOrReceiptRoot { expected, actual }
                if expected == bad && actual == committed.roots
        ));
        assert_eq!(driver.metrics().verification_failures(), 1);
    }

    #[test]
    fn test_execution_error_fails_block() {
        let txs = vec![
            Transfer { from: 0, to: 1, amount: 60, opaque: false },
            Transfer { from: 0, to: 2, amount: 60, opaque: false },
        ];
        let driver = BlockExecutionDriver::new(ExecutorConfig::with_workers(2)).unwrap();
        let err = driver.execute_block(&Ledger::new(), &txs).unwrap_err();

        assert_eq!(err.failed_transaction(), Some(TxId::new(1)));
        assert_eq!(driver.metrics().failed_blocks(), 1);
        assert_eq!(driver.metrics().parallel_blocks(), 0);
    }

    #[test]
    fn test_in_order_error_names_transaction() {
        let txs = vec![Transfer { from: 3, to: 1, amount: 1_000, opaque: true }];
        let driver = BlockExecutionDriver::new(ExecutorConfig::serial()).unwrap();
        let err = driver.execute_block(&Ledger::new(), &txs).unwrap_err();
        assert_eq!(err.failed_transaction(), Some(TxId::new(0)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BlockExecutionDriver::new(ExecutorConfig::with_workers(10_000));
        assert!(matches!(result, Err(ExecutionError::InvalidConfig(_))));
    }
}
