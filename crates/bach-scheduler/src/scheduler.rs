//! Parallel scheduler implementation
//!
//! Wraps a sealed dependency graph and runs an execute callback over the
//! block in dependency order. Any number of workers may call
//! [`ParallelScheduler::execute_unit`] concurrently.

use crate::dependency::DependencyGraph;
use crate::error::{BoxError, SchedulerError, SchedulerResult};
use crate::tx_id::TxId;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

type ExecuteFn<'a, T, O> = Box<dyn Fn(&T, TxId) -> Result<O, BoxError> + Send + Sync + 'a>;

/// Parallel Scheduler
///
/// Owns the dependency graph for one block. The scheduler only decides
/// *when* the execute callback may start: every predecessor's call has
/// returned before a transaction's own call begins. State mutation is left
/// to the callback.
pub struct ParallelScheduler<'a, T, O> {
    graph: DependencyGraph,
    transactions: &'a [T],
    execute: Option<ExecuteFn<'a, T, O>>,
    /// Written once per transaction, read after the block finished
    outcomes: Vec<OnceLock<O>>,
    failed: AtomicBool,
}

impl<'a, T, O> ParallelScheduler<'a, T, O>
where
    T: Sync,
    O: Send + Sync,
{
    /// Create a scheduler over `transactions`, sealing the graph if needed
    pub fn new(mut graph: DependencyGraph, transactions: &'a [T]) -> SchedulerResult<Self> {
        if graph.len() != transactions.len() {
            return Err(SchedulerError::SizeMismatch {
                graph: graph.len(),
                transactions: transactions.len(),
            });
        }
        if !graph.is_sealed() {
            graph.seal()?;
        }

        Ok(Self {
            outcomes: (0..graph.len()).map(|_| OnceLock::new()).collect(),
            graph,
            transactions,
            execute: None,
            failed: AtomicBool::new(false),
        })
    }

    /// Register the callback that executes a single transaction
    pub fn set_execute_function<F, E>(&mut self, f: F)
    where
        F: Fn(&T, TxId) -> Result<O, E> + Send + Sync + 'a,
        E: Into<BoxError>,
    {
        self.execute = Some(Box::new(move |tx, id| f(tx, id).map_err(Into::into)));
    }

    /// Execute ready transactions until the graph is drained.
    ///
    /// Blocks while other workers hold the only runnable transactions. A
    /// dependent released by a finished transaction runs next on the same
    /// worker. Returns how many transactions this call executed.
    ///
    /// An error or panic from the callback halts the graph: other workers
    /// stop picking up work, including successors they were about to chain,
    /// and the error is returned to this caller. Nothing is rolled back.
    pub fn execute_unit(&self) -> SchedulerResult<usize> {
        let execute = self
            .execute
            .as_ref()
            .ok_or(SchedulerError::ExecuteFunctionMissing)?;

        let mut executed = 0;
        while let Some(first) = self.graph.wait_pop() {
            let mut next = Some(first);
            while let Some(id) = next {
                if self.graph.is_halted() {
                    tracing::trace!(%id, "graph halted, dropping chained transaction");
                    break;
                }
                self.run(execute, id)?;
                executed += 1;
                next = self.graph.consume(id).map_err(|e| self.fail(e))?;
                if let Some(successor) = next {
                    tracing::trace!(%id, %successor, "chaining released successor");
                }
            }
        }

        tracing::trace!(executed, "worker drained");
        Ok(executed)
    }

    fn run(&self, execute: &ExecuteFn<'a, T, O>, id: TxId) -> SchedulerResult<()> {
        let tx = &self.transactions[id.index()];
        tracing::trace!(%id, "executing transaction");

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| execute(tx, id))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(source)) => {
                tracing::warn!(%id, error = %source, "transaction execution failed");
                return Err(self.fail(SchedulerError::Execution { id, source }));
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::error!(%id, %message, "transaction execution panicked");
                return Err(self.fail(SchedulerError::Panicked { id, message }));
            }
        };

        if self.outcomes[id.index()].set(outcome).is_err() {
            return Err(self.fail(SchedulerError::DoubleConsume(id)));
        }
        Ok(())
    }

    fn fail(&self, err: SchedulerError) -> SchedulerError {
        self.failed.store(true, Ordering::Release);
        self.graph.halt();
        err
    }

    /// True once every transaction has been executed and consumed
    pub fn has_finished(&self) -> bool {
        self.graph.is_drained()
    }

    /// True once any worker hit an error
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Number of transactions in the block
    pub fn total_count(&self) -> usize {
        self.graph.len()
    }

    /// Number of transactions executed so far
    pub fn executed_count(&self) -> usize {
        self.graph.consumed_count()
    }

    /// The underlying dependency graph
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Per-transaction outcomes in block order
    pub fn into_outcomes(self) -> SchedulerResult<Vec<O>> {
        if !self.has_finished() {
            return Err(SchedulerError::Unfinished {
                executed: self.executed_count(),
                total: self.total_count(),
            });
        }

        let total = self.graph.len();
        self.outcomes
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.into_inner()
                    .ok_or(SchedulerError::Unfinished { executed: idx, total })
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::tx_id::ConflictFootprint;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn scheduler_for<'a>(
        criticals: &'a [Option<Vec<&'static str>>],
    ) -> ParallelScheduler<'a, Option<Vec<&'static str>>, u32> {
        let graph = GraphBuilder::<&str>::build(criticals, |c| c.clone()).unwrap();
        ParallelScheduler::new(graph, criticals).unwrap()
    }

    #[test]
    fn test_empty_block_finishes_immediately() {
        let txs: Vec<Option<Vec<&str>>> = Vec::new();
        let mut scheduler = scheduler_for(&txs);
        scheduler.set_execute_function(|_, id| Ok::<_, BoxError>(id.as_u32()));

        assert!(scheduler.has_finished());
        assert_eq!(scheduler.execute_unit().unwrap(), 0);
        assert!(scheduler.into_outcomes().unwrap().is_empty());
    }

    #[test]
    fn test_missing_execute_function() {
        let txs = vec![Some(vec!["a"])];
        let scheduler = scheduler_for(&txs);
        assert!(matches!(
            scheduler.execute_unit(),
            Err(SchedulerError::ExecuteFunctionMissing)
        ));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let txs = vec![1u8, 2, 3];
        let graph = DependencyGraph::new(2);
        let result = ParallelScheduler::<u8, ()>::new(graph, &txs);
        assert!(matches!(
            result,
            Err(SchedulerError::SizeMismatch {
                graph: 2,
                transactions: 3
            })
        ));
    }

    #[test]
    fn test_serial_worker_runs_every_transaction_once() {
        let txs = vec![Some(vec!["a"]), None, Some(vec!["a"]), Some(vec!["b"]), None];
        let mut scheduler = scheduler_for(&txs);
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&order);
        scheduler.set_execute_function(move |_, id| {
            recorder.lock().push(id.as_u32());
            Ok::<_, BoxError>(id.as_u32() * 10)
        });

        let mut executed = 0;
        while !scheduler.has_finished() {
            executed += scheduler.execute_unit().unwrap();
        }

        assert_eq!(executed, 5);
        assert_eq!(scheduler.executed_count(), scheduler.total_count());
        let order = order.lock().clone();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], 0);
        assert_eq!(order[1], 1);
        assert_eq!(order[4], 4);
        assert_eq!(scheduler.into_outcomes().unwrap(), vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn test_direct_successor_runs_on_same_call() {
        // a straight chain never touches the queue after the first pop
        let txs = vec![Some(vec!["a"]); 6];
        let mut scheduler = scheduler_for(&txs);
        scheduler.set_execute_function(|_, id| Ok::<_, BoxError>(id.as_u32()));

        assert_eq!(scheduler.execute_unit().unwrap(), 6);
        assert!(scheduler.has_finished());
    }

    #[test]
    fn test_execution_error_propagates_and_halts() {
        let txs = vec![Some(vec!["a"]), Some(vec!["a"]), Some(vec!["a"])];
        let mut scheduler = scheduler_for(&txs);
        scheduler.set_execute_function(|_, id| {
            if id.as_u32() == 1 {
                Err("boom")
            } else {
                Ok(id.as_u32())
            }
        });

        let err = scheduler.execute_unit().unwrap_err();
        assert!(matches!(err, SchedulerError::Execution { id, .. } if id == TxId::new(1)));
        assert!(scheduler.has_failed());
        assert!(!scheduler.has_finished());
        assert_eq!(scheduler.executed_count(), 1);

        // halted: later calls return without running anything
        assert_eq!(scheduler.execute_unit().unwrap(), 0);
        assert!(matches!(
            scheduler.into_outcomes(),
            Err(SchedulerError::Unfinished { executed: 1, total: 3 })
        ));
    }

    #[test]
    fn test_failure_releases_blocked_workers() {
        // 0 fails while every other worker waits on its dependents
        let txs = vec![Some(vec!["a"]); 4];
        let mut scheduler = scheduler_for(&txs);
        scheduler.set_execute_function(|_, id| {
            thread::sleep(std::time::Duration::from_millis(20));
            if id.as_u32() == 0 {
                Err("boom")
            } else {
                Ok(id.as_u32())
            }
        });

        let scheduler = &scheduler;
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(move || scheduler.execute_unit())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert!(scheduler.has_failed());
    }

    #[test]
    fn test_panic_releases_blocked_workers() {
        // 0 panics while the other worker waits on the rest of the chain
        let txs = vec![Some(vec!["a"]); 4];
        let mut scheduler = scheduler_for(&txs);
        scheduler.set_execute_function(|_, id| {
            if id.as_u32() == 0 {
                thread::sleep(std::time::Duration::from_millis(20));
                panic!("balance underflow");
            }
            Ok::<_, BoxError>(id.as_u32())
        });

        let scheduler = &scheduler;
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..2).map(|_| s.spawn(move || scheduler.execute_unit())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            SchedulerError::Panicked { id, message } if *id == TxId::new(0) && message == "balance underflow"
        ));
        assert!(scheduler.has_failed());
        assert!(!scheduler.has_finished());
        assert_eq!(scheduler.executed_count(), 0);
    }

    #[test]
    fn test_halt_stops_chained_successors() {
        // 0 fails on one worker while the other is running the "a" chain
        let txs = vec![
            Some(vec!["b"]),
            Some(vec!["a"]),
            Some(vec!["a"]),
            Some(vec!["a"]),
            Some(vec!["a"]),
        ];
        let mut scheduler = scheduler_for(&txs);
        let chain_started = Arc::new(AtomicBool::new(false));
        let failing = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let chain_started = Arc::clone(&chain_started);
            let failing = Arc::clone(&failing);
            let calls = Arc::clone(&calls);
            scheduler.set_execute_function(move |_, id| {
                calls.fetch_add(1, Ordering::SeqCst);
                match id.as_u32() {
                    0 => {
                        while !chain_started.load(Ordering::SeqCst) {
                            thread::yield_now();
                        }
                        failing.store(true, Ordering::SeqCst);
                        Err("boom")
                    }
                    1 => {
                        chain_started.store(true, Ordering::SeqCst);
                        while !failing.load(Ordering::SeqCst) {
                            thread::yield_now();
                        }
                        thread::sleep(std::time::Duration::from_millis(50));
                        Ok(1)
                    }
                    n => Ok(n),
                }
            });
        }

        let scheduler = &scheduler;
        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(move || scheduler.execute_unit());
            }
        });

        assert!(scheduler.has_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.executed_count(), 1);
    }

    #[test]
    fn test_predecessors_finish_before_dependents_start() {
        // alternating hot key and independent keys
        let txs: Vec<Option<Vec<String>>> = (0..200)
            .map(|i| match i % 7 {
                0 => None,
                1 | 2 => Some(vec!["hot".to_string()]),
                _ => Some(vec![format!("k{}", i % 13)]),
            })
            .collect();
        let graph = GraphBuilder::<String>::build(&txs, |c| c.clone()).unwrap();
        let edges = graph.edges();

        let mut scheduler = ParallelScheduler::new(graph, &txs).unwrap();
        let finished: Arc<Vec<AtomicBool>> =
            Arc::new((0..txs.len()).map(|_| AtomicBool::new(false)).collect());
        let violations = Arc::new(AtomicUsize::new(0));
        let preds: Arc<Vec<Vec<usize>>> = Arc::new({
            let mut preds = vec![Vec::new(); txs.len()];
            for (from, to) in &edges {
                preds[to.index()].push(from.index());
            }
            preds
        });

        {
            let finished = Arc::clone(&finished);
            let violations = Arc::clone(&violations);
            let preds = Arc::clone(&preds);
            scheduler.set_execute_function(move |_, id| {
                if preds[id.index()]
                    .iter()
                    .any(|p| !finished[*p].load(Ordering::Acquire))
                {
                    violations.fetch_add(1, Ordering::Relaxed);
                }
                finished[id.index()].store(true, Ordering::Release);
                Ok::<_, BoxError>(())
            });
        }

        let scheduler = &scheduler;
        let total: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(move || scheduler.execute_unit().unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(total, txs.len());
        assert!(scheduler.has_finished());
        assert_eq!(violations.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_footprint_type_is_accepted_directly() {
        let txs = vec![
            ConflictFootprint::Known(vec![1u64]),
            ConflictFootprint::Unknown,
        ];
        let graph = GraphBuilder::<u64>::build(&txs, |c| c.clone()).unwrap();
        let mut scheduler = ParallelScheduler::new(graph, &txs).unwrap();
        scheduler.set_execute_function(|tx, _| Ok::<_, BoxError>(tx.is_known()));

        scheduler.execute_unit().unwrap();
        assert_eq!(scheduler.into_outcomes().unwrap(), vec![true, false]);
    }
}
