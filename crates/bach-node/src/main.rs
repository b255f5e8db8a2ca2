//! BachLedger parallel execution binary
//!
//! Generates blocks of token transfers, executes each one serially as the
//! reference and again through the configured executor, and verifies the
//! second run against the first run's roots.

mod cli;
mod config;
mod workload;

use anyhow::{Context, Result};
use bach_core::{BlockExecutionDriver, ExecutionMetrics, ExecutorConfig, MetricsSnapshot};
use cli::Cli;
use config::NodeConfig;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use workload::{block_rng, Ledger, RootCommitter};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    config.apply_cli(&cli);
    config.validate()?;

    tracing::info!(
        enable_parallel = config.executor.enable_parallel,
        workers = config.executor.worker_threads,
        blocks = config.workload.blocks,
        txs = config.workload.txs,
        "bachledger-dag starting"
    );

    let snapshot = run(&config)?;
    let json = if cli.compact {
        snapshot.to_json_compact()?
    } else {
        snapshot.to_json()?
    };
    println!("{json}");

    Ok(())
}

/// Execute and verify every configured block
fn run(config: &NodeConfig) -> Result<MetricsSnapshot> {
    let metrics = Arc::new(ExecutionMetrics::new());
    let reference = BlockExecutionDriver::new(ExecutorConfig::serial())?;
    let driver = BlockExecutionDriver::with_metrics(config.executor.clone(), Arc::clone(&metrics))?;

    let workload = &config.workload;
    let reference_ledger = Ledger::new(workload.accounts);
    let ledger = Ledger::new(workload.accounts);

    for block in 0..workload.blocks {
        let txs = ledger.generate_block(
            &mut block_rng(workload.seed, block),
            workload.txs,
            workload.accounts,
            workload.unknown_ratio,
        );

        let expected = reference
            .commit_block(&reference_ledger, &mut RootCommitter::new(&reference_ledger), &txs)
            .with_context(|| format!("reference execution of block {block}"))?
            .roots;

        let result = driver
            .verify_block(&ledger, &mut RootCommitter::new(&ledger), &txs, &expected)
            .with_context(|| format!("block {block}"))?;

        let reverted = result.outcomes.iter().filter(|r| !r.success).count();
        tracing::info!(
            block,
            roots = %result.roots,
            reverted,
            run_us = result.summary.run_us,
            "block verified"
        );
    }

    tracing::info!(supply = ledger.total_supply(), "all blocks verified");
    Ok(MetricsSnapshot::from_metrics(&metrics))
}
