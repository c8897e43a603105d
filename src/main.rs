// SPDX-License-Identifier: Apache-2.0

//! CLI entry point: wires a YAML run config into the engine and a logging
//! result sink (spec.md §6 "CLI surface (collaborator)": "the core consumes
//! only that struct"; ASCII/CSV pretty-printing is explicitly out of scope,
//! spec.md §1, so this sink only logs the structured row).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use xdd_results::{ResultRow, ResultSink};

/// I/O workload generator and benchmarking engine.
#[derive(Debug, Parser)]
#[command(name = "xdd", version, about)]
struct Cli {
    /// Path to a YAML run configuration.
    config: PathBuf,

    /// Override the number of passes from the config file.
    #[arg(long)]
    passes: Option<u32>,
}

/// Logs each result row as a structured `tracing` event rather than
/// rendering formatted text (spec.md §4.10 "the row contract carries the
/// full record, not formatted text"; a pretty-printer is a collaborator
/// this binary does not implement).
struct LoggingSink;

impl ResultSink for LoggingSink {
    fn emit(&self, row: ResultRow) {
        match row {
            ResultRow::Worker { target_name, pass_number, counters } => {
                tracing::info!(target_name, pass_number, ?counters, "worker row");
            }
            ResultRow::Target { target_name, counters } => {
                tracing::info!(
                    target_name,
                    pass_number = counters.pass_number,
                    bytes_xferred = counters.bytes_xferred,
                    ops_completed = counters.ops_completed,
                    errors = counters.errors,
                    elapsed_ns = counters.elapsed_ns,
                    bandwidth_bytes_per_sec = counters.bandwidth_bytes_per_sec,
                    mean_latency_ns = counters.mean_latency_ns,
                    "target row"
                );
            }
            ResultRow::Run { counters } => {
                tracing::info!(
                    bytes_xferred = counters.bytes_xferred,
                    ops_completed = counters.ops_completed,
                    errors = counters.errors,
                    elapsed_ns = counters.elapsed_ns,
                    "run row"
                );
            }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let mut run_config = match xdd_config::load_yaml(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(%err, path = %cli.config.display(), "configuration error");
            return ExitCode::from(1);
        }
    };
    if let Some(passes) = cli.passes {
        run_config.passes = passes.max(1);
    }

    let run = xdd_engine::Run::new(run_config);
    let abort = run.abort_flag();
    let signaled = Arc::new(AtomicBool::new(false));

    let signaled_for_handler = signaled.clone();
    let abort_for_handler = abort.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        signaled_for_handler.store(true, Ordering::SeqCst);
        abort_for_handler.set();
    }) {
        tracing::warn!(%err, "failed to install SIGINT handler");
    }

    let sink = LoggingSink;
    match run.execute(&sink) {
        Ok(outcome) if !outcome.aborted => {
            tracing::info!(run_id = %outcome.run_id, bytes_xferred = outcome.run.bytes_xferred, "run complete");
            ExitCode::from(0)
        }
        Ok(outcome) => {
            tracing::warn!(run_id = %outcome.run_id, "run aborted");
            if signaled.load(Ordering::SeqCst) {
                ExitCode::from(3)
            } else {
                ExitCode::from(2)
            }
        }
        Err(err) => {
            tracing::error!(%err, "run failed to start");
            ExitCode::from(1)
        }
    }
}
