// SPDX-License-Identifier: Apache-2.0

//! Run orchestrator (spec.md §4.11, component C12).
//!
//! One thread per target, each owning its [`xdd_target::TargetController`]
//! for the life of the run. The orchestrator's own thread does nothing but
//! rendezvous at the shared barriers and fold the per-pass results every
//! target thread reports back over a channel (spec.md §4.10 "Results
//! aggregator" folded in here rather than as a separate OS thread, since the
//! reduction itself is a handful of pure functions in `xdd-results`; see
//! DESIGN.md).

pub mod error;
pub mod watchdog;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use xdd_barrier::{Barrier, BarrierRegistry, OccupantKind};
use xdd_clock::Clock;
use xdd_config::RunConfig;
use xdd_results::{reduce_targets_to_run, ResultRow, ResultSink, RunCounters, TargetCounters};
use xdd_target::TargetController;
use xdd_types::AbortFlag;

pub use error::Error;
use watchdog::Watchdog;

/// Everything the orchestrator produced, once every target has shut down.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub targets: Vec<(String, TargetCounters)>,
    pub run: RunCounters,
    pub aborted: bool,
}

struct TargetThread {
    name: String,
    join: JoinHandle<bool>,
}

/// Top-level run handle (spec.md §4.11). Owns the abort flag and barrier
/// registry for the whole run; `Run::execute` is the entire orchestration
/// sequence described in spec.md §4.11 steps 1-5.
pub struct Run {
    config: RunConfig,
    clock: Clock,
    abort: AbortFlag,
    registry: Arc<BarrierRegistry>,
}

impl Run {
    pub fn new(config: RunConfig) -> Self {
        Run { config, clock: Clock::new(), abort: AbortFlag::new(), registry: Arc::new(BarrierRegistry::new()) }
    }

    /// The abort flag driving this run; a caller installs a signal handler
    /// that calls `.set()` on a clone of this (spec.md §5 "Cancellation
    /// semantics": "the signal handler's only job is to set it").
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Run every pass to completion (or until aborted) and reduce the
    /// results, emitting one `ResultRow` per target per pass plus a final
    /// run row through `sink` (spec.md §4.10 "caller-supplied row
    /// callback").
    pub fn execute(self, sink: &dyn ResultSink) -> Result<RunOutcome, Error> {
        let Run { config, clock, abort, registry } = self;
        let num_targets = config.targets.len();

        let total_workers: usize = config.targets.iter().map(|t| t.queue_depth.max(1)).sum();
        let init_barrier = Arc::new(Barrier::new("init", total_workers + num_targets + 1, clock.clone(), abort.clone()));
        let pass_start = Arc::new(Barrier::new("pass-start", num_targets + 1, clock.clone(), abort.clone()));
        let pass_complete = Arc::new(Barrier::new("pass-complete", num_targets + 1, clock.clone(), abort.clone()));
        let final_barrier = Arc::new(Barrier::new("final", num_targets + 1, clock.clone(), abort.clone()));
        registry.register(init_barrier.clone());
        registry.register(pass_start.clone());
        registry.register(pass_complete.clone());
        registry.register(final_barrier.clone());

        let watchdog = Watchdog::spawn(registry.clone(), Duration::from_secs(5), abort.clone());

        let (result_tx, result_rx) = mpsc::channel::<(String, u32, TargetCounters)>();

        let mut threads = Vec::with_capacity(num_targets);
        for target_config in config.targets {
            let name = target_config.name.clone();
            let clock = clock.clone();
            let abort = abort.clone();
            let init_barrier = init_barrier.clone();
            let pass_start = pass_start.clone();
            let pass_complete = pass_complete.clone();
            let final_barrier = final_barrier.clone();
            let result_tx = result_tx.clone();
            let run_id = config.run_id.clone();
            let passes = config.passes;
            let gts_delta_ns = config.gts_delta_ns;
            let thread_name = name.clone();

            let join = thread::Builder::new()
                .name(format!("xdd-target-{name}"))
                .spawn(move || run_target(target_config, run_id, passes, gts_delta_ns, clock, abort, init_barrier, pass_start, pass_complete, final_barrier, result_tx))
                .map_err(|source| Error::SpawnTarget { target: thread_name.clone(), source })?;
            threads.push(TargetThread { name: thread_name, join });
        }

        let _ = init_barrier.enter("main", OccupantKind::Main);
        tracing::info!(run_id = %config.run_id, targets = num_targets, passes = config.passes, "run initialized");

        let mut target_rows: Vec<(String, TargetCounters)> = Vec::new();
        for pass in 0..config.passes {
            if pass > 0 {
                if let Some(delay) = non_zero(config.pass_delay) {
                    thread::sleep(delay);
                }
            }
            if abort.is_set() {
                break;
            }
            let _ = pass_start.enter("main", OccupantKind::Main);
            let _ = pass_complete.enter("main", OccupantKind::Main);

            let mut this_pass = Vec::with_capacity(num_targets);
            while let Ok((name, pass_number, counters)) = result_rx.try_recv() {
                if pass_number == pass {
                    this_pass.push((name, counters));
                }
            }
            for (name, counters) in &this_pass {
                sink.emit(ResultRow::Target { target_name: name.clone(), counters: *counters });
            }
            target_rows.extend(this_pass);
        }

        let _ = final_barrier.enter("main", OccupantKind::Main);

        let mut succeeded = true;
        for t in threads {
            match t.join.join() {
                Ok(ok) => succeeded &= ok,
                Err(_) => {
                    succeeded = false;
                    tracing::error!(target = %t.name, "target thread panicked");
                }
            }
        }

        drop(watchdog);
        registry.destroy_all();

        let final_per_target: Vec<TargetCounters> = reduce_final_per_target(&target_rows, num_targets);
        let run_counters = reduce_targets_to_run(&final_per_target);
        sink.emit(ResultRow::Run { counters: run_counters });

        Ok(RunOutcome { run_id: config.run_id, targets: target_rows, run: run_counters, aborted: abort.is_set() || !succeeded })
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

/// Fold every pass's per-target row into one final counters-per-target
/// list, summing bytes/ops/errors and taking the largest elapsed span, the
/// way a multi-pass run's final report rolls up (spec.md §4.10 "Reduce
/// targets -> run" generalized across passes first).
fn reduce_final_per_target(rows: &[(String, TargetCounters)], num_targets: usize) -> Vec<TargetCounters> {
    let mut by_name: std::collections::HashMap<&str, TargetCounters> = std::collections::HashMap::with_capacity(num_targets);
    for (name, counters) in rows {
        let entry = by_name.entry(name.as_str()).or_insert(TargetCounters { pass_number: counters.pass_number, ..Default::default() });
        entry.bytes_xferred += counters.bytes_xferred;
        entry.ops_completed += counters.ops_completed;
        entry.errors += counters.errors;
        entry.elapsed_ns += counters.elapsed_ns;
    }
    by_name.into_values().collect()
}

/// Body of one target's dedicated thread: build its controller, enter init,
/// then drive passes in lockstep with the orchestrator via the shared
/// barriers, reporting each pass's counters back over `result_tx`. Returns
/// whether the target finished without a fatal error.
#[allow(clippy::too_many_arguments)]
fn run_target(
    config: xdd_types::TargetConfig,
    run_id: String,
    passes: u32,
    gts_delta_ns: i64,
    clock: Clock,
    abort: AbortFlag,
    init_barrier: Arc<Barrier>,
    pass_start: Arc<Barrier>,
    pass_complete: Arc<Barrier>,
    final_barrier: Arc<Barrier>,
    result_tx: mpsc::Sender<(String, u32, TargetCounters)>,
) -> bool {
    let name = config.name.clone();
    let mut controller = match TargetController::build(config, &run_id, passes, gts_delta_ns, clock, abort.clone(), init_barrier.clone()) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(target = %name, %err, "failed to build target");
            abort.set();
            let _ = init_barrier.enter(format!("target-{name}"), OccupantKind::Target);
            let _ = final_barrier.enter(format!("target-{name}"), OccupantKind::Target);
            return false;
        }
    };
    let _ = init_barrier.enter(format!("target-{name}"), OccupantKind::Target);

    let mut ok = true;
    for pass_number in 0..passes {
        let _ = pass_start.enter(name.clone(), OccupantKind::Target);
        if abort.is_set() {
            let _ = pass_complete.enter(name.clone(), OccupantKind::Target);
            break;
        }
        match controller.run_pass(pass_number) {
            Ok(counters) => {
                let _ = result_tx.send((name.clone(), pass_number, counters));
            }
            Err(err) => {
                tracing::error!(target = %name, pass = pass_number, %err, "target pass failed");
                ok = false;
            }
        }
        let _ = pass_complete.enter(name.clone(), OccupantKind::Target);
        if abort.is_set() {
            break;
        }
    }

    if let Err(err) = controller.shutdown(ok && !abort.is_set()) {
        tracing::error!(target = %name, %err, "target shutdown failed");
        ok = false;
    }
    let _ = final_barrier.enter(format!("target-{name}"), OccupantKind::Target);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use xdd_types::config::{OrderingMode, SeekPattern, TargetConfig, Throttle};

    struct CollectingSink {
        rows: Mutex<Vec<ResultRow>>,
    }

    impl ResultSink for CollectingSink {
        fn emit(&self, row: ResultRow) {
            self.rows.lock().unwrap().push(row);
        }
    }

    fn local_target(dir: &std::path::Path, name: &str) -> TargetConfig {
        TargetConfig {
            name: name.into(),
            path: dir.join(format!("{name}.bin")),
            reqsize: 4,
            block_size: 4096,
            queue_depth: 2,
            rwratio: 0.0,
            start_offset: 0,
            pass_offset: 0,
            numreqs: Some(8),
            total_bytes: None,
            seek: SeekPattern::Sequential { range: None },
            throttle: Throttle::None,
            ordering: OrderingMode::None,
            e2e: None,
            restart: None,
            direct_io: false,
            max_errors: 0,
            stop_on_error: false,
            timestamp: None,
            processor_pin: None,
        }
    }

    #[test]
    fn single_pass_single_target_run_completes_and_emits_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            run_id: "test-run".into(),
            passes: 1,
            pass_delay: Duration::ZERO,
            gts_delta_ns: 0,
            targets: vec![local_target(dir.path(), "t0")],
        };
        let run = Run::new(config);
        let sink = CollectingSink { rows: Mutex::new(Vec::new()) };
        let outcome = run.execute(&sink).unwrap();

        assert!(!outcome.aborted);
        assert_eq!(outcome.targets.len(), 1);
        assert_eq!(outcome.run.bytes_xferred, 8 * 4 * 4096);

        let rows = sink.rows.lock().unwrap();
        assert!(rows.iter().any(|r| matches!(r, ResultRow::Target { .. })));
        assert!(rows.iter().any(|r| matches!(r, ResultRow::Run { .. })));
    }

    #[test]
    fn multi_target_run_reduces_bytes_across_targets() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            run_id: "multi".into(),
            passes: 1,
            pass_delay: Duration::ZERO,
            gts_delta_ns: 0,
            targets: vec![local_target(dir.path(), "a"), local_target(dir.path(), "b")],
        };
        let run = Run::new(config);
        let sink = CollectingSink { rows: Mutex::new(Vec::new()) };
        let outcome = run.execute(&sink).unwrap();

        assert_eq!(outcome.targets.len(), 2);
        assert_eq!(outcome.run.bytes_xferred, 2 * 8 * 4 * 4096);
    }

    #[test]
    fn two_passes_accumulate_bytes_in_the_final_run_row() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            run_id: "two-pass".into(),
            passes: 2,
            pass_delay: Duration::ZERO,
            gts_delta_ns: 0,
            targets: vec![local_target(dir.path(), "t0")],
        };
        let run = Run::new(config);
        let sink = CollectingSink { rows: Mutex::new(Vec::new()) };
        let outcome = run.execute(&sink).unwrap();

        assert_eq!(outcome.targets.len(), 2); // one row per pass
        assert_eq!(outcome.run.bytes_xferred, 2 * 8 * 4 * 4096);
    }
}
