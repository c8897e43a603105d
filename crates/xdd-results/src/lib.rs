// SPDX-License-Identifier: Apache-2.0

//! Results aggregator (spec.md §4.10, component C11).
//!
//! Pure reduction: workers → target → run. Emission is a caller-supplied
//! callback carrying the full record, not formatted text (spec.md §4.10
//! "the row contract carries the full record, not formatted text") — CSV
//! or ASCII rendering is a collaborator's job (spec.md §1 Out of scope).

use xdd_types::timestamp::TimestampEntry;

/// Per-pass counters extracted from one worker (spec.md §4.10).
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerCounters {
    pub worker_number: u32,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub ops_completed: u64,
    pub errors: u64,
    pub earliest_start_ns: Option<u64>,
    pub latest_end_ns: Option<u64>,
    /// Sum of (disk_end - disk_start) over this worker's ops this pass, for
    /// the mean-latency reduction.
    pub op_elapsed_sum_ns: u64,
    pub cpu_user_ns: u64,
    pub cpu_system_ns: u64,
}

impl WorkerCounters {
    pub fn record_op(&mut self, entry: &TimestampEntry) {
        self.ops_completed += 1;
        self.bytes_read += if matches!(entry.op_type, xdd_types::timestamp::TsOpType::Read) { entry.bytes_xferred } else { 0 };
        self.bytes_written += if matches!(entry.op_type, xdd_types::timestamp::TsOpType::Write) { entry.bytes_xferred } else { 0 };
        self.earliest_start_ns = Some(self.earliest_start_ns.map_or(entry.disk_start, |s| s.min(entry.disk_start)));
        self.latest_end_ns = Some(self.latest_end_ns.map_or(entry.disk_end, |e| e.max(entry.disk_end)));
        self.op_elapsed_sum_ns += entry.disk_end.saturating_sub(entry.disk_start);
    }

    pub fn bytes_xferred(&self) -> u64 {
        self.bytes_read + self.bytes_written
    }
}

/// Reduced statistics for one target over one pass (spec.md §4.10 "Reduce
/// workers → target").
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetCounters {
    pub pass_number: u32,
    pub bytes_xferred: u64,
    pub ops_completed: u64,
    pub errors: u64,
    pub elapsed_ns: u64,
    pub bandwidth_bytes_per_sec: f64,
    pub mean_latency_ns: f64,
}

/// Reduced statistics across every target for the whole run (spec.md §4.10
/// "Reduce targets → run").
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounters {
    pub bytes_xferred: u64,
    pub ops_completed: u64,
    pub errors: u64,
    pub elapsed_ns: u64,
}

/// Reduce a pass's per-worker counters into one target-level row.
pub fn reduce_workers_to_target(pass_number: u32, workers: &[WorkerCounters]) -> TargetCounters {
    let bytes_xferred: u64 = workers.iter().map(|w| w.bytes_xferred()).sum();
    let ops_completed: u64 = workers.iter().map(|w| w.ops_completed).sum();
    let errors: u64 = workers.iter().map(|w| w.errors).sum();

    let earliest = workers.iter().filter_map(|w| w.earliest_start_ns).min();
    let latest = workers.iter().filter_map(|w| w.latest_end_ns).max();
    let elapsed_ns = match (earliest, latest) {
        (Some(a), Some(b)) => b.saturating_sub(a),
        _ => 0,
    };

    let bandwidth_bytes_per_sec = if elapsed_ns > 0 { bytes_xferred as f64 * 1e9 / elapsed_ns as f64 } else { 0.0 };

    let elapsed_sum: u64 = workers.iter().map(|w| w.op_elapsed_sum_ns).sum();
    let mean_latency_ns = if ops_completed > 0 { elapsed_sum as f64 / ops_completed as f64 } else { 0.0 };

    TargetCounters { pass_number, bytes_xferred, ops_completed, errors, elapsed_ns, bandwidth_bytes_per_sec, mean_latency_ns }
}

/// Reduce every target's final counters (summed over passes) into the
/// run-level row.
pub fn reduce_targets_to_run(targets: &[TargetCounters]) -> RunCounters {
    RunCounters {
        bytes_xferred: targets.iter().map(|t| t.bytes_xferred).sum(),
        ops_completed: targets.iter().map(|t| t.ops_completed).sum(),
        errors: targets.iter().map(|t| t.errors).sum(),
        elapsed_ns: targets.iter().map(|t| t.elapsed_ns).max().unwrap_or(0),
    }
}

/// One emitted row; the full record rather than formatted text (spec.md
/// §4.10).
#[derive(Debug, Clone)]
pub enum ResultRow {
    Worker { target_name: String, pass_number: u32, counters: WorkerCounters },
    Target { target_name: String, counters: TargetCounters },
    Run { counters: RunCounters },
}

/// Caller-supplied sink for result rows. A CSV/ASCII renderer or telemetry
/// exporter implements this; it is a collaborator, not part of the core
/// (spec.md §1).
pub trait ResultSink: Send + Sync {
    fn emit(&self, row: ResultRow);
}

/// A `ResultSink` that drops everything, used where reporting isn't wired up.
pub struct NullSink;

impl ResultSink for NullSink {
    fn emit(&self, _row: ResultRow) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdd_types::timestamp::TsOpType;

    fn entry(op_number: u64, op_type: TsOpType, start: u64, end: u64, bytes: u64) -> TimestampEntry {
        TimestampEntry { op_number, op_type, disk_start: start, disk_end: end, bytes_xferred: bytes, ..Default::default() }
    }

    #[test]
    fn worker_counters_accumulate_bytes_by_direction() {
        let mut w = WorkerCounters::default();
        w.record_op(&entry(0, TsOpType::Read, 0, 100, 4096));
        w.record_op(&entry(1, TsOpType::Write, 100, 250, 4096));
        assert_eq!(w.bytes_read, 4096);
        assert_eq!(w.bytes_written, 4096);
        assert_eq!(w.bytes_xferred(), 8192);
    }

    #[test]
    fn target_reduction_sums_bytes_and_spans_elapsed() {
        let mut w0 = WorkerCounters::default();
        w0.record_op(&entry(0, TsOpType::Read, 0, 100, 4096));
        let mut w1 = WorkerCounters::default();
        w1.record_op(&entry(1, TsOpType::Read, 50, 300, 4096));

        let target = reduce_workers_to_target(0, &[w0, w1]);
        assert_eq!(target.bytes_xferred, 8192);
        assert_eq!(target.ops_completed, 2);
        assert_eq!(target.elapsed_ns, 300); // max(end) - min(start) = 300 - 0
    }

    #[test]
    fn run_reduction_sums_targets_and_takes_max_elapsed() {
        let t0 = TargetCounters { bytes_xferred: 100, ops_completed: 1, errors: 0, elapsed_ns: 10, ..Default::default() };
        let t1 = TargetCounters { bytes_xferred: 200, ops_completed: 2, errors: 1, elapsed_ns: 30, ..Default::default() };
        let run = reduce_targets_to_run(&[t0, t1]);
        assert_eq!(run.bytes_xferred, 300);
        assert_eq!(run.ops_completed, 3);
        assert_eq!(run.errors, 1);
        assert_eq!(run.elapsed_ns, 30);
    }
}
