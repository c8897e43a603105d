// SPDX-License-Identifier: Apache-2.0

//! Target controller (spec.md §4.7, component C8).
//!
//! Owns one target's worker pool, timestamp ring, and target offset table.
//! Per pass it builds (or reuses) the seek list, dispatches tasks to
//! whichever worker `acquire_worker` selects, and folds the pool's per-pass
//! counters once every worker has reported `pass_complete`.

pub mod error;

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use xdd_barrier::{Barrier, OccupantKind};
use xdd_buffer::BufferHandle;
use xdd_clock::Clock;
use xdd_restart::{CommittedOffsetTracker, RestartMonitor};
use xdd_results::{reduce_workers_to_target, TargetCounters, WorkerCounters};
use xdd_seek::SeekList;
use xdd_timestamp::TimestampRing;
use xdd_tot::TargetOffsetTable;
use xdd_types::config::{E2ERole, OrderingMode, TargetConfig, Throttle};
use xdd_types::restart::{RestartFlags, RestartRecord};
use xdd_types::task::{IoTask, OpType, Task};
use xdd_types::timestamp::TimestampHeader;
use xdd_types::{AbortFlag, WorkerFlags, WrapPolicy};
use xdd_worker::{E2EChannel, Worker, WorkerReport};

pub use error::Error;

/// One worker's control handles, as seen by its target controller.
struct WorkerSlot {
    task_tx: Sender<Task>,
    report_rx: Receiver<WorkerReport>,
    state: Arc<xdd_types::worker_state::WorkerState>,
    this_available: Arc<xdd_worker::Semaphore>,
    join: Option<JoinHandle<()>>,
    counters: WorkerCounters,
}

/// Controller for one target: builds its worker pool once, then drives one
/// pass at a time (spec.md §4.7).
pub struct TargetController {
    config: TargetConfig,
    clock: Clock,
    abort: AbortFlag,
    workers: Vec<WorkerSlot>,
    any_available: Arc<xdd_worker::Semaphore>,
    workers_complete: Arc<Barrier>,
    ring: Arc<TimestampRing>,
    tot: Arc<TargetOffsetTable>,
    error_count: Mutex<u64>,
    offset_tracker: Option<Arc<CommittedOffsetTracker>>,
    restart_monitor: Option<RestartMonitor>,
    restart_record: Option<RestartRecord>,
    pattern_seed: u64,
    effective_total_bytes: u64,
}

impl TargetController {
    /// Build the target's worker pool and shared structures. `total_passes`
    /// sizes the timestamp ring when its wrap policy is `Unbounded` (spec.md
    /// §4.4: "pre-sized to passes * target_ops; never wraps").
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        config: TargetConfig,
        run_id: &str,
        total_passes: u32,
        gts_delta_ns: i64,
        clock: Clock,
        abort: AbortFlag,
        init_barrier: Arc<Barrier>,
    ) -> Result<Self, Error> {
        let mut config = config;
        let queue_depth = config.queue_depth.max(1);
        let iosize = config.iosize();

        let mut effective_total_bytes = config.target_bytes();
        let offset_tracker = config.restart.as_ref().map(|_| Arc::new(CommittedOffsetTracker::new(iosize)));
        let mut restart_record = None;

        if let (Some(restart_cfg), Some(e2e_cfg)) = (config.restart.clone(), config.e2e.clone()) {
            if restart_cfg.resume && restart_cfg.path.exists() {
                let record = xdd_restart::file::read(&restart_cfg.path)?;
                let (resume_offset_blocks, remaining) = xdd_restart::resume_geometry(&record, config.block_size, effective_total_bytes);
                config.start_offset = resume_offset_blocks;
                effective_total_bytes = remaining;
                tracing::info!(target = %config.name, resume_offset_blocks, remaining, "resuming from restart file");
            }
            let mut record = RestartRecord::new("localhost".into(), config.path.display().to_string(), "localhost".into(), config.path.display().to_string());
            record.flags = match e2e_cfg.role {
                E2ERole::Source => RestartFlags::IS_SOURCE,
                E2ERole::Destination => RestartFlags::empty(),
            };
            restart_record = Some(record);
        }

        let wrap_policy = config.timestamp.as_ref().map(|t| t.wrap).unwrap_or(WrapPolicy::Unbounded);
        let target_ops_per_pass = config.target_ops(effective_total_bytes);
        let table_size = match wrap_policy {
            WrapPolicy::Unbounded => target_ops_per_pass.saturating_mul(total_passes as u64).max(1),
            WrapPolicy::OneShot | WrapPolicy::Wrap => (target_ops_per_pass * 2).max(queue_depth as u64 * xdd_tot::DEFAULT_K as u64),
        };
        let header = TimestampHeader {
            run_id: run_id.to_string(),
            target_name: config.name.clone(),
            block_size: config.block_size,
            iosize,
            queue_depth: queue_depth as u32,
            clock_resolution_ns: 1,
            gts_delta_ns,
            table_size,
            wrap_policy,
        };
        let ring = Arc::new(TimestampRing::new(header));
        let tot = Arc::new(TargetOffsetTable::new(queue_depth));
        // Every worker starts idle, so both the pool-wide and per-worker
        // availability semaphores start with one permit per worker already
        // posted (spec.md §4.6: "A worker is available iff BUSY = 0").
        let any_available = Arc::new(xdd_worker::Semaphore::new(queue_depth));
        let workers_complete = Arc::new(Barrier::new(format!("{}-pass-complete", config.name), queue_depth + 1, clock.clone(), abort.clone()));
        let pattern_seed = config.name.bytes().fold(0u64, |acc, b| acc.wrapping_mul(131).wrapping_add(b as u64));

        let mut workers = Vec::with_capacity(queue_depth);
        for n in 0..queue_depth {
            let wire = match &config.e2e {
                Some(e2e_cfg) => Some(build_channel(e2e_cfg, n, &config.name)?),
                None => None,
            };
            let (task_tx, task_rx) = mpsc::channel();
            let (report_tx, report_rx) = mpsc::channel();
            let this_available = Arc::new(xdd_worker::Semaphore::new(1));
            let state = Arc::new(xdd_types::worker_state::WorkerState::new());
            let buffer = BufferHandle::owned(iosize as usize, config.direct_io)?;

            let worker = Worker::new(
                n,
                config.name.clone(),
                config.path.clone(),
                config.direct_io,
                pattern_seed,
                state.clone(),
                buffer,
                clock.clone(),
                ring.clone(),
                tot.clone(),
                config.ordering,
                wire,
                iosize,
                task_rx,
                report_tx,
                any_available.clone(),
                this_available.clone(),
                workers_complete.clone(),
                init_barrier.clone(),
                abort.clone(),
            )
            .map_err(|source| Error::BuildWorker { target: config.name.clone(), worker_number: n, source })?;

            let join = xdd_worker::spawn(worker, &config.name, n)
                .map_err(|source| Error::SpawnWorker { target: config.name.clone(), worker_number: n, source })?;

            workers.push(WorkerSlot { task_tx, report_rx, state, this_available, join: Some(join), counters: WorkerCounters::default() });
        }

        let restart_monitor = match (&config.restart, &offset_tracker, &restart_record) {
            (Some(restart_cfg), Some(tracker), Some(record)) => Some(RestartMonitor::spawn(
                restart_cfg.path.clone(),
                tracker.clone(),
                record.clone(),
                restart_cfg.frequency,
                clock.clone(),
                abort.clone(),
            )),
            _ => None,
        };

        Ok(TargetController {
            config,
            clock,
            abort,
            workers,
            any_available,
            workers_complete,
            ring,
            tot,
            error_count: Mutex::new(0),
            offset_tracker,
            restart_monitor,
            restart_record,
            pattern_seed,
            effective_total_bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn timestamps(&self) -> &Arc<TimestampRing> {
        &self.ring
    }

    /// Run one pass: seek-list build, dispatch loop, drain, fold (spec.md
    /// §4.7). The caller (the run orchestrator, C12) has already released
    /// this target at the pass-start barrier and will wait on the
    /// pass-complete barrier after every target returns.
    pub fn run_pass(&mut self, pass_number: u32) -> Result<TargetCounters, Error> {
        let is_destination = matches!(&self.config.e2e, Some(e2e) if e2e.role == E2ERole::Destination);

        if is_destination {
            self.run_destination_pass(pass_number);
        } else {
            self.run_dispatch_pass(pass_number);
        }

        self.finish_pass();

        let per_worker: Vec<WorkerCounters> = self.workers.iter().map(|w| w.counters).collect();
        let target_counters = reduce_workers_to_target(pass_number, &per_worker);
        for w in self.workers.iter_mut() {
            w.counters = WorkerCounters::default();
        }

        self.check_error_budget(target_counters)
    }

    fn run_dispatch_pass(&mut self, pass_number: u32) {
        let target_ops = self.config.target_ops(self.effective_total_bytes);
        let seek_list = SeekList::generate(&self.config, pass_number, target_ops);
        let iosize = self.config.iosize();
        let pass_clock_start = self.clock.now();
        let queue_depth = self.workers.len();

        let mut op_number = 0u64;
        while op_number < target_ops {
            if self.abort.is_set() {
                break;
            }
            let idx = self.acquire_worker(op_number);
            self.drain_pending(idx);

            let entry = &seek_list.entries[op_number as usize];
            self.throttle_wait(entry, pass_clock_start);

            let length = iosize.min(self.effective_total_bytes.saturating_sub(op_number * iosize));
            let ts_slot = self.ring.claim();
            let predecessor_worker = match self.config.ordering {
                OrderingMode::None => None,
                OrderingMode::Strict | OrderingMode::Loose => Some((op_number as usize) % queue_depth.max(1)),
            };
            let task = Task::Io(IoTask {
                op_type: entry.op_type,
                byte_location: entry.byte_location,
                length,
                op_number,
                pass_number,
                ts_slot,
                predecessor_worker,
                scheduled_time: if entry.scheduled_time_ns > 0 { Some(Duration::from_nanos(entry.scheduled_time_ns)) } else { None },
            });

            if self.workers[idx].task_tx.send(task).is_err() {
                break;
            }
            op_number += 1;
        }

        if matches!(&self.config.e2e, Some(e2e) if e2e.role == E2ERole::Source) {
            for idx in 0..self.workers.len() {
                self.drain_pending(idx);
                let _ = self.workers[idx].task_tx.send(Task::EofSend);
            }
        }
    }

    /// Availability-driven destination loop (spec.md §4.7 "E2E destination
    /// extension"): keep issuing receive-driven `Io` tasks to whichever
    /// worker is free until every worker has observed `EOF_RECEIVED`.
    ///
    /// Each destination worker owns a dedicated connection to the source
    /// worker at the same index (spec.md §4.8 "Connection setup"), and the
    /// source dispatches ops to its workers round-robin by `op_number %
    /// queue_depth` (`acquire_worker`, E2E source case), so worker `idx`'s
    /// connection carries exactly the global ops `idx, idx + queue_depth,
    /// idx + 2*queue_depth, ...` in that order. Tracking a per-worker local
    /// count and reconstructing the global op number from it (rather than a
    /// single pool-wide counter) is what lets `verify_data_frame` check the
    /// frame this specific worker actually expects next (spec.md §8).
    fn run_destination_pass(&mut self, pass_number: u32) {
        let iosize = self.config.iosize();
        let queue_depth = self.workers.len().max(1) as u64;
        let mut local_counts = vec![0u64; self.workers.len()];

        loop {
            if self.all_workers_eof() || self.abort.is_set() {
                break;
            }
            self.any_available.wait(&self.abort);
            // `first_available_worker` already excludes EOF_RECEIVED workers
            // (WorkerFlags::is_available), so whatever it returns here is
            // still mid-transfer.
            let Some(idx) = self.first_available_worker() else { continue };
            self.workers[idx].state.set(WorkerFlags::BUSY);
            self.drain_pending(idx);

            let op_number = idx as u64 + local_counts[idx] * queue_depth;
            local_counts[idx] += 1;

            // Claiming a ring slot here (before the worker knows whether
            // this dispatch turns out to be the EOF frame) would over-claim
            // by one per worker every pass; the worker claims its own slot
            // once it confirms a real DATA frame (spec.md §4.4).
            let task = Task::Io(IoTask {
                op_type: OpType::Write,
                byte_location: op_number * iosize,
                length: iosize,
                op_number,
                pass_number,
                ts_slot: None,
                predecessor_worker: None,
                scheduled_time: None,
            });
            if self.workers[idx].task_tx.send(task).is_err() {
                break;
            }
        }
    }

    /// Send `END_OF_PASS` to every worker and drain each one's remaining
    /// reports (at most one leftover `Io` report followed by
    /// `PassComplete`), then enter the per-target workers-complete barrier
    /// (spec.md §4.6/§4.7 "wait at targetpass_workers_complete barrier").
    fn finish_pass(&mut self) {
        for w in &self.workers {
            let _ = w.task_tx.send(Task::EndOfPass);
        }
        for idx in 0..self.workers.len() {
            loop {
                match self.workers[idx].report_rx.recv() {
                    Ok(WorkerReport::PassComplete) => break,
                    Ok(report) => self.handle_report(idx, report),
                    Err(_) => break,
                }
            }
        }
        let _ = self.workers_complete.enter(self.config.name.clone(), OccupantKind::Target);
    }

    /// Pick the worker for the next dispatch. Under `None` ordering this
    /// also marks the chosen worker `BUSY` immediately, before returning to
    /// the caller: the scan and the claim happen on this single dispatch
    /// thread, so nothing else can pick the same idle worker in between
    /// (the worker's own `BUSY` set on task receipt is then a no-op).
    ///
    /// An E2E source always dispatches round-robin by `op_number %
    /// queue_depth`, regardless of the configured ordering: the destination
    /// pairs each of its workers with the source worker at the same index
    /// (spec.md §4.8) and has no other way to know which global op numbers
    /// will arrive on which connection (spec.md §8).
    fn acquire_worker(&mut self, op_number: u64) -> usize {
        let is_e2e_source = matches!(&self.config.e2e, Some(e2e) if e2e.role == E2ERole::Source);
        match self.config.ordering {
            OrderingMode::None if !is_e2e_source => {
                self.any_available.wait(&self.abort);
                let idx = self.first_available_worker().unwrap_or(0);
                self.workers[idx].state.set(WorkerFlags::BUSY);
                idx
            }
            _ => {
                let idx = (op_number as usize) % self.workers.len().max(1);
                self.workers[idx].this_available.wait(&self.abort);
                idx
            }
        }
    }

    fn first_available_worker(&self) -> Option<usize> {
        self.workers.iter().position(|w| w.state.load().is_available())
    }

    fn all_workers_eof(&self) -> bool {
        self.workers.iter().all(|w| w.state.load().contains(WorkerFlags::EOF_RECEIVED))
    }

    /// Drain at most one pending report from a worker we are about to
    /// re-dispatch to. Safe to call unconditionally: the worker posts its
    /// availability semaphore only after sending its report, so there is
    /// never more than one outstanding (spec.md §4.6 dispatch ordering).
    fn drain_pending(&mut self, idx: usize) {
        if let Ok(report) = self.workers[idx].report_rx.try_recv() {
            self.handle_report(idx, report);
        }
    }

    fn handle_report(&mut self, idx: usize, report: WorkerReport) {
        match report {
            WorkerReport::Completed(outcome) => {
                self.workers[idx].counters.record_op(&outcome.timestamp_entry(idx as u32));
                if let Some(tracker) = &self.offset_tracker {
                    tracker.mark_committed(outcome.op_number);
                }
            }
            WorkerReport::EofReceived | WorkerReport::Acked | WorkerReport::PassComplete | WorkerReport::Stopped => {}
            WorkerReport::Failed(err) => {
                self.workers[idx].counters.errors += 1;
                *self.error_count.lock().unwrap() += 1;
                tracing::warn!(target = %self.config.name, worker = idx, error = %err, "worker op failed");
            }
        }
    }

    fn throttle_wait(&self, entry: &xdd_types::SeekEntry, pass_clock_start: u64) {
        match self.config.throttle {
            Throttle::None => {}
            Throttle::FixedDelay { delay } => std::thread::sleep(delay),
            Throttle::Ops { .. } | Throttle::Bandwidth { .. } => {
                let elapsed = self.clock.now().saturating_sub(pass_clock_start);
                if entry.scheduled_time_ns > elapsed {
                    std::thread::sleep(Duration::from_nanos(entry.scheduled_time_ns - elapsed));
                }
            }
        }
    }

    fn check_error_budget(&self, target_counters: TargetCounters) -> Result<TargetCounters, Error> {
        let errors = *self.error_count.lock().unwrap();
        let over_max = self.config.max_errors > 0 && errors > self.config.max_errors;
        let stop_now = self.config.stop_on_error && errors > 0;
        if over_max || stop_now {
            self.abort.set();
            return Err(Error::MaxErrorsExceeded { target: self.config.name.clone(), errors, max_errors: self.config.max_errors });
        }
        Ok(target_counters)
    }

    /// Stop every worker, join their threads, and finish the restart
    /// monitor if one is running (spec.md §4.9 "on successful run
    /// completion, SUCCESSFUL_COMPLETION is set").
    pub fn shutdown(mut self, successful: bool) -> Result<(), Error> {
        for w in &self.workers {
            let _ = w.task_tx.send(Task::Stop);
        }
        for w in self.workers.iter_mut() {
            if let Some(join) = w.join.take() {
                let _ = join.join();
            }
        }
        if let (Some(monitor), Some(record)) = (self.restart_monitor.take(), self.restart_record.take()) {
            if let Some(restart_cfg) = self.config.restart.clone() {
                let committed = self.offset_tracker.as_ref().map(|t| t.highest_contiguous_byte_offset()).unwrap_or(0);
                monitor.finish(&restart_cfg.path, record, committed, successful)?;
            }
        }
        Ok(())
    }
}

fn build_channel(e2e_cfg: &xdd_types::config::E2EConfig, worker_index: usize, target_name: &str) -> Result<E2EChannel, Error> {
    match e2e_cfg.role {
        E2ERole::Source => {
            let peer = e2e_cfg
                .peers
                .get(worker_index)
                .or_else(|| e2e_cfg.peers.first())
                .ok_or_else(|| Error::MissingE2EPeer { target: target_name.to_string() })?;
            let addr = SocketAddr::new(peer.ip(), e2e_cfg.base_port);
            let stream = xdd_e2e::connect_source(addr, worker_index)?;
            Ok(E2EChannel::new(stream, E2ERole::Source))
        }
        E2ERole::Destination => {
            let bind_ip = std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED);
            let stream = xdd_e2e::listen_destination(bind_ip, e2e_cfg.base_port, worker_index)?;
            Ok(E2EChannel::new(stream, E2ERole::Destination))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdd_types::config::{SeekPattern, TargetConfig};

    fn local_config(dir: &std::path::Path) -> TargetConfig {
        TargetConfig {
            name: "t0".into(),
            path: dir.join("target.bin"),
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
    fn local_write_pass_moves_exactly_the_configured_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let abort = AbortFlag::new();
        let clock = Clock::new();
        let init_barrier = Arc::new(Barrier::new("init", config.queue_depth + 1, clock.clone(), abort.clone()));

        let mut controller = TargetController::build(config.clone(), "run-1", 1, 0, clock, abort.clone(), init_barrier.clone()).unwrap();
        let _ = init_barrier.enter("main", OccupantKind::Main);

        let counters = controller.run_pass(0).unwrap();
        assert_eq!(counters.bytes_xferred, config.target_bytes());
        assert_eq!(counters.ops_completed, 8);
        assert_eq!(counters.errors, 0);

        controller.shutdown(true).unwrap();

        let written = std::fs::metadata(dir.path().join("target.bin")).unwrap();
        assert_eq!(written.len(), config.target_bytes());
    }

    #[test]
    fn strict_ordering_completes_without_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        config.ordering = OrderingMode::Strict;
        let abort = AbortFlag::new();
        let clock = Clock::new();
        let init_barrier = Arc::new(Barrier::new("init", config.queue_depth + 1, clock.clone(), abort.clone()));

        let mut controller = TargetController::build(config.clone(), "run-1", 1, 0, clock, abort.clone(), init_barrier.clone()).unwrap();
        let _ = init_barrier.enter("main", OccupantKind::Main);

        let counters = controller.run_pass(0).unwrap();
        assert_eq!(counters.ops_completed, 8);
        controller.shutdown(true).unwrap();
    }
}
