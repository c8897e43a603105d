// SPDX-License-Identifier: Apache-2.0

//! Worker (spec.md §4.6, component C7).
//!
//! A worker owns one target-file descriptor (or one E2E socket) and
//! executes exactly one task at a time, end to end: wait for a task, run
//! it, report the outcome, clear `BUSY`, wait again. It never decides what
//! to run next — that is the target controller's job (`xdd-target`).

pub mod data_pattern;
pub mod error;
pub mod sync;

use std::fs::{File, OpenOptions};
use std::net::TcpStream;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpu_time::ThreadTime;

use xdd_barrier::{Barrier, OccupantKind};
use xdd_buffer::BufferHandle;
use xdd_clock::Clock;
use xdd_e2e::E2EHeader;
use xdd_timestamp::TimestampRing;
use xdd_tot::TargetOffsetTable;
use xdd_types::config::{E2ERole, OrderingMode};
use xdd_types::task::{IoTask, OpType, Task};
use xdd_types::timestamp::TimestampEntry;
use xdd_types::{AbortFlag, WorkerFlags};

pub use error::Error;
pub use sync::Semaphore;

/// The socket half of an E2E worker, plus the rolling sequence number that
/// must increase by one for every frame sent on this connection (spec.md
/// §4.8 "Sequence numbers are monotonic per connection, starting at 0").
pub struct E2EChannel {
    pub stream: TcpStream,
    pub role: E2ERole,
    sequence: u64,
}

impl E2EChannel {
    pub fn new(stream: TcpStream, role: E2ERole) -> Self {
        E2EChannel { stream, role, sequence: 0 }
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }
}

/// What an executed `Io` task produced, for the target controller to fold
/// into its per-pass counters (spec.md §4.10 "per-pass counters").
#[derive(Debug, Clone, Copy)]
pub struct IoOutcome {
    pub op_number: u64,
    pub pass_number: u32,
    pub op_type: OpType,
    pub byte_location: u64,
    pub bytes_xferred: u64,
    pub disk_start_ns: u64,
    pub disk_end_ns: u64,
    pub net_start_ns: Option<u64>,
    pub net_end_ns: Option<u64>,
    pub ts_slot: Option<u64>,
}

impl IoOutcome {
    /// Build the fully-populated timestamp entry for this outcome (spec.md
    /// §4.4 invariant: a slot is completely written before it is surfaced).
    pub fn timestamp_entry(&self, worker_number: u32) -> TimestampEntry {
        TimestampEntry {
            pass_number: self.pass_number,
            worker_number,
            op_number: self.op_number,
            op_type: self.op_type.into(),
            byte_location: self.byte_location,
            bytes_xferred: self.bytes_xferred,
            disk_start: self.disk_start_ns,
            disk_end: self.disk_end_ns,
            net_start: self.net_start_ns.unwrap_or(0),
            net_end: self.net_end_ns.unwrap_or(0),
        }
    }
}

/// What a worker reports back to its target controller after dispatching
/// one task (spec.md §4.6 "clear BUSY; ... post").
pub enum WorkerReport {
    Completed(IoOutcome),
    /// E2E destination observed the EOF-magic frame on a `recvfrom` (spec.md
    /// §4.6 "on EOF magic: set EOF_RECEIVED, mark pass_complete").
    EofReceived,
    /// `REOPEN` or `EOF_SEND` finished with nothing to report.
    Acked,
    PassComplete,
    Stopped,
    Failed(Error),
}

/// One worker of a target's pool (spec.md §3 "Worker", §4.6).
pub struct Worker {
    pub worker_number: usize,
    target_name: String,
    path: PathBuf,
    direct_io: bool,
    pattern_seed: u64,
    state: Arc<xdd_types::worker_state::WorkerState>,
    file: File,
    buffer: BufferHandle,
    clock: Clock,
    timestamps: Arc<TimestampRing>,
    tot: Arc<TargetOffsetTable>,
    ordering: OrderingMode,
    e2e: Option<E2EChannel>,
    iosize: u64,
    task_rx: Receiver<Task>,
    report_tx: Sender<WorkerReport>,
    any_available: Arc<Semaphore>,
    this_available: Arc<Semaphore>,
    pass_barrier: Arc<Barrier>,
    init_barrier: Arc<Barrier>,
    abort: AbortFlag,
    cpu_start: ThreadTime,
}

fn open_target(path: &Path, direct_io: bool) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    if direct_io {
        options.custom_flags(nix::libc::O_DIRECT);
    }
    options.open(path)
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_number: usize,
        target_name: String,
        path: PathBuf,
        direct_io: bool,
        pattern_seed: u64,
        state: Arc<xdd_types::worker_state::WorkerState>,
        buffer: BufferHandle,
        clock: Clock,
        timestamps: Arc<TimestampRing>,
        tot: Arc<TargetOffsetTable>,
        ordering: OrderingMode,
        e2e: Option<E2EChannel>,
        iosize: u64,
        task_rx: Receiver<Task>,
        report_tx: Sender<WorkerReport>,
        any_available: Arc<Semaphore>,
        this_available: Arc<Semaphore>,
        pass_barrier: Arc<Barrier>,
        init_barrier: Arc<Barrier>,
        abort: AbortFlag,
    ) -> Result<Self, Error> {
        let file = open_target(&path, direct_io).map_err(Error::Io)?;
        Ok(Worker {
            worker_number,
            target_name,
            path,
            direct_io,
            pattern_seed,
            state,
            file,
            buffer,
            clock,
            timestamps,
            tot,
            ordering,
            e2e,
            iosize,
            task_rx,
            report_tx,
            any_available,
            this_available,
            pass_barrier,
            init_barrier,
            abort,
            cpu_start: ThreadTime::now(),
        })
    }

    /// Run the worker loop to completion on the calling thread. Intended to
    /// be the body of a `thread::Builder::spawn` closure named
    /// `xdd-worker-{target}-{n}` by the target controller.
    pub fn run(mut self) {
        let _ = self.init_barrier.enter(format!("{}-worker-{}", self.target_name, self.worker_number), OccupantKind::Worker);

        loop {
            let task = match self.task_rx.recv() {
                Ok(task) => task,
                // controller dropped the sender; treat as STOP.
                Err(_) => break,
            };
            if matches!(task, Task::Stop) {
                let _ = self.report_tx.send(WorkerReport::Stopped);
                break;
            }

            self.state.set(WorkerFlags::BUSY);
            let pass_complete = matches!(task, Task::EndOfPass);
            let is_io = matches!(task, Task::Io(_));
            let report = self.dispatch(task);
            self.state.clear(WorkerFlags::BUSY);

            let _ = self.report_tx.send(report);
            // Only an `Io` dispatch ever consumed a permit (via
            // `acquire_worker`); `EndOfPass`/`EofSend`/`Reopen` are sent
            // straight to every worker with no matching acquire, so posting
            // here would leak permits onto both semaphores every pass
            // (spec.md §4.6/§4.7 invariant 3: one acquire per post).
            if is_io {
                self.this_available.post();
                self.any_available.post();
            }

            if pass_complete {
                let _ = self.pass_barrier.enter(format!("{}-worker-{}", self.target_name, self.worker_number), OccupantKind::Worker);
            }
        }
    }

    fn dispatch(&mut self, task: Task) -> WorkerReport {
        match task {
            Task::Io(io) => match self.execute_io(&io) {
                Ok(Some(outcome)) => WorkerReport::Completed(outcome),
                Ok(None) => WorkerReport::EofReceived,
                Err(e) => WorkerReport::Failed(e),
            },
            Task::Reopen => match self.reopen() {
                Ok(()) => WorkerReport::Acked,
                Err(e) => WorkerReport::Failed(e),
            },
            Task::EofSend => match self.send_eof() {
                Ok(()) => WorkerReport::Acked,
                Err(e) => WorkerReport::Failed(e),
            },
            Task::EndOfPass => WorkerReport::PassComplete,
            Task::Stop => unreachable!("handled in run()"),
        }
    }

    /// Reopen the target file, used after a direct I/O alignment fallback
    /// (spec.md §4.6 "REOPEN: close and open target; used after DIO
    /// fallback").
    fn reopen(&mut self) -> Result<(), Error> {
        self.file = open_target(&self.path, self.direct_io).map_err(Error::Io)?;
        Ok(())
    }

    /// Send the EOF-magic frame that ends this worker's side of an E2E
    /// conversation (spec.md §4.7 "E2E source extension").
    fn send_eof(&mut self) -> Result<(), Error> {
        let channel = self.e2e.as_mut().expect("EOF_SEND dispatched to a non-E2E worker");
        let send_time_ns = self.clock.now();
        let sequence = channel.next_sequence();
        xdd_e2e::send_eof(&mut channel.stream, sequence, self.worker_number as u32, send_time_ns)?;
        Ok(())
    }

    /// Execute one `Io` task end to end. Returns `Ok(None)` only for an E2E
    /// destination worker that observed the EOF-magic frame instead of a
    /// data frame (spec.md §4.6: "on EOF magic: set EOF_RECEIVED").
    fn execute_io(&mut self, io: &IoTask) -> Result<Option<IoOutcome>, Error> {
        let page = xdd_buffer::PAGE_SIZE as u64;
        if self.direct_io && (io.byte_location % page != 0 || io.length % page != 0) {
            self.direct_io = false;
            self.reopen()?;
        }

        // `IoTask` doesn't carry the predecessor's expected byte_location, so
        // the assertion in `wait_for_predecessor` is limited to the op-number
        // match; the ordering wait itself still holds.
        self.tot.wait_for_predecessor(io.op_number, None, self.ordering, &self.abort)?;

        let disk_start_ns;
        let disk_end_ns;
        let mut net_start_ns = None;
        let mut net_end_ns = None;
        let bytes_xferred;
        let mut eof = false;
        // Pre-claimed by the controller for every task except an E2E
        // destination's, which claims its own slot below only once a DATA
        // frame (as opposed to EOF) is confirmed (spec.md §4.4: an
        // `Unbounded` ring is sized for exactly `target_ops`, and an
        // up-front claim for what turns out to be the terminal EOF frame
        // would over-claim by one per worker every pass).
        let mut ts_slot = io.ts_slot;

        match (self.e2e.as_ref().map(|c| c.role), io.op_type) {
            (Some(E2ERole::Source), OpType::Read) => {
                let len = io.length as usize;
                disk_start_ns = self.clock.now();
                let read = self.pread_exact(io.byte_location, len)?;
                disk_end_ns = self.clock.now();

                let channel = self.e2e.as_mut().expect("checked above");
                let sequence = channel.next_sequence();
                let send_time_ns = self.clock.now();
                let header = E2EHeader {
                    magic: xdd_e2e::MAGIC_DATA,
                    sequence,
                    sendqnum: self.worker_number as u32,
                    send_time_ns,
                    recv_time_ns: 0,
                    byte_location: io.byte_location,
                    length: read as u64,
                };
                self.buffer.with_mut(|buf| xdd_e2e::send_frame(&mut channel.stream, &buf[..read], &header)).map_err(Error::E2E)?;
                net_start_ns = Some(send_time_ns);
                net_end_ns = Some(self.clock.now());
                bytes_xferred = read as u64;
            }
            (Some(E2ERole::Destination), OpType::Write) => {
                let iosize = self.iosize as usize;
                let channel = self.e2e.as_mut().expect("checked above");
                net_start_ns = Some(self.clock.now());
                let header = self.buffer.with_mut(|buf| xdd_e2e::recv_frame(&mut channel.stream, iosize, buf)).map_err(Error::E2E)?;
                net_end_ns = Some(self.clock.now());

                if header.is_eof() {
                    self.state.set(WorkerFlags::EOF_RECEIVED);
                    eof = true;
                    disk_start_ns = 0;
                    disk_end_ns = 0;
                    bytes_xferred = 0;
                } else {
                    let is_final_short = header.length < self.iosize;
                    xdd_e2e::verify_data_frame(&header, io.op_number, self.iosize, is_final_short).map_err(Error::E2E)?;
                    ts_slot = self.timestamps.claim();

                    disk_start_ns = self.clock.now();
                    let len = header.length as usize;
                    self.pwrite_exact(header.byte_location, len)?;
                    disk_end_ns = self.clock.now();
                    bytes_xferred = header.length;
                }
            }
            (_, OpType::Write) => {
                let len = io.length as usize;
                let seed = self.pattern_seed;
                self.buffer.with_mut(|buf| data_pattern::fill(&mut buf[..len], io.byte_location, seed));
                disk_start_ns = self.clock.now();
                self.pwrite_exact(io.byte_location, len)?;
                disk_end_ns = self.clock.now();
                bytes_xferred = io.length;
            }
            (_, OpType::Read) => {
                let len = io.length as usize;
                disk_start_ns = self.clock.now();
                let read = self.pread_exact(io.byte_location, len)?;
                disk_end_ns = self.clock.now();
                bytes_xferred = read as u64;
            }
            (_, OpType::NoOp) => {
                disk_start_ns = self.clock.now();
                disk_end_ns = disk_start_ns;
                bytes_xferred = 0;
            }
        }

        if eof {
            return Ok(None);
        }

        self.tot.mark_ready(io.op_number, io.byte_location, io.length);

        let outcome = IoOutcome {
            op_number: io.op_number,
            pass_number: io.pass_number,
            op_type: io.op_type,
            byte_location: io.byte_location,
            bytes_xferred,
            disk_start_ns,
            disk_end_ns,
            net_start_ns,
            net_end_ns,
            ts_slot,
        };

        if let Some(slot) = ts_slot {
            self.timestamps.write(slot, outcome.timestamp_entry(self.worker_number as u32));
        }

        Ok(Some(outcome))
    }

    /// `pread` retried to completion: a short return is not an error, it is
    /// retried from the advanced offset until `len` bytes are read or EOF
    /// (spec.md §4.6 "Short returns from pread/pwrite are retried to
    /// completion").
    fn pread_exact(&mut self, byte_location: u64, len: usize) -> Result<usize, Error> {
        let mut total = 0usize;
        loop {
            if total >= len {
                return Ok(total);
            }
            let remaining = len - total;
            let n = self.buffer.with_mut(|buf| {
                nix::sys::uio::pread(&self.file, &mut buf[total..total + remaining], (byte_location + total as u64) as i64)
            });
            match n {
                Ok(0) => return Ok(total), // EOF: logged by the caller (pure-read tail), not fatal.
                Ok(n) => total += n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(Error::Io(std::io::Error::from_raw_os_error(e as i32))),
            }
        }
    }

    fn pwrite_exact(&mut self, byte_location: u64, len: usize) -> Result<(), Error> {
        let mut total = 0usize;
        loop {
            if total >= len {
                return Ok(());
            }
            let remaining = len - total;
            let n = self.buffer.with_mut(|buf| nix::sys::uio::pwrite(&self.file, &buf[total..total + remaining], (byte_location + total as u64) as i64));
            match n {
                Ok(0) => return Err(Error::ShortTransfer { kind: "write", offset: byte_location, expected: len as u64, got: total as u64 }),
                Ok(n) => total += n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(Error::Io(std::io::Error::from_raw_os_error(e as i32))),
            }
        }
    }

    /// Per-thread CPU time consumed so far, for the results aggregator's
    /// CPU user/system counters (spec.md §4.10).
    pub fn cpu_time(&self) -> std::time::Duration {
        ThreadTime::now() - self.cpu_start
    }

    pub fn state(&self) -> &xdd_types::worker_state::WorkerState {
        &self.state
    }
}

/// Spawn a worker onto a dedicated named OS thread and return its control
/// handles (spec.md §5 "Parallel OS threads").
pub fn spawn(worker: Worker, target_name: &str, worker_number: usize) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name(format!("xdd-worker-{target_name}-{worker_number}")).spawn(move || worker.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use xdd_types::task::IoTask;

    fn test_worker(dir: &Path, tot: Arc<TargetOffsetTable>, ts: Arc<TimestampRing>) -> (Worker, Receiver<WorkerReport>, std::sync::mpsc::Sender<Task>) {
        let path = dir.join("target.bin");
        let (task_tx, task_rx) = mpsc::channel();
        let (report_tx, report_rx) = mpsc::channel();
        let any_available = Arc::new(Semaphore::new(0));
        let this_available = Arc::new(Semaphore::new(0));
        let abort = AbortFlag::new();
        let pass_barrier = Arc::new(Barrier::new("pass", 1, Clock::new(), abort.clone()));
        let init_barrier = Arc::new(Barrier::new("init", 1, Clock::new(), abort.clone()));

        let worker = Worker::new(
            0,
            "t0".into(),
            path,
            false,
            7,
            Arc::new(xdd_types::worker_state::WorkerState::new()),
            BufferHandle::owned(65536, false).unwrap(),
            Clock::new(),
            ts,
            tot,
            OrderingMode::None,
            None,
            65536,
            task_rx,
            report_tx,
            any_available,
            this_available,
            pass_barrier,
            init_barrier,
            abort,
        )
        .unwrap();
        (worker, report_rx, task_tx)
    }

    fn header(table_size: u64) -> xdd_types::TimestampHeader {
        xdd_types::TimestampHeader {
            run_id: "r".into(),
            target_name: "t0".into(),
            block_size: 4096,
            iosize: 65536,
            queue_depth: 1,
            clock_resolution_ns: 1,
            gts_delta_ns: 0,
            table_size,
            wrap_policy: xdd_types::WrapPolicy::Unbounded,
        }
    }

    #[test]
    fn write_then_read_round_trips_the_seeded_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let tot = Arc::new(TargetOffsetTable::new(1));
        let ts = Arc::new(TimestampRing::new(header(8)));
        let (worker, reports, tasks) = test_worker(dir.path(), tot, ts);

        let handle = spawn(worker, "t0", 0).unwrap();

        tasks
            .send(Task::Io(IoTask {
                op_type: OpType::Write,
                byte_location: 0,
                length: 65536,
                op_number: 0,
                pass_number: 0,
                ts_slot: Some(0),
                predecessor_worker: None,
                scheduled_time: None,
            }))
            .unwrap();
        match reports.recv().unwrap() {
            WorkerReport::Completed(outcome) => assert_eq!(outcome.bytes_xferred, 65536),
            _ => panic!("expected Completed"),
        }

        tasks.send(Task::Stop).unwrap();
        handle.join().unwrap();

        let written = std::fs::read(dir.path().join("target.bin")).unwrap();
        let mut expected = vec![0u8; 65536];
        data_pattern::fill(&mut expected, 0, 7);
        assert_eq!(written, expected);
    }

    #[test]
    fn reopen_task_is_acked_without_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let tot = Arc::new(TargetOffsetTable::new(1));
        let ts = Arc::new(TimestampRing::new(header(8)));
        let (worker, reports, tasks) = test_worker(dir.path(), tot, ts);
        let handle = spawn(worker, "t0", 0).unwrap();

        tasks.send(Task::Reopen).unwrap();
        assert!(matches!(reports.recv().unwrap(), WorkerReport::Acked));

        tasks.send(Task::Stop).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn stop_task_terminates_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let tot = Arc::new(TargetOffsetTable::new(1));
        let ts = Arc::new(TimestampRing::new(header(8)));
        let (worker, reports, tasks) = test_worker(dir.path(), tot, ts);
        let handle = spawn(worker, "t0", 0).unwrap();

        tasks.send(Task::Stop).unwrap();
        assert!(matches!(reports.recv().unwrap(), WorkerReport::Stopped));
        handle.join().unwrap();
    }
}
