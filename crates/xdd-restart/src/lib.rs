// SPDX-License-Identifier: Apache-2.0

//! Restart monitor (spec.md §4.9, component C10).
//!
//! One support thread per E2E target with restart enabled. Every
//! `restart_frequency` it computes the highest contiguous committed byte
//! offset and rewrites the restart file atomically (write-temp, fsync,
//! rename).

pub mod error;
pub mod file;
pub mod offset_tracker;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use xdd_clock::Clock;
use xdd_types::restart::{RestartFlags, RestartRecord};
use xdd_types::AbortFlag;

pub use error::Error;
pub use offset_tracker::CommittedOffsetTracker;

/// Handle to a running restart monitor thread.
pub struct RestartMonitor {
    join_handle: Option<JoinHandle<()>>,
    stop: AbortFlag,
}

impl RestartMonitor {
    /// Spawn the periodic checkpoint thread. `record` is mutated in place
    /// (under the caller's ownership via `Arc<parking_lot::Mutex<_>>` at the
    /// call site in `xdd-target`); here we take the pieces we need directly
    /// to keep this crate decoupled from target internals.
    pub fn spawn(
        path: PathBuf,
        tracker: Arc<CommittedOffsetTracker>,
        mut record_template: RestartRecord,
        frequency: Duration,
        clock: Clock,
        run_abort: AbortFlag,
    ) -> Self {
        let stop = AbortFlag::new();
        let thread_stop = stop.clone();

        let join_handle = thread::Builder::new()
            .name(format!("xdd-restart-{}", record_template.destination_path))
            .spawn(move || {
                while !thread_stop.is_set() && !run_abort.is_set() {
                    thread::sleep(frequency);
                    if thread_stop.is_set() || run_abort.is_set() {
                        break;
                    }
                    let offset = tracker.highest_contiguous_byte_offset();
                    record_template.last_committed_byte_location = offset;
                    record_template.last_update_time = clock.now();
                    if let Err(err) = file::write(&record_template, &path) {
                        tracing::warn!(?err, path = %path.display(), "failed to checkpoint restart file");
                    }
                }
            })
            .expect("failed to spawn restart monitor thread");

        RestartMonitor { join_handle: Some(join_handle), stop }
    }

    /// Stop the monitor and write one last checkpoint, marking the run
    /// complete (spec.md §4.9: "On successful run completion, the flag
    /// `SUCCESSFUL_COMPLETION` is set").
    pub fn finish(mut self, path: &std::path::Path, mut record: RestartRecord, committed_offset: u64, successful: bool) -> Result<(), Error> {
        self.stop.set();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
        record.last_committed_byte_location = committed_offset;
        if successful {
            record.flags |= RestartFlags::SUCCESSFUL_COMPLETION;
            std::fs::remove_file(path).ok();
            return Ok(());
        }
        file::write(&record, path)
    }
}

impl Drop for RestartMonitor {
    fn drop(&mut self) {
        self.stop.set();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Compute the resume geometry for a target being restarted (spec.md §4.9
/// "On process start with RESUME_COPY"): the new start offset in blocks and
/// the reduced byte count still to transfer.
pub fn resume_geometry(record: &RestartRecord, block_size: u64, original_total_bytes: u64) -> (u64, u64) {
    let resume_offset_blocks = record.last_committed_byte_location / block_size;
    let remaining_bytes = original_total_bytes.saturating_sub(record.last_committed_byte_location);
    (resume_offset_blocks, remaining_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_geometry_reduces_remaining_bytes() {
        let mut record = RestartRecord::new("a".into(), "/a".into(), "b".into(), "/b".into());
        record.last_committed_byte_location = 500 * 1024 * 1024;
        let (offset_blocks, remaining) = resume_geometry(&record, 4096, 1024 * 1024 * 1024);
        assert_eq!(offset_blocks, (500 * 1024 * 1024) / 4096);
        assert_eq!(remaining, 1024 * 1024 * 1024 - 500 * 1024 * 1024);
    }

    #[test]
    fn checkpoint_thread_writes_progress_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.txt");
        let tracker = Arc::new(CommittedOffsetTracker::new(4096));
        tracker.mark_committed(0);
        tracker.mark_committed(1);

        let record = RestartRecord::new("src".into(), "/s".into(), "dst".into(), "/d".into());
        let monitor = RestartMonitor::spawn(
            path.clone(),
            tracker,
            record.clone(),
            Duration::from_millis(10),
            Clock::new(),
            AbortFlag::new(),
        );

        std::thread::sleep(Duration::from_millis(60));
        drop(monitor);

        let loaded = file::read(&path).unwrap();
        assert_eq!(loaded.last_committed_byte_location, 2 * 4096);
    }
}
