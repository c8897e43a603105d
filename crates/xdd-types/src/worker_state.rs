// SPDX-License-Identifier: Apache-2.0

//! Per-worker state word (spec.md §3 "Worker").

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Flags packed into a worker's state word, read/written with atomic
    /// operations so the target controller can poll availability without a
    /// lock (spec.md §5 "Suspension points").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WorkerFlags: u32 {
        const BUSY          = 0b0000_0001;
        const EOF_RECEIVED  = 0b0000_0010;
        const IN_BARRIER    = 0b0000_0100;
        const IN_RECV       = 0b0000_1000;
        const IN_SEND       = 0b0001_0000;
        const IN_IO         = 0b0010_0000;
    }
}

impl WorkerFlags {
    /// A worker is available iff `BUSY = 0 AND EOF_RECEIVED = 0` (invariant 5, spec.md §3).
    pub fn is_available(self) -> bool {
        !self.intersects(WorkerFlags::BUSY | WorkerFlags::EOF_RECEIVED)
    }
}

/// Atomic holder for a [`WorkerFlags`] word.
#[derive(Debug)]
pub struct WorkerState(AtomicU32);

impl WorkerState {
    pub fn new() -> Self {
        WorkerState(AtomicU32::new(0))
    }

    pub fn load(&self) -> WorkerFlags {
        WorkerFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, flags: WorkerFlags) {
        self.0.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear(&self, flags: WorkerFlags) {
        self.0.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn is_available(&self) -> bool {
        self.load().is_available()
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}
