// SPDX-License-Identifier: Apache-2.0

//! Target Offset Table (spec.md §4.5, component C6).
//!
//! A sliding window of `K * queue_depth` slots used to enforce ordering
//! between the workers of one target. `NONE` never waits but still
//! records, so a watchdog can diagnose; `LOOSE` waits on `op - queue_depth`;
//! `STRICT` waits on `op - 1`.

pub mod error;

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use xdd_types::config::OrderingMode;
use xdd_types::AbortFlag;

pub use error::Error;

/// Slots per worker in the sliding window (spec.md §3 "K small, e.g. 4").
pub const DEFAULT_K: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    op_number: u64,
    byte_location: u64,
    io_size: u64,
    ready: bool,
}

struct Slot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

/// Per-target ordering enforcement structure.
pub struct TargetOffsetTable {
    slots: Vec<Slot>,
    queue_depth: usize,
}

impl TargetOffsetTable {
    pub fn new(queue_depth: usize) -> Self {
        Self::with_k(queue_depth, DEFAULT_K)
    }

    pub fn with_k(queue_depth: usize, k: usize) -> Self {
        let entries = (k * queue_depth).max(1);
        let slots = (0..entries).map(|_| Slot { state: Mutex::new(SlotState::default()), cond: Condvar::new() }).collect();
        TargetOffsetTable { slots, queue_depth }
    }

    fn slot_index(&self, op_number: u64) -> usize {
        (op_number as usize) % self.slots.len()
    }

    /// Record that `op_number` at `byte_location` has been issued, and
    /// release any waiter blocked on it. Always called, even under `NONE`
    /// ordering, so the table stays observable (spec.md §4.5 "NONE").
    pub fn mark_ready(&self, op_number: u64, byte_location: u64, io_size: u64) {
        let idx = self.slot_index(op_number);
        let slot = &self.slots[idx];
        {
            let mut state = slot.state.lock();
            state.op_number = op_number;
            state.byte_location = byte_location;
            state.io_size = io_size;
            state.ready = true;
        }
        slot.cond.notify_all();
    }

    /// Block the caller (about to issue `op_number`) until its predecessor,
    /// under `ordering`, has signalled ready. `expected_predecessor_location`
    /// lets the caller assert the predecessor slot it woke up on actually
    /// belongs to the op it expected, not a stale wrap-around occupant.
    pub fn wait_for_predecessor(
        &self,
        op_number: u64,
        expected_predecessor_location: Option<u64>,
        ordering: OrderingMode,
        abort: &AbortFlag,
    ) -> Result<(), Error> {
        let predecessor = match ordering {
            OrderingMode::None => return Ok(()),
            OrderingMode::Loose => op_number.checked_sub(self.queue_depth as u64),
            OrderingMode::Strict => op_number.checked_sub(1),
        };
        let predecessor_op = match predecessor {
            Some(p) => p,
            None => return Ok(()), // no predecessor yet (start of run)
        };

        let idx = self.slot_index(predecessor_op);
        let slot = &self.slots[idx];
        let mut state = slot.state.lock();
        loop {
            if abort.is_set() {
                return Ok(());
            }
            if state.ready && state.op_number == predecessor_op {
                break;
            }
            let _ = slot.cond.wait_for(&mut state, Duration::from_millis(200));
        }

        if let Some(expected) = expected_predecessor_location {
            if state.byte_location != expected {
                return Err(Error::OrderingViolation {
                    op_number,
                    predecessor_op,
                    expected,
                    found: state.byte_location,
                });
            }
        }
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn none_ordering_never_waits() {
        let tot = TargetOffsetTable::new(4);
        let abort = AbortFlag::new();
        tot.wait_for_predecessor(5, None, OrderingMode::None, &abort).unwrap();
    }

    #[test]
    fn strict_waits_for_immediate_predecessor() {
        let tot = Arc::new(TargetOffsetTable::new(4));
        let abort = AbortFlag::new();

        let t = {
            let tot = tot.clone();
            let abort = abort.clone();
            thread::spawn(move || {
                tot.wait_for_predecessor(1, Some(1000), OrderingMode::Strict, &abort).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(20));
        tot.mark_ready(0, 1000, 4096);
        t.join().unwrap();
    }

    #[test]
    fn loose_waits_queue_depth_back() {
        let tot = TargetOffsetTable::new(4);
        let abort = AbortFlag::new();
        // op 4 depends on op 0 under loose with queue_depth=4.
        tot.mark_ready(0, 2000, 4096);
        tot.wait_for_predecessor(4, Some(2000), OrderingMode::Loose, &abort).unwrap();
    }

    #[test]
    fn mismatched_predecessor_location_is_an_error() {
        let tot = TargetOffsetTable::new(4);
        let abort = AbortFlag::new();
        tot.mark_ready(0, 1000, 4096);
        let err = tot.wait_for_predecessor(1, Some(9999), OrderingMode::Strict, &abort).unwrap_err();
        assert!(matches!(err, Error::OrderingViolation { .. }));
    }
}
