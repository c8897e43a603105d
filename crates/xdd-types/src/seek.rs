// SPDX-License-Identifier: Apache-2.0

//! Seek entry: one per target op, produced deterministically by `xdd-seek`
//! from `(seed, range, interleave, rwratio, pass_number)` (spec.md §3/§4.3).

use crate::task::OpType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    pub op_type: OpType,
    pub byte_location: u64,
    pub block_count: u64,
    /// Nanoseconds from pass start this op is scheduled to issue at, under
    /// a throttle policy. Zero when no throttle is configured.
    pub scheduled_time_ns: u64,
}
