// SPDX-License-Identifier: Apache-2.0

//! Timestamp table header and per-operation entry (spec.md §3, §4.4).

use serde::Deserialize;

use crate::task::OpType;

/// Ring-write policy for the timestamp table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapPolicy {
    /// Stop recording once the ring is full; claims past capacity return `None`.
    OneShot,
    /// Overwrite the oldest entry.
    Wrap,
    /// Pre-sized to `passes * target_ops`; never wraps, never refuses a claim.
    Unbounded,
}

/// One fully-populated slot in the timestamp ring (spec.md §3 "Timestamp entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampEntry {
    pub pass_number: u32,
    pub worker_number: u32,
    pub op_number: u64,
    pub op_type: TsOpType,
    pub byte_location: u64,
    pub bytes_xferred: u64,
    pub disk_start: u64,
    pub disk_end: u64,
    pub net_start: u64,
    pub net_end: u64,
}

/// `OpType` mirrored with a `Default` impl so `TimestampEntry` can derive one;
/// converts losslessly to/from `xdd_types::OpType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsOpType {
    Read,
    Write,
    NoOp,
}

impl Default for TsOpType {
    fn default() -> Self {
        TsOpType::NoOp
    }
}

impl From<OpType> for TsOpType {
    fn from(op: OpType) -> Self {
        match op {
            OpType::Read => TsOpType::Read,
            OpType::Write => TsOpType::Write,
            OpType::NoOp => TsOpType::NoOp,
        }
    }
}

/// Header carried at the front of a timestamp table / dump file (spec.md §6).
#[derive(Debug, Clone)]
pub struct TimestampHeader {
    pub run_id: String,
    pub target_name: String,
    pub block_size: u64,
    pub iosize: u64,
    pub queue_depth: u32,
    pub clock_resolution_ns: u64,
    pub gts_delta_ns: i64,
    pub table_size: u64,
    pub wrap_policy: WrapPolicy,
}
