// SPDX-License-Identifier: Apache-2.0

//! Shared data model for the XDD engine.
//!
//! This crate is the only thing every other `xdd-*` crate depends on. It
//! holds the plain data types from the data model (target configuration,
//! tasks, seek entries, timestamp entries, restart records) with no
//! behavior attached, so that `xdd-worker`, `xdd-target`, `xdd-e2e` and
//! friends can all speak the same vocabulary without depending on each
//! other.

pub mod abort;
pub mod config;
pub mod restart;
pub mod seek;
pub mod task;
pub mod timestamp;
pub mod worker_state;

pub use abort::AbortFlag;
pub use config::{E2ERole, OrderingMode, SeekPattern, TargetConfig, Throttle};
pub use restart::{RestartFlags, RestartRecord};
pub use seek::SeekEntry;
pub use task::{IoTask, OpType, Task};
pub use timestamp::{TimestampEntry, TimestampHeader, WrapPolicy};
pub use worker_state::WorkerFlags;
