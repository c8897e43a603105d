// SPDX-License-Identifier: Apache-2.0

//! On-disk shape of a run's configuration (spec.md §6 "CLI surface
//! (collaborator)": a parser fills a target-configuration struct; the core
//! consumes only that struct). This module is the thin YAML boundary: sizes
//! are written in human units (`"4 KiB"`, `"1 GiB"`) via [`crate::byte_units`]
//! and converted to the plain `u64`/`u32` fields [`xdd_types::TargetConfig`]
//! actually carries, the same split the teacher's `otap-df-config` makes
//! between its YAML-facing `byte_units` module and the resolved in-memory
//! config.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use xdd_types::config::{E2EConfig, OrderingMode, RestartConfig, SeekPattern, TargetConfig, TimestampConfig, Throttle};

use crate::byte_units;
use crate::error::Error;

/// Top-level file format: one run, N targets (spec.md §4.11 "Run
/// orchestrator": "Build targets").
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfigFile {
    #[serde(default = "default_run_id")]
    pub run_id: String,
    #[serde(default = "default_passes")]
    pub passes: u32,
    #[serde(default, with = "humantime_serde::option")]
    pub pass_delay: Option<Duration>,
    /// Signed nanoseconds added to every local timestamp to project into a
    /// shared run clock (spec.md §1, §4.1); the handshake that computes this
    /// is a collaborator, this crate only carries the number through.
    #[serde(default)]
    pub gts_delta_ns: i64,
    pub targets: Vec<TargetFile>,
}

fn default_run_id() -> String {
    "xdd-run".to_string()
}

fn default_passes() -> u32 {
    1
}

/// One target, YAML-facing (spec.md §3 "Target"). Field-for-field the same
/// as [`TargetConfig`] except `block_size`/`total_bytes`, which accept
/// human-readable sizes here and are resolved to raw bytes on conversion.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetFile {
    pub name: String,
    pub path: PathBuf,
    pub reqsize: u32,
    #[serde(deserialize_with = "byte_units::deserialize")]
    pub block_size: u64,
    pub queue_depth: usize,
    pub rwratio: f64,
    #[serde(default)]
    pub start_offset: u64,
    #[serde(default)]
    pub pass_offset: u64,
    pub numreqs: Option<u64>,
    #[serde(default, deserialize_with = "byte_units::deserialize_option")]
    pub total_bytes: Option<u64>,
    pub seek: SeekPattern,
    #[serde(default)]
    pub throttle: Option<Throttle>,
    #[serde(default)]
    pub ordering: Option<OrderingMode>,
    pub e2e: Option<E2EConfig>,
    pub restart: Option<RestartConfig>,
    #[serde(default)]
    pub direct_io: bool,
    #[serde(default)]
    pub max_errors: u64,
    #[serde(default)]
    pub stop_on_error: bool,
    pub timestamp: Option<TimestampConfig>,
    pub processor_pin: Option<usize>,
}

impl TargetFile {
    pub fn into_target_config(self) -> Result<TargetConfig, Error> {
        Ok(TargetConfig {
            name: self.name,
            path: self.path,
            reqsize: self.reqsize,
            block_size: self.block_size,
            queue_depth: self.queue_depth,
            rwratio: self.rwratio,
            start_offset: self.start_offset,
            pass_offset: self.pass_offset,
            numreqs: self.numreqs,
            total_bytes: self.total_bytes,
            seek: self.seek,
            throttle: self.throttle.unwrap_or(Throttle::None),
            ordering: self.ordering.unwrap_or(OrderingMode::None),
            e2e: self.e2e,
            restart: self.restart,
            direct_io: self.direct_io,
            max_errors: self.max_errors,
            stop_on_error: self.stop_on_error,
            timestamp: self.timestamp,
            processor_pin: self.processor_pin,
        })
    }
}

/// Resolved, validated run configuration (spec.md §4.11). What `xdd-engine`
/// actually consumes; `xdd-config`'s only other job is producing one of
/// these from YAML or letting a caller build one directly in-process.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,
    pub passes: u32,
    pub pass_delay: Duration,
    pub gts_delta_ns: i64,
    pub targets: Vec<TargetConfig>,
}

impl RunConfigFile {
    pub fn into_run_config(self) -> Result<RunConfig, Error> {
        let targets = self.targets.into_iter().map(TargetFile::into_target_config).collect::<Result<Vec<_>, _>>()?;
        Ok(RunConfig { run_id: self.run_id, passes: self.passes.max(1), pass_delay: self.pass_delay.unwrap_or_default(), gts_delta_ns: self.gts_delta_ns, targets })
    }
}
