// SPDX-License-Identifier: Apache-2.0

//! The target configuration struct (spec.md §3 "Target", §6 "CLI surface
//! (collaborator)": "the core consumes only that struct"). Parsing this
//! from a CLI or config file is a collaborator's job (`xdd-config`); this
//! crate only defines the shape.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// How op order is enforced across the workers of one target (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    None,
    Loose,
    Strict,
}

/// Access pattern used to build the seek list (spec.md §4.3).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "pattern")]
pub enum SeekPattern {
    Sequential {
        /// Wrap the access pointer back to `start_offset` once it would
        /// exceed `range` bytes from the start. `None` means no wrap.
        range: Option<u64>,
    },
    Random {
        seed: u64,
        range: u64,
        /// 1 = unique random positions; >1 quantizes to `interleave *
        /// block_size` boundaries (spec.md §4.3).
        interleave: u32,
    },
}

/// Rate limiting applied by the target controller before each dispatch
/// (spec.md §5 "Throttle policy").
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Throttle {
    None,
    /// Target operations per second.
    Ops { rate: f64 },
    /// Target megabytes (1e6 bytes) per second.
    Bandwidth { mb_per_sec: f64 },
    /// Fixed delay before every op, regardless of op size.
    FixedDelay {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
}

/// Which side of an E2E transfer a target plays (spec.md §1, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum E2ERole {
    Source,
    Destination,
}

/// E2E-specific configuration, present only when a target has a peer.
#[derive(Debug, Clone, Deserialize)]
pub struct E2EConfig {
    pub role: E2ERole,
    /// Destination addresses to connect to (source) or bind from
    /// (destination), one per worker index offset from `base_port`.
    pub peers: Vec<SocketAddr>,
    pub base_port: u16,
}

/// Restart-file configuration for an E2E target (spec.md §4.9).
#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
    pub path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub frequency: Duration,
    #[serde(default)]
    pub resume: bool,
}

/// Timestamp table configuration (spec.md §3 "Timestamp table").
#[derive(Debug, Clone, Deserialize)]
pub struct TimestampConfig {
    #[serde(rename = "wrap_policy")]
    pub wrap: crate::timestamp::WrapPolicy,
    pub dump_path: Option<PathBuf>,
}

/// Everything needed to construct and run one Target (spec.md §3 "Target").
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub path: PathBuf,
    /// Request size in blocks.
    pub reqsize: u32,
    /// Block size in bytes.
    pub block_size: u64,
    pub queue_depth: usize,
    /// 1.0 = pure read, 0.0 = pure write.
    pub rwratio: f64,
    /// Start offset in blocks.
    #[serde(default)]
    pub start_offset: u64,
    /// Per-pass offset in blocks, applied as `pass_offset * pass_number`.
    #[serde(default)]
    pub pass_offset: u64,
    pub numreqs: Option<u64>,
    pub total_bytes: Option<u64>,
    pub seek: SeekPattern,
    #[serde(default = "default_throttle")]
    pub throttle: Throttle,
    #[serde(default = "default_ordering")]
    pub ordering: OrderingMode,
    pub e2e: Option<E2EConfig>,
    pub restart: Option<RestartConfig>,
    #[serde(default)]
    pub direct_io: bool,
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,
    #[serde(default)]
    pub stop_on_error: bool,
    pub timestamp: Option<TimestampConfig>,
    /// CPU core to pin this target's workers to, if any (spec.md §5).
    pub processor_pin: Option<usize>,
}

fn default_throttle() -> Throttle {
    Throttle::None
}

fn default_ordering() -> OrderingMode {
    OrderingMode::None
}

fn default_max_errors() -> u64 {
    0
}

impl TargetConfig {
    /// Bytes moved by a single op.
    pub fn iosize(&self) -> u64 {
        self.reqsize as u64 * self.block_size
    }

    /// `target_ops = ceil(total_bytes / iosize)` (spec.md §3, invariant 4 and
    /// the §9 open question: the original source rounds inconsistently
    /// between two sites; this implementation always rounds up).
    pub fn target_ops(&self, total_bytes: u64) -> u64 {
        let iosize = self.iosize();
        total_bytes.div_ceil(iosize)
    }

    /// Total bytes to move this pass, derived from whichever of
    /// `numreqs`/`total_bytes` was configured (exactly one must be set;
    /// validated by `xdd-config`).
    pub fn target_bytes(&self) -> u64 {
        match (self.numreqs, self.total_bytes) {
            (Some(n), _) => n * self.iosize(),
            (None, Some(b)) => b,
            (None, None) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> TargetConfig {
        TargetConfig {
            name: "t0".into(),
            path: "/dev/null".into(),
            reqsize: 256,
            block_size: 4096,
            queue_depth: 4,
            rwratio: 1.0,
            start_offset: 0,
            pass_offset: 0,
            numreqs: None,
            total_bytes: Some(1024 * 1024 * 1024),
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
    fn iosize_is_reqsize_times_block_size() {
        let cfg = base_config();
        assert_eq!(cfg.iosize(), 256 * 4096);
    }

    #[test]
    fn target_ops_rounds_up_on_short_tail() {
        let mut cfg = base_config();
        cfg.total_bytes = Some(cfg.iosize() * 10 + 17);
        assert_eq!(cfg.target_ops(cfg.target_bytes()), 11);
    }

    #[test]
    fn target_ops_exact_multiple() {
        let cfg = base_config();
        let bytes = cfg.target_bytes();
        assert_eq!(cfg.target_ops(bytes), 1024 * 1024 * 1024 / cfg.iosize());
    }
}
