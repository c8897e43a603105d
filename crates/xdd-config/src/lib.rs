// SPDX-License-Identifier: Apache-2.0

//! Target/run configuration structs and a thin YAML loader (spec.md §6
//! "CLI surface (collaborator)": "a parser fills a target-configuration
//! struct; the core consumes only that struct").
//!
//! This crate is deliberately thin: [`xdd_types::TargetConfig`] is the
//! struct the core actually consumes, and this crate's only additions are
//! (a) a YAML-facing shape with human-readable byte sizes
//! ([`model::TargetFile`]/[`model::RunConfigFile`]) and (b) construction-time
//! validation (spec.md §7 "Config" errors, "raised at construction; caller
//! aborts before any thread spawns"). A full CLI flag surface belongs to the
//! root binary, not here.

pub mod byte_units;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::Error;
pub use loader::{load_yaml, parse_yaml};
pub use model::{RunConfig, RunConfigFile, TargetFile};
pub use validate::validate_run;
