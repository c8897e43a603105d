// SPDX-License-Identifier: Apache-2.0

//! Errors for the configuration crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("failed to parse YAML config {path}: {source}")]
    Parse { path: String, #[source] source: serde_yaml::Error },

    #[error("target {target}: {message}")]
    Validation { target: String, message: String },

    #[error("run config: {0}")]
    RunValidation(String),
}
