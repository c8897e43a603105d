// SPDX-License-Identifier: Apache-2.0

//! Errors for the restart crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error on restart file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("restart file {path} missing required key '{key}'")]
    MissingKey { path: String, key: &'static str },

    #[error("restart file {path} has malformed value for '{key}': {value}")]
    MalformedValue { path: String, key: &'static str, value: String },
}
