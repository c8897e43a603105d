// SPDX-License-Identifier: Apache-2.0

//! Errors for the target controller crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to spawn worker {worker_number} for target {target}: {source}")]
    SpawnWorker { target: String, worker_number: usize, #[source] source: std::io::Error },

    #[error("failed to build worker {worker_number} for target {target}: {source}")]
    BuildWorker { target: String, worker_number: usize, #[source] source: xdd_worker::Error },

    #[error("target {target} has no peers configured for its E2E role")]
    MissingE2EPeer { target: String },

    #[error(transparent)]
    E2E(#[from] xdd_e2e::Error),

    #[error(transparent)]
    Restart(#[from] xdd_restart::Error),

    #[error(transparent)]
    Buffer(#[from] xdd_buffer::Error),

    #[error("target {target} aborted after {errors} errors (max_errors={max_errors})")]
    MaxErrorsExceeded { target: String, errors: u64, max_errors: u64 },
}
