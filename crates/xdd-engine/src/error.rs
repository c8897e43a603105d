// SPDX-License-Identifier: Apache-2.0

//! Errors for the run orchestrator.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build target {target}: {source}")]
    BuildTarget { target: String, #[source] source: xdd_target::Error },

    #[error("failed to spawn target thread {target}: {source}")]
    SpawnTarget { target: String, #[source] source: std::io::Error },

    #[error("run aborted before completion")]
    Aborted,
}
