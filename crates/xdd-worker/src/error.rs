// SPDX-License-Identifier: Apache-2.0

//! Errors for the worker crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error on target file: {0}")]
    Io(#[source] std::io::Error),

    #[error("short {kind} at offset {offset}: expected {expected} bytes, got {got}")]
    ShortTransfer { kind: &'static str, offset: u64, expected: u64, got: u64 },

    #[error(transparent)]
    Ordering(#[from] xdd_tot::Error),

    #[error(transparent)]
    E2E(#[from] xdd_e2e::Error),
}
