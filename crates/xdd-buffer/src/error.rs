// SPDX-License-Identifier: Apache-2.0

//! Errors for the I/O buffer arena crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to allocate {size} bytes aligned to {align}")]
    Alloc { size: usize, align: usize },

    #[error("failed to mlock buffer: {0}")]
    Mlock(#[source] nix::Error),
}
