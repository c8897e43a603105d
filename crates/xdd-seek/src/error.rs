// SPDX-License-Identifier: Apache-2.0

//! Errors for the seek list crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error operating on seek list file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("seek list file has bad magic number 0x{found:08x}, expected 0x{expected:08x}")]
    BadMagic { found: u32, expected: u32 },

    #[error("seek list file truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}
