// SPDX-License-Identifier: Apache-2.0

//! Errors for the E2E protocol crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),

    /// Receiver got fewer bytes than a full frame before the connection
    /// closed (spec.md §4.8: "Receiver treats short read as connection
    /// loss").
    #[error("connection lost mid-frame: {0}")]
    ShortRead(#[source] std::io::Error),

    #[error("bad magic number 0x{found:08x} in E2E frame")]
    BadMagic { found: u32 },

    #[error("frame length mismatch: header says {header_length}, expected {expected}")]
    LengthMismatch { header_length: u64, expected: u64 },

    #[error("frame byte_location mismatch: header says {header_location}, expected {expected}")]
    LocationMismatch { header_location: u64, expected: u64 },

    #[error("sequence gap: expected {expected}, got {found}")]
    SequenceGap { expected: u64, found: u64 },
}
