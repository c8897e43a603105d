// SPDX-License-Identifier: Apache-2.0

//! Errors for the timestamp ring and dump file.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error on timestamp dump file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timestamp dump file has bad magic number 0x{found:08x}, expected 0x{expected:08x}")]
    BadMagic { found: u32, expected: u32 },
}
