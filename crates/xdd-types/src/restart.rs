// SPDX-License-Identifier: Apache-2.0

//! Restart record (spec.md §3 "Restart record"). Flag bit values follow
//! `src/common/xint_restart.h` in the original source (`RESTART_FLAG_*`).

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RestartFlags: u64 {
        const IS_SOURCE              = 0x0000_0000_0000_0001;
        const RESUME_COPY            = 0x0000_0000_0000_0002;
        const SUCCESSFUL_COMPLETION  = 0x0000_0000_0000_0004;
        const FILE_NOW_CLOSED        = 0x0000_0000_0000_0008;
    }
}

/// Durable checkpoint of an E2E copy, one per target (spec.md §3, §4.9).
#[derive(Debug, Clone)]
pub struct RestartRecord {
    pub source_host: String,
    pub source_path: String,
    pub destination_host: String,
    pub destination_path: String,
    pub low_byte_offset: u64,
    pub high_byte_offset: u64,
    pub last_committed_byte_location: u64,
    pub last_committed_length: u64,
    pub last_update_time: u64,
    pub flags: RestartFlags,
}

impl RestartRecord {
    pub fn new(source_host: String, source_path: String, destination_host: String, destination_path: String) -> Self {
        RestartRecord {
            source_host,
            source_path,
            destination_host,
            destination_path,
            low_byte_offset: 0,
            high_byte_offset: 0,
            last_committed_byte_location: 0,
            last_committed_length: 0,
            last_update_time: 0,
            flags: RestartFlags::empty(),
        }
    }
}
