// SPDX-License-Identifier: Apache-2.0

//! Timestamp ring (spec.md §4.4, component C5).
//!
//! Slot claims are lock-free (an atomic fetch-add on the cursor); the slot
//! body itself is written under a per-slot mutex so "fully populated before
//! the worker surfaces completion" (spec.md §3 invariant) is trivially true
//! without requiring `unsafe` shared mutable state. Claiming never takes
//! the lock of any slot other than the one a worker is about to write.

pub mod error;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use xdd_types::timestamp::{TimestampEntry, TimestampHeader, TsOpType, WrapPolicy};

pub use error::Error;

const DUMP_MAGIC: u32 = 0xDEAD_BEEF;

pub struct TimestampRing {
    header: TimestampHeader,
    capacity: u64,
    cursor: AtomicU64,
    slots: Vec<Mutex<TimestampEntry>>,
}

impl TimestampRing {
    pub fn new(header: TimestampHeader) -> Self {
        let capacity = header.table_size.max(1);
        let slots = (0..capacity).map(|_| Mutex::new(TimestampEntry::default())).collect();
        TimestampRing { header, capacity, cursor: AtomicU64::new(0), slots }
    }

    pub fn header(&self) -> &TimestampHeader {
        &self.header
    }

    /// Claim a slot index to write into, or `None` if `ONESHOT` and the
    /// ring is already full (spec.md §4.4 "Claim returns a slot index or -1
    /// if ONESHOT and full").
    pub fn claim(&self) -> Option<u64> {
        match self.header.wrap_policy {
            WrapPolicy::OneShot => {
                let mut current = self.cursor.load(Ordering::Acquire);
                loop {
                    if current >= self.capacity {
                        return None;
                    }
                    match self.cursor.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(prev) => return Some(prev),
                        Err(observed) => current = observed,
                    }
                }
            }
            WrapPolicy::Wrap => {
                let claimed = self.cursor.fetch_add(1, Ordering::AcqRel);
                Some(claimed % self.capacity)
            }
            WrapPolicy::Unbounded => {
                let claimed = self.cursor.fetch_add(1, Ordering::AcqRel);
                debug_assert!(claimed < self.capacity, "unbounded ring undersized");
                Some(claimed.min(self.capacity - 1))
            }
        }
    }

    /// Fully populate the slot claimed above. Must be called exactly once
    /// per successful `claim()` before the worker reports completion.
    pub fn write(&self, slot: u64, entry: TimestampEntry) {
        let idx = (slot % self.capacity) as usize;
        *self.slots[idx].lock() = entry;
    }

    /// Total claims issued so far (may exceed `capacity` under `Wrap`).
    pub fn claims_issued(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn has_wrapped(&self) -> bool {
        self.header.wrap_policy == WrapPolicy::Wrap && self.claims_issued() > self.capacity
    }

    /// Atomic snapshot read: `[0, cursor)` if never wrapped, else the full
    /// ring reordered oldest-first (spec.md §4.4 "Snapshot read").
    pub fn snapshot(&self) -> Vec<TimestampEntry> {
        let claimed = self.claims_issued();
        if !self.has_wrapped() {
            let n = claimed.min(self.capacity) as usize;
            return self.slots[..n].iter().map(|m| *m.lock()).collect();
        }
        let start = (claimed % self.capacity) as usize;
        let mut out = Vec::with_capacity(self.capacity as usize);
        out.extend(self.slots[start..].iter().map(|m| *m.lock()));
        out.extend(self.slots[..start].iter().map(|m| *m.lock()));
        out
    }

    /// Write the binary dump file described in spec.md §6 "Timestamp dump file".
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
        let mut w = BufWriter::new(file);
        let entries = self.snapshot();

        w.write_all(&DUMP_MAGIC.to_le_bytes())
            .and_then(|_| w.write_all(&[0u8; 4])) // padding to align header on 8 bytes
            .and_then(|_| write_header(&mut w, &self.header))
            .and_then(|_| w.write_all(&(entries.len() as u64).to_le_bytes()))
            .map_err(|source| Error::Io { path: path.display().to_string(), source })?;

        for e in &entries {
            write_entry(&mut w, e).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
        }
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<(TimestampHeader, Vec<TimestampEntry>), Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
        let magic = u32::from_le_bytes(magic);
        if magic != DUMP_MAGIC {
            return Err(Error::BadMagic { found: magic, expected: DUMP_MAGIC });
        }
        let mut pad = [0u8; 4];
        r.read_exact(&mut pad).map_err(|source| Error::Io { path: path.display().to_string(), source })?;

        let header = read_header(&mut r).map_err(|source| Error::Io { path: path.display().to_string(), source })?;

        let mut count_buf = [0u8; 8];
        r.read_exact(&mut count_buf).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
        let count = u64::from_le_bytes(count_buf);

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(read_entry(&mut r).map_err(|source| Error::Io { path: path.display().to_string(), source })?);
        }
        Ok((header, entries))
    }
}

fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_string(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    let bytes = s.as_bytes();
    write_u64(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string(r: &mut impl Read) -> std::io::Result<String> {
    let len = read_u64(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_header(w: &mut impl Write, h: &TimestampHeader) -> std::io::Result<()> {
    write_string(w, &h.run_id)?;
    write_string(w, &h.target_name)?;
    write_u64(w, h.block_size)?;
    write_u64(w, h.iosize)?;
    write_u64(w, h.queue_depth as u64)?;
    write_u64(w, h.clock_resolution_ns)?;
    w.write_all(&h.gts_delta_ns.to_le_bytes())?;
    write_u64(w, h.table_size)?;
    let wrap_tag: u8 = match h.wrap_policy {
        WrapPolicy::OneShot => 0,
        WrapPolicy::Wrap => 1,
        WrapPolicy::Unbounded => 2,
    };
    w.write_all(&[wrap_tag])
}

fn read_header(r: &mut impl Read) -> std::io::Result<TimestampHeader> {
    let run_id = read_string(r)?;
    let target_name = read_string(r)?;
    let block_size = read_u64(r)?;
    let iosize = read_u64(r)?;
    let queue_depth = read_u64(r)? as u32;
    let clock_resolution_ns = read_u64(r)?;
    let mut delta_buf = [0u8; 8];
    r.read_exact(&mut delta_buf)?;
    let gts_delta_ns = i64::from_le_bytes(delta_buf);
    let table_size = read_u64(r)?;
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let wrap_policy = match tag[0] {
        0 => WrapPolicy::OneShot,
        1 => WrapPolicy::Wrap,
        _ => WrapPolicy::Unbounded,
    };
    Ok(TimestampHeader {
        run_id,
        target_name,
        block_size,
        iosize,
        queue_depth,
        clock_resolution_ns,
        gts_delta_ns,
        table_size,
        wrap_policy,
    })
}

fn write_entry(w: &mut impl Write, e: &TimestampEntry) -> std::io::Result<()> {
    write_u64(w, e.pass_number as u64)?;
    write_u64(w, e.worker_number as u64)?;
    write_u64(w, e.op_number)?;
    let op_tag: u8 = match e.op_type {
        TsOpType::Read => 0,
        TsOpType::Write => 1,
        TsOpType::NoOp => 2,
    };
    w.write_all(&[op_tag])?;
    write_u64(w, e.byte_location)?;
    write_u64(w, e.bytes_xferred)?;
    write_u64(w, e.disk_start)?;
    write_u64(w, e.disk_end)?;
    write_u64(w, e.net_start)?;
    write_u64(w, e.net_end)
}

fn read_entry(r: &mut impl Read) -> std::io::Result<TimestampEntry> {
    let pass_number = read_u64(r)? as u32;
    let worker_number = read_u64(r)? as u32;
    let op_number = read_u64(r)?;
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let op_type = match tag[0] {
        0 => TsOpType::Read,
        1 => TsOpType::Write,
        _ => TsOpType::NoOp,
    };
    let byte_location = read_u64(r)?;
    let bytes_xferred = read_u64(r)?;
    let disk_start = read_u64(r)?;
    let disk_end = read_u64(r)?;
    let net_start = read_u64(r)?;
    let net_end = read_u64(r)?;
    Ok(TimestampEntry {
        pass_number,
        worker_number,
        op_number,
        op_type,
        byte_location,
        bytes_xferred,
        disk_start,
        disk_end,
        net_start,
        net_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(table_size: u64, wrap_policy: WrapPolicy) -> TimestampHeader {
        TimestampHeader {
            run_id: "run-1".into(),
            target_name: "t0".into(),
            block_size: 4096,
            iosize: 4096 * 8,
            queue_depth: 4,
            clock_resolution_ns: 1,
            gts_delta_ns: 0,
            table_size,
            wrap_policy,
        }
    }

    #[test]
    fn oneshot_refuses_claims_past_capacity() {
        let ring = TimestampRing::new(header(4, WrapPolicy::OneShot));
        for _ in 0..4 {
            assert!(ring.claim().is_some());
        }
        assert!(ring.claim().is_none());
    }

    #[test]
    fn wrap_overwrites_oldest() {
        let ring = TimestampRing::new(header(4, WrapPolicy::Wrap));
        for i in 0..6u64 {
            let slot = ring.claim().unwrap();
            ring.write(
                slot,
                TimestampEntry { op_number: i, ..Default::default() },
            );
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 4);
        assert_eq!(snap.iter().map(|e| e.op_number).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn dump_then_load_round_trips() {
        let ring = TimestampRing::new(header(8, WrapPolicy::Unbounded));
        for i in 0..3u64 {
            let slot = ring.claim().unwrap();
            ring.write(slot, TimestampEntry { op_number: i, disk_start: i * 10, disk_end: i * 10 + 5, ..Default::default() });
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ts.bin");
        ring.dump_to_file(&path).unwrap();
        let (header, entries) = TimestampRing::load_from_file(&path).unwrap();
        assert_eq!(header.run_id, "run-1");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].disk_start, 10);
    }
}
