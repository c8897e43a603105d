// SPDX-License-Identifier: Apache-2.0

//! I/O buffer arena (spec.md §4, component C4).
//!
//! Each worker gets one page-aligned buffer sized to its target's `iosize`.
//! Buffers are owned by the worker except shared-memory buffers, which are
//! jointly owned by an [`Arc`] and released exactly once when the last
//! owner drops it (spec.md §3 "Ownership").

pub mod error;

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

pub use error::Error;

pub const PAGE_SIZE: usize = 4096;

/// A single page-aligned heap buffer.
pub struct IoBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
    locked: bool,
}

// SAFETY: `IoBuffer` owns its allocation exclusively and exposes it only
// through `&`/`&mut` accessors that respect normal borrow rules; moving the
// pointer between threads is sound because nothing else aliases it.
unsafe impl Send for IoBuffer {}

impl IoBuffer {
    /// Allocate `len` bytes aligned to the page size, optionally `mlock`ed
    /// into physical memory so it cannot be paged out mid-I/O.
    pub fn new(len: usize, lock: bool) -> Result<Self, Error> {
        let layout = Layout::from_size_align(len.max(1), PAGE_SIZE).map_err(|_| Error::Alloc { size: len, align: PAGE_SIZE })?;
        // SAFETY: `layout` has non-zero size (we `max(1)` above) and a valid
        // alignment; `alloc_zeroed` either returns a pointer sized/aligned
        // per `layout` or null, which we check immediately below.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::Alloc { size: len, align: PAGE_SIZE })?;

        let mut buffer = IoBuffer { ptr, len, layout, locked: false };
        if lock {
            buffer.mlock()?;
        }
        Ok(buffer)
    }

    fn mlock(&mut self) -> Result<(), Error> {
        // SAFETY: the pointer/length pair describes this buffer's own live
        // allocation for the duration of the call.
        unsafe {
            nix::sys::mman::mlock(self.ptr.cast(), self.len).map_err(Error::Mlock)?;
        }
        self.locked = true;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`,
        // and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for IoBuffer {
    fn drop(&mut self) {
        if self.locked {
            // SAFETY: `ptr`/`len` describe the same range passed to `mlock`.
            let _ = unsafe { nix::sys::mman::munlock(self.ptr.cast(), self.len) };
        }
        // SAFETY: `ptr`/`layout` are exactly what `alloc_zeroed` returned.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// A worker's handle to its I/O buffer: either uniquely owned, or a shared
/// allocation jointly owned with other workers and released once the last
/// `Arc` drops (spec.md §3 "Ownership").
pub enum BufferHandle {
    Owned(IoBuffer),
    Shared(Arc<Mutex<IoBuffer>>),
}

impl BufferHandle {
    pub fn owned(len: usize, lock: bool) -> Result<Self, Error> {
        Ok(BufferHandle::Owned(IoBuffer::new(len, lock)?))
    }

    pub fn shared(existing: Arc<Mutex<IoBuffer>>) -> Self {
        BufferHandle::Shared(existing)
    }

    pub fn new_shared(len: usize, lock: bool) -> Result<Arc<Mutex<IoBuffer>>, Error> {
        Ok(Arc::new(Mutex::new(IoBuffer::new(len, lock)?)))
    }

    /// Run `f` with mutable access to the underlying buffer, regardless of
    /// ownership mode.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        match self {
            BufferHandle::Owned(buf) => f(buf.as_mut_slice()),
            BufferHandle::Shared(buf) => {
                let mut guard = buf.lock();
                f(guard.as_mut_slice())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferHandle::Owned(buf) => buf.len(),
            BufferHandle::Shared(buf) => buf.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_buffer_is_page_aligned() {
        let buf = IoBuffer::new(8192, false).unwrap();
        assert_eq!(buf.as_slice().as_ptr() as usize % PAGE_SIZE, 0);
        assert_eq!(buf.len(), 8192);
    }

    #[test]
    fn zero_length_buffer_is_valid() {
        let buf = IoBuffer::new(0, false).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn owned_handle_write_roundtrip() {
        let mut handle = BufferHandle::owned(16, false).unwrap();
        handle.with_mut(|buf| buf.fill(0xAB));
        handle.with_mut(|buf| assert!(buf.iter().all(|&b| b == 0xAB)));
    }

    #[test]
    fn shared_handle_is_released_once() {
        let shared = BufferHandle::new_shared(16, false).unwrap();
        let a = BufferHandle::shared(shared.clone());
        let b = BufferHandle::shared(shared.clone());
        drop(a);
        assert_eq!(Arc::strong_count(&shared), 2); // shared + b
        drop(b);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
