//! memfd storage, mappable by other processes.
//!
//! Futex calls on these cells are made without `FUTEX_PRIVATE`, so a
//! process that maps the same fd can block and wake on them too.

use super::{MemorySegment, MemoryType};
use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::fs::MemfdFlags;
use rustix::mm::{MapFlags, ProtFlags};
use std::ffi::CString;
use std::ptr::NonNull;

/// A `MAP_SHARED` mapping of an anonymous memfd.
pub struct MemfdSegment {
    fd: OwnedFd,
    base: NonNull<u8>,
    len: usize,
}

impl MemfdSegment {
    /// Create a memfd of `bytes` bytes named `label` (shown in
    /// `/proc/<pid>/fd`) and map it.
    pub fn create(label: &str, bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::AllocationFailed("empty memfd segment".into()));
        }
        let label = CString::new(label)
            .map_err(|_| Error::AllocationFailed("memfd label contains NUL".into()))?;
        let fd = rustix::fs::memfd_create(&label, MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, bytes as u64)?;
        Self::map(fd, bytes)
    }

    /// Map a memfd received from another process.
    ///
    /// Fails if the file is shorter than `bytes`.
    pub fn attach(fd: OwnedFd, bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::AllocationFailed("empty memfd segment".into()));
        }
        let size = rustix::fs::fstat(&fd)?.st_size;
        if (size as u64) < bytes as u64 {
            return Err(Error::AllocationFailed(format!(
                "memfd holds {size} bytes, {bytes} requested"
            )));
        }
        Self::map(fd, bytes)
    }

    /// A second mapping of the same file at a different address.
    pub fn remap(&self) -> Result<Self> {
        let fd = rustix::io::fcntl_dupfd_cloexec(&self.fd, 0)?;
        Self::map(fd, self.len)
    }

    fn map(fd: OwnedFd, bytes: usize) -> Result<Self> {
        // SAFETY: a fresh shared mapping over a file of at least `bytes`.
        let addr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                bytes,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;
        Ok(Self {
            fd,
            base,
            len: bytes,
        })
    }
}

// SAFETY: mmap returns page-aligned, zero-filled memory that stays put
// until munmap in Drop.
unsafe impl MemorySegment for MemfdSegment {
    fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Memfd
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.fd.as_fd())
    }
}

impl Drop for MemfdSegment {
    fn drop(&mut self) {
        // SAFETY: base/len describe the mapping made in `map`.
        let _ = unsafe { rustix::mm::munmap(self.base.as_ptr().cast(), self.len) };
    }
}

// SAFETY: the mapping is only touched through atomics.
unsafe impl Send for MemfdSegment {}
unsafe impl Sync for MemfdSegment {}
