//! Backing storage for shared buffers.

use rustix::fd::BorrowedFd;

/// What a segment's bytes live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Process heap; only threads of this process can see it.
    Heap,
    /// A memfd mapping; other processes can map the same file.
    Memfd,
}

impl MemoryType {
    /// Can the cells be mapped into another process?
    #[inline]
    pub fn is_shareable(&self) -> bool {
        matches!(self, MemoryType::Memfd)
    }
}

/// Fixed-size storage that a [`SharedBuffer`](super::SharedBuffer) views
/// as atomic words.
///
/// # Safety
///
/// Implementors guarantee that `as_ptr()` is 8-byte aligned, stays valid
/// and never moves while the segment lives, and that its `len()` bytes
/// start zeroed. Nothing but atomics ever touches the bytes afterwards,
/// which is what makes sharing across threads sound.
pub unsafe trait MemorySegment: Send + Sync {
    /// Start of the storage.
    fn as_ptr(&self) -> *const u8;

    /// Size in bytes.
    fn len(&self) -> usize;

    /// True for zero-sized storage (never produced by the built-in backends).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing kind.
    fn memory_type(&self) -> MemoryType;

    /// The file behind the mapping, for handing to another process.
    fn fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}
