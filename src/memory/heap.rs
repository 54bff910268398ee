//! Heap storage for single-process runtimes.

use super::{MemorySegment, MemoryType};
use crate::error::{Error, Result};
use std::sync::atomic::AtomicU64;

/// Zeroed heap storage, allocated as `AtomicU64` so the start is aligned
/// for float64 views.
///
/// ```rust
/// use multicore::memory::{HeapSegment, MemorySegment};
///
/// let segment = HeapSegment::new(1024).unwrap();
/// assert_eq!(segment.len(), 1024);
/// ```
pub struct HeapSegment {
    cells: Box<[AtomicU64]>,
    len: usize,
}

impl HeapSegment {
    /// Allocate `bytes` zeroed bytes; the tail of the last 8-byte cell is
    /// padding that `len()` does not report.
    pub fn new(bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::AllocationFailed("empty heap segment".into()));
        }
        let cells = (0..bytes.div_ceil(8)).map(|_| AtomicU64::new(0)).collect();
        Ok(Self { cells, len: bytes })
    }
}

// SAFETY: boxed atomics are aligned, zeroed and pinned for the box's life.
unsafe impl MemorySegment for HeapSegment {
    fn as_ptr(&self) -> *const u8 {
        self.cells.as_ptr().cast()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Heap
    }
}
