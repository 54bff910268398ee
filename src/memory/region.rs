//! Shared buffers: identity-carrying, word-addressable memory regions.

use super::{HeapSegment, MemfdSegment, MemorySegment, MemoryType};
use crate::config::Backing;
use crate::error::Result;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Global buffer id counter.
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`SharedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

struct BufferInner {
    id: BufferId,
    segment: Box<dyn MemorySegment>,
}

/// A fixed-size memory region shared by the coordinator and the workers.
///
/// Cloning is cheap and yields a handle to the *same* memory; identity is
/// tracked by [`BufferId`], which is what the argument codec uses to
/// transfer each buffer to the workers only once.
///
/// All access goes through atomics: [`words`](Self::words) exposes the
/// region as `AtomicI32` cells, and [`TypedView`](super::TypedView)
/// provides element-typed windows over the same bytes.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<BufferInner>,
}

impl SharedBuffer {
    /// Create a memfd-backed buffer of `bytes` bytes.
    pub fn new(bytes: usize) -> Result<Self> {
        Self::with_backing(bytes, Backing::Memfd)
    }

    /// Create a heap-backed buffer of `bytes` bytes.
    pub fn heap(bytes: usize) -> Result<Self> {
        Self::with_backing(bytes, Backing::Heap)
    }

    /// Create a buffer with an explicit backing.
    pub fn with_backing(bytes: usize, backing: Backing) -> Result<Self> {
        match backing {
            Backing::Memfd => Ok(Self::from_segment(MemfdSegment::create(
                "multicore-buffer",
                bytes,
            )?)),
            Backing::Heap => Ok(Self::from_segment(HeapSegment::new(bytes)?)),
        }
    }

    /// Wrap an existing segment, e.g. one mapped from a received fd.
    pub fn from_segment(segment: impl MemorySegment + 'static) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: BufferId::next(),
                segment: Box::new(segment),
            }),
        }
    }

    /// Identity of this buffer.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Size in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.inner.segment.len()
    }

    /// Number of whole 32-bit words.
    #[inline]
    pub fn word_len(&self) -> usize {
        self.byte_len() / 4
    }

    /// Do both handles refer to the same memory?
    #[inline]
    pub fn same_buffer(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The backing memory type.
    pub fn memory_type(&self) -> MemoryType {
        self.inner.segment.memory_type()
    }

    /// The underlying segment.
    pub fn segment(&self) -> &dyn MemorySegment {
        self.inner.segment.as_ref()
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.inner.segment.as_ptr()
    }

    /// The buffer as an array of atomic 32-bit cells.
    #[inline]
    pub fn words(&self) -> &[AtomicI32] {
        // SAFETY: segments are 8-byte aligned, zero-initialised and live as
        // long as `inner`; every access through the slice is atomic.
        unsafe {
            std::slice::from_raw_parts(self.as_ptr().cast::<AtomicI32>(), self.word_len())
        }
    }

    /// A single cell by word index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn word(&self, index: usize) -> &AtomicI32 {
        &self.words()[index]
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("id", &self.inner.id)
            .field("bytes", &self.byte_len())
            .field("memory_type", &self.memory_type())
            .finish()
    }
}
