//! Bump allocation over a shared buffer.
//!
//! The arena keeps two cells of metadata inside the buffer it manages:
//!
//! ```text
//! meta_offset (8-aligned)
//! +-------+-------+--------------------------------------+
//! |  top  | limit | base ... allocations ...      limit |
//! +-------+-------+--------------------------------------+
//! ```
//!
//! Offsets handed out are absolute byte offsets into the buffer and are
//! always 8-byte aligned, so they index straight into the whole-buffer
//! views returned by [`BumpAllocator::view`]. The first allocation starts
//! eight bytes past the base: offset 0 is never a valid result.

use super::{ElementType, SharedBuffer, TypedView};
use crate::error::{Error, Result};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};

const META_WORDS: usize = 2;
const TOP: usize = 0;
const LIMIT: usize = 1;

/// Where an arena's metadata lives; pass it to [`BumpAllocator::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BumpDescriptor {
    meta_offset: usize,
}

/// A saved allocation pointer, see [`BumpAllocator::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(i32);

/// Proof that no other agent is allocating from the arena.
///
/// Obtained from a quiescent
/// [`CoordinatorBarrier`](crate::sync::CoordinatorBarrier); the borrow keeps
/// the barrier from being released while the witness exists.
#[derive(Debug)]
pub struct Quiescence<'a> {
    _barrier: PhantomData<&'a ()>,
}

impl<'a> Quiescence<'a> {
    pub(crate) fn witness() -> Self {
        Self {
            _barrier: PhantomData,
        }
    }
}

impl Quiescence<'static> {
    /// Assert quiescence without a barrier.
    ///
    /// # Safety
    ///
    /// No other agent may allocate from the arena until the rollback that
    /// uses this witness has returned.
    pub unsafe fn assume() -> Self {
        Self::witness()
    }
}

/// A lock-free arena over part of a [`SharedBuffer`].
///
/// Any agent may allocate; `top` only grows, through a CAS loop, except on
/// [`release`](Self::release). There are no per-object headers and no way
/// to free individual allocations.
pub struct BumpAllocator {
    buffer: SharedBuffer,
    meta: usize,
    limit: usize,
    base: usize,
}

impl BumpAllocator {
    /// Set up an arena in `buffer` over `bytes_available` bytes from
    /// `byte_offset`.
    ///
    /// The start is rounded up and the end rounded down to 8 bytes. Must
    /// complete before any [`attach`](Self::attach) on the same cells.
    pub fn initialize(
        buffer: &SharedBuffer,
        byte_offset: usize,
        bytes_available: usize,
    ) -> Result<Self> {
        let meta_offset = byte_offset.next_multiple_of(8);
        let base = meta_offset + META_WORDS * 4;
        let end = byte_offset
            .checked_add(bytes_available)
            .filter(|&end| end <= buffer.byte_len())
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "arena [{byte_offset}, +{bytes_available}) exceeds buffer of {} bytes",
                    buffer.byte_len()
                ))
            })?
            & !7;
        // Reserve the first 8 bytes past the base so 0 never escapes as an
        // offset, and keep everything inside i32 cell range.
        if end <= base + 8 || end > i32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "arena [{byte_offset}, +{bytes_available}) is unusable"
            )));
        }

        let arena = Self {
            buffer: buffer.clone(),
            meta: meta_offset / 4,
            limit: end,
            base,
        };
        arena.top().store((base + 8) as i32, Ordering::SeqCst);
        arena.limit_cell().store(end as i32, Ordering::SeqCst);
        Ok(arena)
    }

    /// Worker-side handle on an arena set up by [`initialize`](Self::initialize).
    pub fn attach(buffer: &SharedBuffer, descriptor: BumpDescriptor) -> Self {
        let meta = descriptor.meta_offset / 4;
        let limit = buffer.word(meta + LIMIT).load(Ordering::SeqCst) as usize;
        Self {
            buffer: buffer.clone(),
            meta,
            limit,
            base: descriptor.meta_offset + META_WORDS * 4,
        }
    }

    /// Descriptor for attaching from another agent.
    pub fn descriptor(&self) -> BumpDescriptor {
        BumpDescriptor {
            meta_offset: self.meta * 4,
        }
    }

    #[inline]
    fn top(&self) -> &AtomicI32 {
        self.buffer.word(self.meta + TOP)
    }

    #[inline]
    fn limit_cell(&self) -> &AtomicI32 {
        self.buffer.word(self.meta + LIMIT)
    }

    /// Allocate `bytes` bytes, rounded up to 8; returns a byte offset.
    pub fn allocate(&self, bytes: usize) -> Result<usize> {
        let rounded = bytes
            .checked_next_multiple_of(8)
            .ok_or(Error::OutOfMemory {
                requested: bytes,
                available: self.remaining(),
            })?;
        let top = self.top();
        let mut current = top.load(Ordering::SeqCst);
        loop {
            let p = current as usize;
            let new_top = p.saturating_add(rounded);
            if new_top > self.limit {
                return Err(Error::OutOfMemory {
                    requested: rounded,
                    available: self.limit.saturating_sub(p),
                });
            }
            match top.compare_exchange_weak(
                current,
                new_top as i32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(p),
                Err(actual) => current = actual,
            }
        }
    }

    /// Allocate `count` elements; returns an element index into
    /// [`view(element_type)`](Self::view).
    pub fn alloc(&self, element_type: ElementType, count: usize) -> Result<usize> {
        let size = element_type.size();
        let bytes = count.checked_mul(size).ok_or(Error::OutOfMemory {
            requested: usize::MAX,
            available: self.remaining(),
        })?;
        Ok(self.allocate(bytes)? / size)
    }

    /// A whole-buffer view; every view overlaps the same bytes.
    pub fn view(&self, element_type: ElementType) -> TypedView {
        TypedView::whole(self.buffer.clone(), element_type)
    }

    /// The buffer this arena lives in.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Capture the current allocation pointer.
    pub fn mark(&self) -> Mark {
        Mark(self.top().load(Ordering::SeqCst))
    }

    /// Roll the allocation pointer back to `mark`.
    ///
    /// Everything allocated after the mark is invalid afterwards. The
    /// witness guarantees no allocation is in flight.
    pub fn release(&self, mark: Mark, _quiescent: &Quiescence<'_>) {
        self.top().store(mark.0, Ordering::SeqCst);
    }

    /// Bytes handed out since initialisation.
    pub fn used(&self) -> usize {
        (self.top().load(Ordering::SeqCst) as usize).saturating_sub(self.base + 8)
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.limit
            .saturating_sub(self.top().load(Ordering::SeqCst) as usize)
    }

    /// End of the arena, as a byte offset.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl std::fmt::Debug for BumpAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BumpAllocator")
            .field("buffer", &self.buffer.id())
            .field("used", &self.used())
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(bytes: usize) -> BumpAllocator {
        let buf = SharedBuffer::heap(bytes).unwrap();
        BumpAllocator::initialize(&buf, 0, bytes).unwrap()
    }

    #[test]
    fn test_never_returns_zero() {
        let a = arena(256);
        let first = a.allocate(1).unwrap();
        assert_ne!(first, 0);
        assert_eq!(first, 16);
        assert_eq!(a.allocate(1).unwrap(), 24);
    }

    #[test]
    fn test_offsets_are_8_aligned() {
        let buf = SharedBuffer::heap(512).unwrap();
        let a = BumpAllocator::initialize(&buf, 3, 400).unwrap();
        for size in [1, 3, 8, 13] {
            assert_eq!(a.allocate(size).unwrap() % 8, 0);
        }
    }

    #[test]
    fn test_exhaustion() {
        let a = arena(64);
        // 64 - 8 meta - 8 reserved
        assert_eq!(a.remaining(), 48);
        a.allocate(40).unwrap();
        let err = a.allocate(9).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfMemory {
                requested: 16,
                available: 8
            }
        ));
        a.allocate(8).unwrap();
        assert_eq!(a.remaining(), 0);
    }

    #[test]
    fn test_typed_alloc_indexes_views() {
        let a = arena(256);
        let idx = a.alloc(ElementType::Float64, 3).unwrap();
        let view = a.view(ElementType::Float64);
        view.set(idx + 2, 2.5);

        let bytes = a.view(ElementType::Uint8);
        let off = (idx + 2) * 8;
        assert_eq!(bytes.get(off + 7), Some(0x40 as f64));

        let i16_idx = a.alloc(ElementType::Int16, 5).unwrap();
        assert_eq!(i16_idx * 2, idx * 8 + 24);
    }

    #[test]
    fn test_mark_release_is_idempotent() {
        let a = arena(256);
        a.allocate(8).unwrap();
        let mark = a.mark();
        let witness = unsafe { Quiescence::assume() };
        a.release(mark, &witness);
        assert_eq!(a.mark(), mark);

        let p = a.allocate(24).unwrap();
        a.release(mark, &witness);
        assert_eq!(a.allocate(24).unwrap(), p);
    }

    #[test]
    fn test_attach_shares_state() {
        let buf = SharedBuffer::heap(1024).unwrap();
        let coordinator = BumpAllocator::initialize(&buf, 100, 800).unwrap();
        let worker = BumpAllocator::attach(&buf, coordinator.descriptor());
        let a = coordinator.allocate(16).unwrap();
        let b = worker.allocate(16).unwrap();
        assert_eq!(b, a + 16);
        assert_eq!(worker.limit(), coordinator.limit());
        assert_eq!(coordinator.used(), 32);
    }

    #[test]
    fn test_rejects_region_outside_buffer() {
        let buf = SharedBuffer::heap(64).unwrap();
        assert!(BumpAllocator::initialize(&buf, 32, 64).is_err());
        assert!(BumpAllocator::initialize(&buf, 0, 16).is_err());
    }

    #[test]
    fn test_concurrent_allocations_do_not_overlap() {
        use std::sync::Arc;
        use std::thread;

        let a = Arc::new(arena(64 * 1024));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let a = Arc::clone(&a);
                thread::spawn(move || (0..200).map(|_| a.allocate(16).unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        for pair in all.windows(2) {
            assert!(pair[1] - pair[0] >= 16);
        }
        assert_eq!(all.len(), 800);
    }
}
