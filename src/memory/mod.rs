//! Shared memory for Multicore.
//!
//! This module provides the memory the coordinator and the workers share:
//! raw segments, identity-carrying buffers addressed as atomic cells, typed
//! views over them, and a bump allocator for carving out working memory.
//!
//! # Architecture
//!
//! - [`MemorySegment`]: Trait for memory backends (heap, memfd shared memory)
//! - [`SharedBuffer`]: Cloneable handle on a segment, viewed as `AtomicI32` cells
//! - [`TypedView`]: Element-typed window over a buffer
//! - [`BumpAllocator`]: Lock-free arena with mark/release rollback
//!
//! # Example
//!
//! ```rust
//! use multicore::memory::{BumpAllocator, ElementType, SharedBuffer};
//!
//! let buffer = SharedBuffer::heap(4096).unwrap();
//! let arena = BumpAllocator::initialize(&buffer, 0, 4096).unwrap();
//!
//! let idx = arena.alloc(ElementType::Float64, 16).unwrap();
//! arena.view(ElementType::Float64).set(idx, 1.25);
//! ```

mod bump;
mod heap;
mod memfd;
mod region;
mod segment;
mod view;

pub use bump::{BumpAllocator, BumpDescriptor, Mark, Quiescence};
pub use heap::HeapSegment;
pub use memfd::MemfdSegment;
pub use region::{BufferId, SharedBuffer};
pub use segment::{MemorySegment, MemoryType};
pub use view::{ElementType, TypedView};
