//! # Multicore
//!
//! A coordinator/worker data-parallel runtime over a shared word array.
//!
//! One coordinator and a pool of worker threads share a buffer of
//! `AtomicI32` cells. On top of it Multicore provides:
//!
//! - **Locks**: a three-state futex mutex where the coordinator never blocks
//!   and workers hand the lock straight to it when it is waiting
//! - **Barriers**: coordinator-released and self-releasing worker barriers
//! - **Bump allocation**: typed views carved out of a shared buffer, with
//!   rollback once every worker is parked
//! - **Task distribution**: build, broadcast and eval dispatches, with work
//!   items claimed from a shared cursor
//!
//! Buffers are memfd-backed by default, so the same layout can be mapped by
//! another process.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use multicore::prelude::*;
//!
//! let mut runtime = Multicore::new(RuntimeConfig::with_workers(4), |_setup| {
//!     let mut registry = FunctionRegistry::new();
//!     registry.register("fill", |inv| {
//!         let out = inv.output_view()?;
//!         let scale = inv.number(0)?;
//!         for i in inv.range().unwrap_or_default() {
//!             out.set(i as usize, i as f64 * scale);
//!         }
//!         Ok(())
//!     });
//!     Ok(registry)
//! })?;
//!
//! let out = TypedView::whole(SharedBuffer::new(8 * 1000)?, ElementType::Float64);
//! let mut ticket = runtime
//!     .submit(Task::build("fill", out.clone(), IndexSpace::one(0..1000)?).arg(0.5))?
//!     .into_ticket();
//! runtime.wait(&mut ticket)?;
//! runtime.shutdown()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod memory;
pub mod observability;
pub mod sync;
pub mod task;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{Backing, RuntimeConfig};
    pub use crate::error::{Error, Result};
    pub use crate::memory::{BumpAllocator, ElementType, MemorySegment, SharedBuffer, TypedView};
    pub use crate::sync::{
        CoordinatorBarrier, CoordinatorLock, Dispatcher, LockOutcome, WorkerBarrier, WorkerLock,
        WorkerOnlyBarrier,
    };
    pub use crate::task::{
        FunctionId, FunctionRegistry, IndexSpace, Invocation, Multicore, Submission, Task, Ticket,
        Value, WorkerSetup,
    };
}

pub use error::{Error, Result};
