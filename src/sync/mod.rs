//! Synchronization primitives over shared cells.
//!
//! Everything here lives in a [`SharedBuffer`] and is driven by atomic
//! read-modify-write on `AtomicI32` cells plus futex wait/wake. Workers
//! block; the coordinator never does and instead reacts to
//! [`Notification`]s routed by a [`Dispatcher`].
//!
//! - [`CoordinatorLock`] / [`WorkerLock`]: asymmetric three-state lock
//! - [`CoordinatorBarrier`] / [`WorkerBarrier`]: workers rendezvous, the
//!   coordinator releases
//! - [`WorkerOnlyBarrier`]: self-releasing worker rendezvous
//!
//! Coordinator-side objects must be constructed before the worker-side
//! objects that refer to the same cells; the worker side can only be built
//! from the coordinator side's descriptor.

mod barrier;
mod dispatcher;
pub mod futex;
mod lock;
mod notify;
mod worker_barrier;

pub use barrier::{BARRIER_CELLS, BarrierDescriptor, BarrierId, CoordinatorBarrier, WorkerBarrier};
pub use dispatcher::{Dispatcher, QuiescenceHandler};
pub use lock::{
    CoordinatorLock, LOCK_CELLS, LockDescriptor, LockId, LockOutcome, LockTicket, WorkerLock,
    WorkerLockGuard,
};
pub use notify::{Notification, Notifier};
pub use worker_barrier::{WORKER_BARRIER_CELLS, WorkerOnlyBarrier, WorkerOnlyDescriptor};

use crate::error::{Error, Result};
use crate::memory::SharedBuffer;

fn check_cells(buffer: &SharedBuffer, word_offset: usize, cells: usize, what: &str) -> Result<()> {
    match word_offset.checked_add(cells) {
        Some(end) if end <= buffer.word_len() => Ok(()),
        _ => Err(Error::InvalidConfig(format!(
            "{what} cells at word {word_offset} exceed buffer of {} words",
            buffer.word_len()
        ))),
    }
}
