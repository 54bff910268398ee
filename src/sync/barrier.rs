//! Coordinator/worker rendezvous barrier.
//!
//! Two cells: `countdown` (parties still to check in) and `epoch` (bumped
//! on every release). Workers check in and sleep on `epoch`; the last one in
//! notifies the coordinator, and only the coordinator can release them.

use super::{Notification, Notifier, check_cells, futex};
use crate::error::{Error, Result};
use crate::memory::{Quiescence, SharedBuffer};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{trace, warn};

const COUNTDOWN: usize = 0;
const EPOCH: usize = 1;

/// Number of cells a barrier occupies.
pub const BARRIER_CELLS: usize = 2;

static NEXT_BARRIER_ID: AtomicI32 = AtomicI32::new(1);

/// Identifies a barrier in quiescence notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierId(i32);

impl BarrierId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BARRIER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for BarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "barrier#{}", self.0)
    }
}

/// Everything a worker needs to attach to a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierDescriptor {
    offset: usize,
    id: BarrierId,
    parties: usize,
}

impl BarrierDescriptor {
    /// Barrier id.
    pub fn id(&self) -> BarrierId {
        self.id
    }

    /// Number of workers that must check in.
    pub fn parties(&self) -> usize {
        self.parties
    }
}

/// Coordinator side of the barrier. Create it before any [`WorkerBarrier`].
pub struct CoordinatorBarrier {
    buffer: SharedBuffer,
    base: usize,
    parties: usize,
    id: BarrierId,
}

impl CoordinatorBarrier {
    /// Set up a barrier for `parties` workers at word `word_offset`.
    pub fn new(buffer: &SharedBuffer, word_offset: usize, parties: usize) -> Result<Self> {
        check_cells(buffer, word_offset, BARRIER_CELLS, "barrier")?;
        if parties == 0 || parties > i32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "barrier needs 1..=i32::MAX parties, got {parties}"
            )));
        }
        let barrier = Self {
            buffer: buffer.clone(),
            base: word_offset,
            parties,
            id: BarrierId::next(),
        };
        barrier.cell(COUNTDOWN).store(parties as i32, Ordering::SeqCst);
        barrier.cell(EPOCH).store(0, Ordering::SeqCst);
        Ok(barrier)
    }

    #[inline]
    fn cell(&self, which: usize) -> &AtomicI32 {
        self.buffer.word(self.base + which)
    }

    /// Barrier id.
    pub fn id(&self) -> BarrierId {
        self.id
    }

    /// Number of workers.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Descriptor for [`WorkerBarrier::attach`].
    pub fn descriptor(&self) -> BarrierDescriptor {
        BarrierDescriptor {
            offset: self.base,
            id: self.id,
            parties: self.parties,
        }
    }

    /// Have all workers checked in?
    pub fn is_quiescent(&self) -> bool {
        self.cell(COUNTDOWN).load(Ordering::SeqCst) == 0
    }

    /// Current epoch.
    pub fn epoch(&self) -> i32 {
        self.cell(EPOCH).load(Ordering::SeqCst)
    }

    /// Witness that every worker is parked here.
    ///
    /// Holding it borrows the barrier, so it cannot be released meanwhile.
    pub fn quiescence(&self) -> Option<Quiescence<'_>> {
        self.is_quiescent().then(Quiescence::witness)
    }

    /// Release the workers if all of them have checked in.
    ///
    /// Returns false, and does nothing, otherwise.
    pub fn release(&mut self) -> bool {
        if !self.is_quiescent() {
            return false;
        }
        self.cell(COUNTDOWN)
            .store(self.parties as i32, Ordering::SeqCst);
        let epoch = self.cell(EPOCH);
        epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = futex::wake(epoch, self.parties as u32) {
            warn!(barrier = %self.id, error = %e, "futex wake failed on release");
        }
        true
    }
}

impl fmt::Debug for CoordinatorBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBarrier")
            .field("id", &self.id)
            .field("parties", &self.parties)
            .field("countdown", &self.cell(COUNTDOWN).load(Ordering::Relaxed))
            .field("epoch", &self.cell(EPOCH).load(Ordering::Relaxed))
            .finish()
    }
}

/// Worker side of the barrier.
pub struct WorkerBarrier {
    buffer: SharedBuffer,
    base: usize,
    id: BarrierId,
    notifier: Notifier,
}

impl WorkerBarrier {
    /// Attach to a barrier set up by [`CoordinatorBarrier::new`].
    pub fn attach(
        buffer: &SharedBuffer,
        descriptor: BarrierDescriptor,
        notifier: Notifier,
    ) -> Self {
        Self {
            buffer: buffer.clone(),
            base: descriptor.offset,
            id: descriptor.id,
            notifier,
        }
    }

    #[inline]
    fn cell(&self, which: usize) -> &AtomicI32 {
        self.buffer.word(self.base + which)
    }

    /// Barrier id.
    pub fn id(&self) -> BarrierId {
        self.id
    }

    /// Check in and block until the coordinator releases the barrier.
    pub fn enter(&self) -> Result<()> {
        let epoch = self.cell(EPOCH);
        let seen = epoch.load(Ordering::SeqCst);
        if self.cell(COUNTDOWN).fetch_sub(1, Ordering::SeqCst) == 1 {
            trace!(barrier = %self.id, "last worker in");
            self.notifier.send(Notification::BarrierQuiescent(self.id))?;
        }
        while epoch.load(Ordering::SeqCst) == seen {
            futex::wait(epoch, seen)?;
        }
        Ok(())
    }
}
