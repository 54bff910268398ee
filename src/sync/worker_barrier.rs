//! Self-releasing barrier among workers only.
//!
//! Same `countdown`/`epoch` cells as the coordinator barrier plus a third
//! cell holding the party count. The last worker in resets the countdown,
//! bumps the epoch and wakes the others, so the barrier can be entered
//! again right away.

use super::{check_cells, futex};
use crate::error::{Error, Result};
use crate::memory::SharedBuffer;
use std::sync::atomic::{AtomicI32, Ordering};

const COUNTDOWN: usize = 0;
const EPOCH: usize = 1;
const PARTIES: usize = 2;

/// Number of cells a worker-only barrier occupies.
pub const WORKER_BARRIER_CELLS: usize = 3;

/// Location of a worker-only barrier's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOnlyDescriptor {
    offset: usize,
}

/// An N-party barrier with no coordinator involvement.
pub struct WorkerOnlyBarrier {
    buffer: SharedBuffer,
    base: usize,
}

impl WorkerOnlyBarrier {
    /// Write the cells for a `parties`-way barrier at word `word_offset`.
    ///
    /// Must complete before any worker attaches.
    pub fn initialize(
        buffer: &SharedBuffer,
        word_offset: usize,
        parties: usize,
    ) -> Result<WorkerOnlyDescriptor> {
        check_cells(buffer, word_offset, WORKER_BARRIER_CELLS, "worker barrier")?;
        if parties == 0 || parties > i32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "worker barrier needs 1..=i32::MAX parties, got {parties}"
            )));
        }
        let words = buffer.words();
        words[word_offset + COUNTDOWN].store(parties as i32, Ordering::SeqCst);
        words[word_offset + EPOCH].store(0, Ordering::SeqCst);
        words[word_offset + PARTIES].store(parties as i32, Ordering::SeqCst);
        Ok(WorkerOnlyDescriptor {
            offset: word_offset,
        })
    }

    /// Attach to an initialised barrier.
    pub fn attach(buffer: &SharedBuffer, descriptor: WorkerOnlyDescriptor) -> Self {
        Self {
            buffer: buffer.clone(),
            base: descriptor.offset,
        }
    }

    #[inline]
    fn cell(&self, which: usize) -> &AtomicI32 {
        self.buffer.word(self.base + which)
    }

    /// Number of parties.
    pub fn parties(&self) -> usize {
        self.cell(PARTIES).load(Ordering::SeqCst) as usize
    }

    /// Check in and block until every party has.
    pub fn enter(&self) -> Result<()> {
        let epoch = self.cell(EPOCH);
        let seen = epoch.load(Ordering::SeqCst);
        if self.cell(COUNTDOWN).fetch_sub(1, Ordering::SeqCst) == 1 {
            let parties = self.cell(PARTIES).load(Ordering::SeqCst);
            self.cell(COUNTDOWN).store(parties, Ordering::SeqCst);
            epoch.fetch_add(1, Ordering::SeqCst);
            futex::wake(epoch, (parties - 1).max(0) as u32)?;
            return Ok(());
        }
        while epoch.load(Ordering::SeqCst) == seen {
            futex::wait(epoch, seen)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_single_party_passes_through() {
        let buffer = SharedBuffer::heap(32).unwrap();
        let desc = WorkerOnlyBarrier::initialize(&buffer, 1, 1).unwrap();
        let barrier = WorkerOnlyBarrier::attach(&buffer, desc);
        barrier.enter().unwrap();
        barrier.enter().unwrap();
        assert_eq!(barrier.parties(), 1);
    }

    #[test]
    fn test_rejects_zero_parties() {
        let buffer = SharedBuffer::heap(32).unwrap();
        assert!(WorkerOnlyBarrier::initialize(&buffer, 0, 0).is_err());
    }

    #[test]
    fn test_phases_do_not_overlap() {
        const WORKERS: usize = 4;
        const ROUNDS: usize = 50;

        let buffer = SharedBuffer::heap(64).unwrap();
        let desc = WorkerOnlyBarrier::initialize(&buffer, 0, WORKERS).unwrap();
        let arrivals = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let barrier = WorkerOnlyBarrier::attach(&buffer, desc);
                let arrivals = Arc::clone(&arrivals);
                thread::spawn(move || {
                    for round in 0..ROUNDS {
                        arrivals.fetch_add(1, Ordering::SeqCst);
                        barrier.enter().unwrap();
                        // Everyone has arrived for this round, nobody for the next.
                        let seen = arrivals.load(Ordering::SeqCst);
                        assert!(seen >= (round + 1) * WORKERS);
                        assert!(seen <= (round + 2) * WORKERS);
                        barrier.enter().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(arrivals.load(Ordering::SeqCst), WORKERS * ROUNDS);
    }
}
