//! Asymmetric lock over three shared cells.
//!
//! Workers block in [`WorkerLock::lock`]; the coordinator never blocks. It
//! either gets the lock right away ([`CoordinatorLock::try_lock`]) or
//! registers interest ([`CoordinatorLock::async_lock`]) and is handed the
//! lock by the next worker that releases it.
//!
//! Cell layout:
//!
//! ```text
//! +-------+----------+----------+
//! | state | interest | owner_id |
//! +-------+----------+----------+
//! ```
//!
//! `state` is 0 (unlocked), 1 (locked) or 2 (locked, maybe waiters).
//! `interest` is 1 while the coordinator waits for a hand-off. A releasing
//! worker that sees interest passes the lock to the coordinator ahead of
//! any worker waiters, leaving `state` at 2 so the coordinator's release
//! wakes one of them. The lock is not recursive.

use super::{Dispatcher, Notification, Notifier, check_cells, futex};
use crate::error::{Error, Result};
use crate::memory::SharedBuffer;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::warn;

const STATE: usize = 0;
const INTEREST: usize = 1;
const OWNER: usize = 2;

/// Number of cells a lock occupies.
pub const LOCK_CELLS: usize = 3;

static NEXT_LOCK_ID: AtomicI32 = AtomicI32::new(1);

/// Identifies a lock in hand-off notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId(i32);

impl LockId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value, as stored in the `owner_id` cell.
    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

/// Location of a lock's cells, for building the worker side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDescriptor {
    offset: usize,
}

impl LockDescriptor {
    /// Word index of the first cell.
    pub fn word_offset(&self) -> usize {
        self.offset
    }
}

fn cell(buffer: &SharedBuffer, base: usize, which: usize) -> &AtomicI32 {
    buffer.word(base + which)
}

/// Coordinator-side release: drop to 0 and wake one worker if anyone waits.
fn release_cells(buffer: &SharedBuffer, base: usize) {
    let state = cell(buffer, base, STATE);
    if state.fetch_sub(1, Ordering::SeqCst) != 1 {
        state.store(0, Ordering::SeqCst);
        if let Err(e) = futex::wake(state, 1) {
            warn!(error = %e, "futex wake failed on lock release");
        }
    }
}

/// Result of [`CoordinatorLock::async_lock`].
#[derive(Debug)]
pub enum LockOutcome<R> {
    /// The lock was free; the body already ran.
    Acquired(R),
    /// The body runs when the hand-off notification is dispatched.
    Pending(LockTicket<R>),
}

impl<R> LockOutcome<R> {
    /// Did the body run synchronously?
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

/// One-shot handle on the result of a deferred critical section.
pub struct LockTicket<R> {
    id: LockId,
    rx: kanal::Receiver<R>,
}

impl<R> fmt::Debug for LockTicket<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTicket").field("id", &self.id).finish()
    }
}

impl<R> LockTicket<R> {
    /// The lock this ticket waits on.
    pub fn lock_id(&self) -> LockId {
        self.id
    }

    /// Take the result if the body has run.
    pub fn try_take(&self) -> Option<R> {
        match self.rx.try_recv() {
            Ok(Some(value)) => Some(value),
            _ => None,
        }
    }

    /// Dispatch notifications until the body has run.
    pub fn wait(self, dispatcher: &mut Dispatcher) -> Result<R> {
        loop {
            if let Some(value) = self.try_take() {
                return Ok(value);
            }
            let notification = dispatcher.next(None)?;
            dispatcher.dispatch(notification)?;
        }
    }
}

/// Coordinator side of the lock. Create it before any [`WorkerLock`].
pub struct CoordinatorLock {
    buffer: SharedBuffer,
    base: usize,
    id: LockId,
}

impl CoordinatorLock {
    /// Set up the lock's cells at word `word_offset` of `buffer`.
    pub fn new(buffer: &SharedBuffer, word_offset: usize) -> Result<Self> {
        check_cells(buffer, word_offset, LOCK_CELLS, "lock")?;
        let id = LockId::next();
        let lock = Self {
            buffer: buffer.clone(),
            base: word_offset,
            id,
        };
        lock.cell(STATE).store(0, Ordering::SeqCst);
        lock.cell(INTEREST).store(0, Ordering::SeqCst);
        lock.cell(OWNER).store(id.0, Ordering::SeqCst);
        Ok(lock)
    }

    #[inline]
    fn cell(&self, which: usize) -> &AtomicI32 {
        cell(&self.buffer, self.base, which)
    }

    /// Lock id.
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Descriptor for [`WorkerLock::attach`].
    pub fn descriptor(&self) -> LockDescriptor {
        LockDescriptor { offset: self.base }
    }

    /// Run `f` under the lock if it is free right now.
    ///
    /// Returns `None` without blocking if the lock is held.
    pub fn try_lock<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.cell(STATE)
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let result = f();
        release_cells(&self.buffer, self.base);
        Some(result)
    }

    /// Run `f` under the lock, now or once a worker hands the lock over.
    ///
    /// When the lock is held, `f` is parked in `dispatcher` under this
    /// lock's id and runs when the worker's hand-off notification is
    /// dispatched; the lock is released after `f` returns either way.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if a request on this lock is already pending.
    pub fn async_lock<R>(
        &self,
        dispatcher: &mut Dispatcher,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> Result<LockOutcome<R>>
    where
        R: Send + 'static,
    {
        if dispatcher.has_hand_off(self.id) {
            return Err(Error::Busy);
        }

        let state = self.cell(STATE);
        let interest = self.cell(INTEREST);
        interest.store(1, Ordering::SeqCst);
        loop {
            match state.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    if interest
                        .compare_exchange(1, 0, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        let result = f();
                        release_cells(&self.buffer, self.base);
                        return Ok(LockOutcome::Acquired(result));
                    }
                    // A releasing worker already claimed our interest and a
                    // hand-off is on its way; wait for it holding the lock.
                    return Ok(LockOutcome::Pending(self.park(dispatcher, f)));
                }
                Err(_) => {
                    let seen = state
                        .compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst)
                        .unwrap_or_else(|v| v);
                    if seen == 0 {
                        continue;
                    }
                    return Ok(LockOutcome::Pending(self.park(dispatcher, f)));
                }
            }
        }
    }

    fn park<R>(
        &self,
        dispatcher: &mut Dispatcher,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> LockTicket<R>
    where
        R: Send + 'static,
    {
        let (tx, rx) = kanal::bounded(1);
        let buffer = self.buffer.clone();
        let base = self.base;
        dispatcher.register_hand_off(
            self.id,
            Box::new(move || {
                let _ = tx.send(f());
                release_cells(&buffer, base);
            }),
        );
        LockTicket { id: self.id, rx }
    }

    /// Is the lock currently held by anyone?
    pub fn is_locked(&self) -> bool {
        self.cell(STATE).load(Ordering::SeqCst) != 0
    }
}

impl fmt::Debug for CoordinatorLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorLock")
            .field("id", &self.id)
            .field("offset", &self.base)
            .field("state", &self.cell(STATE).load(Ordering::Relaxed))
            .finish()
    }
}

/// Worker side of the lock.
pub struct WorkerLock {
    buffer: SharedBuffer,
    base: usize,
    id: LockId,
    notifier: Notifier,
}

impl WorkerLock {
    /// Attach to a lock set up by [`CoordinatorLock::new`].
    pub fn attach(buffer: &SharedBuffer, descriptor: LockDescriptor, notifier: Notifier) -> Self {
        let id = LockId(cell(buffer, descriptor.offset, OWNER).load(Ordering::SeqCst));
        Self {
            buffer: buffer.clone(),
            base: descriptor.offset,
            id,
            notifier,
        }
    }

    #[inline]
    fn cell(&self, which: usize) -> &AtomicI32 {
        cell(&self.buffer, self.base, which)
    }

    /// Block until the lock is acquired.
    pub fn lock(&self) -> Result<WorkerLockGuard<'_>> {
        let state = self.cell(STATE);
        if let Err(mut c) = state.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst) {
            loop {
                if c == 2
                    || state
                        .compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst)
                        .unwrap_or_else(|v| v)
                        != 0
                {
                    futex::wait(state, 2)?;
                }
                match state.compare_exchange(0, 2, Ordering::SeqCst, Ordering::SeqCst) {
                    Ok(_) => break,
                    Err(v) => c = v,
                }
            }
        }
        Ok(WorkerLockGuard { lock: self })
    }

    fn unlock_inner(&self) -> Result<()> {
        let state = self.cell(STATE);
        if state.fetch_sub(1, Ordering::SeqCst) != 1 {
            if self
                .cell(INTEREST)
                .compare_exchange(1, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // Still held: ownership moves to the coordinator. Waiters
                // may be parked, so state stays 2 and the coordinator's
                // release wakes one of them.
                state.store(2, Ordering::SeqCst);
                return self.notifier.send(Notification::LockHandOff(self.id));
            }
            state.store(0, Ordering::SeqCst);
            futex::wake(state, 1)?;
        }
        Ok(())
    }
}

/// Holds a [`WorkerLock`]; releases it on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WorkerLockGuard<'a> {
    lock: &'a WorkerLock,
}

impl WorkerLockGuard<'_> {
    /// Release the lock, reporting failures instead of logging them.
    pub fn unlock(self) -> Result<()> {
        let lock = self.lock;
        std::mem::forget(self);
        lock.unlock_inner()
    }
}

impl Drop for WorkerLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock_inner() {
            warn!(lock = %self.lock.id, error = %e, "worker unlock failed");
        }
    }
}
