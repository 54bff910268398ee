//! Futex wait/wake on shared cells.
//!
//! The cells may live in a memfd mapping shared with another process, so
//! the private-futex flag is never set.

use rustix::io::Errno;
use rustix::thread::futex;
use std::sync::atomic::{AtomicI32, AtomicU32};

#[inline]
fn as_futex_word(cell: &AtomicI32) -> &AtomicU32 {
    // SAFETY: AtomicI32 and AtomicU32 have identical size and alignment.
    unsafe { &*(cell as *const AtomicI32).cast::<AtomicU32>() }
}

/// Block while `cell` holds `expected`.
///
/// Returns immediately if the value already differs. Spurious wakeups are
/// possible; callers re-check the condition in a loop.
pub fn wait(cell: &AtomicI32, expected: i32) -> rustix::io::Result<()> {
    match futex::wait(as_futex_word(cell), futex::Flags::empty(), expected as u32, None) {
        Ok(()) | Err(Errno::AGAIN) | Err(Errno::INTR) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Wake up to `count` agents blocked on `cell`; returns how many woke.
pub fn wake(cell: &AtomicI32, count: u32) -> rustix::io::Result<usize> {
    futex::wake(as_futex_word(cell), futex::Flags::empty(), count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_when_value_differs() {
        let cell = AtomicI32::new(1);
        wait(&cell, 0).unwrap();
    }

    #[test]
    fn test_wake_releases_waiter() {
        let cell = Arc::new(AtomicI32::new(0));
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                while cell.load(Ordering::SeqCst) == 0 {
                    wait(&cell, 0).unwrap();
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        cell.store(1, Ordering::SeqCst);
        wake(&cell, 1).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_wake_without_waiters() {
        let cell = AtomicI32::new(0);
        assert_eq!(wake(&cell, 4).unwrap(), 0);
    }
}
