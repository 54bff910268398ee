//! Integration tests for the shared-cell primitives under real contention.
//!
//! These tests run the lock, both barriers and the bump allocator from
//! several OS threads at once, the way a runtime's workers use them.

use multicore::memory::{BumpAllocator, ElementType, Quiescence, SharedBuffer};
use multicore::sync::{
    CoordinatorBarrier, CoordinatorLock, Dispatcher, LockOutcome, Notification, WorkerBarrier,
    WorkerLock, WorkerOnlyBarrier,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Lock
// ============================================================================

/// Workers incrementing a plain (non-atomic RMW) counter under the lock
/// never lose an update.
#[test]
fn test_lock_mutual_exclusion() {
    const WORKERS: usize = 4;
    const ROUNDS: usize = 2000;

    let buffer = SharedBuffer::heap(256).unwrap();
    let lock = CoordinatorLock::new(&buffer, 0).unwrap();
    let dispatcher = Dispatcher::new();
    let counter_cell = 16;

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let worker = WorkerLock::attach(&buffer, lock.descriptor(), dispatcher.notifier());
            let buffer = buffer.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let guard = worker.lock().unwrap();
                    let cell = buffer.word(counter_cell);
                    let v = cell.load(Ordering::Relaxed);
                    cell.store(v + 1, Ordering::Relaxed);
                    guard.unlock().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(
        buffer.word(counter_cell).load(Ordering::SeqCst),
        (WORKERS * ROUNDS) as i32
    );
    assert!(!lock.is_locked());
}

/// The coordinator's critical sections interleave with the workers' and
/// see the counter consistently.
#[test]
fn test_coordinator_async_lock_under_contention() {
    const WORKERS: usize = 3;
    const ROUNDS: usize = 500;

    let buffer = SharedBuffer::heap(256).unwrap();
    let lock = CoordinatorLock::new(&buffer, 4).unwrap();
    let mut dispatcher = Dispatcher::new();
    let counter_cell = 20;

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let worker = WorkerLock::attach(&buffer, lock.descriptor(), dispatcher.notifier());
            let buffer = buffer.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let guard = worker.lock().unwrap();
                    let cell = buffer.word(counter_cell);
                    cell.store(cell.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
                    drop(guard);
                }
            })
        })
        .collect();

    let mut coordinator_adds = 0;
    for _ in 0..50 {
        let cell_buffer = buffer.clone();
        let body = move || {
            let cell = cell_buffer.word(counter_cell);
            cell.store(cell.load(Ordering::Relaxed) + 1000, Ordering::Relaxed);
        };
        match lock.async_lock(&mut dispatcher, body).unwrap() {
            LockOutcome::Acquired(()) => {}
            LockOutcome::Pending(ticket) => ticket.wait(&mut dispatcher).unwrap(),
        }
        coordinator_adds += 1;
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(
        buffer.word(counter_cell).load(Ordering::SeqCst),
        (WORKERS * ROUNDS + coordinator_adds * 1000) as i32
    );
    assert_eq!(dispatcher.pending_hand_offs(), 0);
    assert!(!lock.is_locked());
}

/// A worker parked on the futex is woken once the coordinator releases a
/// lock it was handed.
#[test]
fn test_hand_off_wakes_parked_worker() {
    let buffer = SharedBuffer::heap(256).unwrap();
    let lock = CoordinatorLock::new(&buffer, 8).unwrap();
    let mut dispatcher = Dispatcher::new();
    let state_cell = 8;

    let holder = WorkerLock::attach(&buffer, lock.descriptor(), dispatcher.notifier());
    let guard = holder.lock().unwrap();

    let acquired = Arc::new(AtomicUsize::new(0));
    let waiter = {
        let worker = WorkerLock::attach(&buffer, lock.descriptor(), dispatcher.notifier());
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            let guard = worker.lock().unwrap();
            acquired.store(1, Ordering::SeqCst);
            drop(guard);
        })
    };

    // The waiter has marked the lock contended; give it time to park.
    while buffer.word(state_cell).load(Ordering::SeqCst) != 2 {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(20));

    let seen = Arc::clone(&acquired);
    let ticket = match lock
        .async_lock(&mut dispatcher, move || seen.load(Ordering::SeqCst))
        .unwrap()
    {
        LockOutcome::Pending(ticket) => ticket,
        LockOutcome::Acquired(_) => panic!("lock was held by a worker"),
    };

    drop(guard);
    assert!(lock.is_locked());
    assert_eq!(acquired.load(Ordering::SeqCst), 0);

    let notification = dispatcher.next(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(notification, Notification::LockHandOff(lock.id()));
    dispatcher.dispatch(notification).unwrap();
    assert_eq!(ticket.try_take(), Some(0), "body ran before the waiter");
    assert_eq!(dispatcher.pending_hand_offs(), 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    while acquired.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "parked worker never woke");
        thread::sleep(Duration::from_millis(1));
    }
    waiter.join().unwrap();
    assert!(!lock.is_locked());
    assert!(dispatcher.try_next().unwrap().is_none());
}

// ============================================================================
// Barriers
// ============================================================================

/// Several rounds of rendezvous; workers never pass before the release.
#[test]
fn test_barrier_rounds() {
    const WORKERS: usize = 4;
    const ROUNDS: usize = 5;

    let buffer = SharedBuffer::heap(64).unwrap();
    let mut barrier = CoordinatorBarrier::new(&buffer, 0, WORKERS).unwrap();
    let dispatcher = Dispatcher::new();
    let passes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let worker = WorkerBarrier::attach(&buffer, barrier.descriptor(), dispatcher.notifier());
            let passes = Arc::clone(&passes);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    worker.enter().unwrap();
                    passes.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for round in 0..ROUNDS {
        let notification = dispatcher.next(Some(Duration::from_secs(10))).unwrap();
        assert_eq!(notification, Notification::BarrierQuiescent(barrier.id()));
        assert_eq!(passes.load(Ordering::SeqCst), round * WORKERS);
        assert!(barrier.release());
        // Wait for the round to finish passing before the next check.
        while passes.load(Ordering::SeqCst) < (round + 1) * WORKERS {
            thread::yield_now();
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(barrier.epoch(), ROUNDS as i32);
}

/// The worker-only barrier can be reused back to back with no coordinator.
#[test]
fn test_worker_only_barrier_reuse() {
    const WORKERS: usize = 5;
    const ROUNDS: usize = 50;

    let buffer = SharedBuffer::heap(64).unwrap();
    let descriptor = WorkerOnlyBarrier::initialize(&buffer, 2, WORKERS).unwrap();
    let arrivals = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let barrier = WorkerOnlyBarrier::attach(&buffer, descriptor);
            let arrivals = Arc::clone(&arrivals);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    arrivals.fetch_add(1, Ordering::SeqCst);
                    barrier.enter().unwrap();
                    // Everyone from this round has arrived.
                    assert!(arrivals.load(Ordering::SeqCst) >= (round + 1) * WORKERS);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(arrivals.load(Ordering::SeqCst), WORKERS * ROUNDS);
}

// ============================================================================
// Bump allocator
// ============================================================================

/// Concurrent allocations from attached handles never overlap.
#[test]
fn test_concurrent_allocations_are_disjoint() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 100;

    let buffer = SharedBuffer::heap(64 * 1024).unwrap();
    let arena = BumpAllocator::initialize(&buffer, 0, 64 * 1024).unwrap();
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let arena = BumpAllocator::attach(&buffer, arena.descriptor());
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                (0..PER_THREAD)
                    .map(|i| {
                        let size = 8 * (1 + (t + i) % 3);
                        (arena.allocate(size).unwrap(), size)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut spans: Vec<(usize, usize)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlap: {pair:?}");
    }
    let unique: HashSet<usize> = spans.iter().map(|s| s.0).collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);
    assert!(spans.iter().all(|&(offset, _)| offset != 0 && offset % 8 == 0));
}

/// Rolling back to a mark lets the same layout be rebuilt exactly.
#[test]
fn test_reset_rebuilds_same_layout() {
    let buffer = SharedBuffer::heap(4096).unwrap();
    let arena = BumpAllocator::initialize(&buffer, 0, 4096).unwrap();
    arena.allocate(32).unwrap();
    let mark = arena.mark();

    let layout = |arena: &BumpAllocator| {
        (
            arena.alloc(ElementType::Int32, 7).unwrap(),
            arena.alloc(ElementType::Float64, 3).unwrap(),
            arena.alloc(ElementType::Uint8, 5).unwrap(),
        )
    };
    let first = layout(&arena);
    let witness = unsafe { Quiescence::assume() };
    for _ in 0..3 {
        arena.release(mark, &witness);
        assert_eq!(layout(&arena), first);
    }
}
