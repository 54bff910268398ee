//! End-to-end tests of the task distributor.
//!
//! Each test starts a small heap-backed runtime, submits builds,
//! broadcasts or evals, and checks what the workers wrote into shared
//! buffers.

use multicore::prelude::*;
use multicore::task::Kernel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn int_view(len: usize) -> TypedView {
    TypedView::whole(SharedBuffer::heap(len * 4).unwrap(), ElementType::Int32)
}

/// Kernel writing each index's slice length into the output and counting
/// hits per index in the view passed as argument 0.
fn record_kernel(calls: Arc<AtomicUsize>) -> impl Fn(&Invocation<'_>) -> Result<()> + Send {
    move |inv| {
        let range = inv
            .range()
            .ok_or_else(|| Error::kernel("record", "expected a 1-D item"))?;
        let out = inv.output_view()?;
        let hits = inv
            .view(0)?
            .as_i32()
            .ok_or_else(|| Error::kernel("record", "hits must be Int32"))?;
        for i in range.clone() {
            out.set(i as usize, (range.end - range.start) as f64);
            hits[i as usize].fetch_add(1, Ordering::Relaxed);
        }
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Builds
// ============================================================================

/// Four workers over [0, 100): sixteen items, four of 7 and twelve of 6,
/// every index covered exactly once.
#[test]
fn test_four_workers_hundred_indices() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut runtime = {
        let calls = Arc::clone(&calls);
        Multicore::new(RuntimeConfig::testing(4), move |_| {
            let mut registry = FunctionRegistry::new();
            registry.register("record", record_kernel(Arc::clone(&calls)));
            Ok(registry)
        })
        .unwrap()
    };

    let out = int_view(100);
    let hits = int_view(100);
    let task = Task::build("record", out.clone(), IndexSpace::one(0..100).unwrap())
        .arg(hits.clone());
    let mut ticket = runtime.submit(task).unwrap().into_ticket();
    runtime.wait(&mut ticket).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 16);
    assert!(hits.to_vec().iter().all(|&h| h == 1.0));
    let sizes = out.to_vec();
    assert_eq!(sizes.iter().filter(|&&s| s == 7.0).count(), 28);
    assert_eq!(sizes.iter().filter(|&&s| s == 6.0).count(), 72);
    assert!(sizes[..28].iter().all(|&s| s == 7.0));

    runtime.shutdown().unwrap();
}

/// A 2-D build covers the product space once, rows outer.
#[test]
fn test_two_dimensional_coverage() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(2), |_| {
        let mut registry = FunctionRegistry::new();
        registry.register("cover", |inv| {
            let (rows, cols) = inv
                .ranges_2d()
                .ok_or_else(|| Error::kernel("cover", "expected a 2-D item"))?;
            let width = inv.int(0)? as usize;
            let out = inv
                .output_view()?
                .as_i32()
                .ok_or_else(|| Error::kernel("cover", "output must be Int32"))?;
            for y in rows {
                for x in cols.clone() {
                    out[y as usize * width + x as usize].fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();

    let (height, width) = (10, 13);
    let out = int_view(height * width);
    let space = IndexSpace::two(0..height as i32, 0..width as i32).unwrap();
    let mut ticket = runtime
        .submit(Task::build("cover", out.clone(), space).arg(width as i32))
        .unwrap()
        .into_ticket();
    runtime.wait(&mut ticket).unwrap();

    assert!(out.to_vec().iter().all(|&v| v == 1.0));
    runtime.shutdown().unwrap();
}

/// Mixed argument kinds arrive intact on every item.
#[test]
fn test_arguments_reach_kernel() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(3), |_| {
        let mut registry = FunctionRegistry::new();
        registry.register("check", |inv| {
            let ok = inv.number(0)? == 0.1
                && inv.arg(1)?.as_str() == Some("héllo")
                && inv.arg(2)?.as_bool() == Some(true)
                && *inv.arg(3)? == Value::Null
                && inv.int(4)? == -7;
            let out = inv.output_view()?;
            for i in inv.range().unwrap_or_default() {
                out.set(i as usize, if ok { 1.0 } else { -1.0 });
            }
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();

    let out = TypedView::whole(SharedBuffer::heap(8 * 40).unwrap(), ElementType::Float64);
    let task = Task::build("check", out.clone(), IndexSpace::one(0..40).unwrap())
        .arg(0.1)
        .arg("héllo")
        .arg(true)
        .arg(Value::Null)
        .arg(-7);
    let mut ticket = runtime.submit(task).unwrap().into_ticket();
    runtime.wait(&mut ticket).unwrap();
    assert!(out.to_vec().iter().all(|&v| v == 1.0));
    runtime.shutdown().unwrap();
}

/// An empty space completes without calling the function.
#[test]
fn test_empty_space_completes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut runtime = {
        let calls = Arc::clone(&calls);
        Multicore::new(RuntimeConfig::testing(2), move |_| {
            let calls = Arc::clone(&calls);
            let mut registry = FunctionRegistry::new();
            registry.register("never", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(registry)
        })
        .unwrap()
    };

    let mut ticket = runtime
        .submit(Task::build("never", int_view(1), IndexSpace::one(5..5).unwrap()))
        .unwrap()
        .into_ticket();
    runtime.wait(&mut ticket).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    runtime.shutdown().unwrap();
}

// ============================================================================
// Broadcast and eval
// ============================================================================

/// Broadcast runs exactly once on each worker.
#[test]
fn test_broadcast_counter() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(4), |_| {
        let mut registry = FunctionRegistry::new();
        registry.register("bump", |inv| {
            assert!(inv.output().is_none());
            assert!(inv.bounds().is_empty());
            let counter = inv
                .arg(0)?
                .as_buffer()
                .ok_or_else(|| Error::kernel("bump", "expected a buffer"))?;
            counter.word(0).fetch_add(1, Ordering::SeqCst);
            counter.word(1 + inv.worker()).fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();

    let counter = SharedBuffer::heap(64).unwrap();
    let mut ticket = runtime
        .broadcast(|_| Ok(()), "bump", vec![Value::from(counter.clone())])
        .unwrap()
        .into_ticket();
    runtime.wait(&mut ticket).unwrap();
    assert_eq!(counter.word(0).load(Ordering::SeqCst), 4);
    let per_worker: Vec<i32> = (1..=4)
        .map(|slot| counter.word(slot).load(Ordering::SeqCst))
        .collect();
    assert_eq!(per_worker, vec![1, 1, 1, 1]);
    runtime.shutdown().unwrap();
}

/// Numbered functions are found without a name.
#[test]
fn test_numbered_function() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(2), |setup| {
        let index = setup.index;
        let mut registry = FunctionRegistry::new();
        registry.register_numbered(42, move |inv| {
            let slots = inv.view(0)?;
            slots.set(index, 42.0);
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();

    let slots = int_view(2);
    let mut ticket = runtime
        .submit(Task::broadcast(42u32).arg(slots.clone()))
        .unwrap()
        .into_ticket();
    runtime.wait(&mut ticket).unwrap();
    assert_eq!(slots.to_vec(), vec![42.0, 42.0]);
    runtime.shutdown().unwrap();
}

/// Functions defined through eval are callable by later dispatches.
#[test]
fn test_eval_defines_functions() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(3), |_| {
        let mut registry = FunctionRegistry::new();
        // "name value": define `name` to fill its output with `value`.
        registry.set_evaluator(|source: &str, registry: &mut FunctionRegistry, _: usize| {
            let mut parts = source.split_whitespace();
            let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                return Err(Error::kernel("<eval>", format!("cannot parse {source:?}")));
            };
            let value: f64 = value
                .parse()
                .map_err(|_| Error::kernel("<eval>", "bad value"))?;
            registry.register(name, move |inv| {
                let out = inv.output_view()?;
                for i in inv.range().unwrap_or_default() {
                    out.set(i as usize, value);
                }
                Ok(())
            });
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();

    let mut ticket = runtime.eval(|_| Ok(()), "fill_nine 9").unwrap().into_ticket();
    runtime.wait(&mut ticket).unwrap();

    let out = int_view(50);
    let mut ticket = runtime
        .submit(Task::build("fill_nine", out.clone(), IndexSpace::one(0..50).unwrap()))
        .unwrap()
        .into_ticket();
    runtime.wait(&mut ticket).unwrap();
    assert!(out.to_vec().iter().all(|&v| v == 9.0));
    runtime.shutdown().unwrap();
}

// ============================================================================
// Queueing and buffer transfer
// ============================================================================

/// Submissions while busy are queued and complete in order; done callbacks
/// can submit more work.
#[test]
fn test_queue_runs_in_order() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(2), |_| {
        let mut registry = FunctionRegistry::new();
        registry.register("fill", |inv| {
            let value = inv.number(0)?;
            let out = inv.output_view()?;
            for i in inv.range().unwrap_or_default() {
                out.set(i as usize, value);
            }
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();
    runtime.wait_idle().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let out = int_view(64);
    let space = || IndexSpace::one(0..64).unwrap();

    let mut tickets = Vec::new();
    for n in 1..=3 {
        let order = Arc::clone(&order);
        let task = Task::build("fill", out.clone(), space())
            .arg(n)
            .on_done(move |_| {
                order.lock().unwrap().push(n);
                Ok(())
            });
        let submission = runtime.submit(task).unwrap();
        if n == 1 {
            assert!(!submission.is_queued());
        } else {
            assert!(matches!(
                submission,
                Submission::Queued { position, .. } if position == n as usize - 2
            ));
        }
        tickets.push(submission.into_ticket());
    }

    // The last done callback chains one more build.
    let chained = {
        let order = Arc::clone(&order);
        let out = out.clone();
        Task::build("fill", out.clone(), space())
            .arg(4)
            .on_done(move |runtime| {
                order.lock().unwrap().push(4);
                let order = Arc::clone(&order);
                runtime.submit(Task::build("fill", out, IndexSpace::one(0..64)?).arg(5).on_done(
                    move |_| {
                        order.lock().unwrap().push(5);
                        Ok(())
                    },
                ))?;
                Ok(())
            })
    };
    runtime.submit(chained).unwrap();

    runtime.wait_idle().unwrap();
    for ticket in &mut tickets {
        assert!(ticket.try_take().unwrap().is_ok());
    }
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert!(out.to_vec().iter().all(|&v| v == 5.0));
    runtime.shutdown().unwrap();
}

/// New buffers are handed over between dispatches; a buffer seen before is
/// not transferred again and still resolves on the workers.
#[test]
fn test_buffers_transferred_mid_run() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(3), |_| {
        let mut registry = FunctionRegistry::new();
        registry.register("copy", |inv| {
            let src = inv.view(0)?;
            let dst = inv.output_view()?;
            for i in inv.range().unwrap_or_default() {
                let v = src.get(i as usize).unwrap_or(f64::NAN);
                dst.set(i as usize, v + 1.0);
            }
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();

    let a = int_view(30);
    for i in 0..30 {
        a.set(i, i as f64);
    }
    let b = int_view(30);
    let c = int_view(30);

    // a and b are new here.
    let mut t1 = runtime
        .submit(Task::build("copy", b.clone(), IndexSpace::one(0..30).unwrap()).arg(a.clone()))
        .unwrap()
        .into_ticket();
    runtime.wait(&mut t1).unwrap();

    // Only c is new; b is reused as the source.
    let mut t2 = runtime
        .submit(Task::build("copy", c.clone(), IndexSpace::one(0..30).unwrap()).arg(b.clone()))
        .unwrap()
        .into_ticket();
    runtime.wait(&mut t2).unwrap();

    let expected: Vec<f64> = (0..30).map(|i| i as f64 + 2.0).collect();
    assert_eq!(c.to_vec(), expected);
    runtime.shutdown().unwrap();
}

// ============================================================================
// Failures
// ============================================================================

fn failing_runtime(workers: usize, kernel: Kernel) -> Multicore {
    let kernel = Arc::new(Mutex::new(Some(kernel)));
    Multicore::new(RuntimeConfig::testing(workers), move |setup| {
        let mut registry = FunctionRegistry::new();
        registry.register("ok", |_| Ok(()));
        // Only worker 0 gets the failing function; the others report it
        // as unknown, which is just as fatal.
        if setup.index == 0 {
            if let Some(kernel) = kernel.lock().unwrap().take() {
                registry.register("fail", kernel);
            }
        }
        Ok(registry)
    })
    .unwrap()
}

/// A kernel error poisons the runtime; every later call sees it.
#[test]
fn test_kernel_error_poisons_runtime() {
    let mut runtime = failing_runtime(
        2,
        Box::new(|_: &Invocation<'_>| Err(Error::kernel("fail", "boom"))),
    );

    let mut ticket = runtime
        .submit(Task::broadcast("fail"))
        .unwrap()
        .into_ticket();
    let err = runtime.wait(&mut ticket).unwrap_err();
    assert!(matches!(err, Error::WorkerFault { .. }));
    assert!(err.is_fatal());

    let again = runtime.submit(Task::broadcast("ok")).unwrap_err();
    assert_eq!(again.to_string(), err.to_string());
    assert!(runtime.pump().is_err());

    let shutdown = runtime.shutdown().unwrap_err();
    assert_eq!(shutdown.to_string(), err.to_string());
}

/// A panicking kernel is reported, not propagated into the worker thread.
#[test]
fn test_kernel_panic_is_reported() {
    let mut runtime = failing_runtime(
        1,
        Box::new(|_: &Invocation<'_>| -> Result<()> { panic!("kernel exploded") }),
    );

    let mut ticket = runtime
        .submit(Task::broadcast("fail"))
        .unwrap()
        .into_ticket();
    match runtime.wait(&mut ticket) {
        Err(Error::WorkerFault { worker: 0, message }) => {
            assert!(message.contains("kernel exploded"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(runtime.shutdown().is_err());
}

/// Queued tasks fail with the poisoning error.
#[test]
fn test_queued_tickets_fail_on_poison() {
    let mut runtime = failing_runtime(
        1,
        Box::new(|_: &Invocation<'_>| Err(Error::kernel("fail", "no"))),
    );
    runtime.wait_idle().unwrap();

    let mut first = runtime
        .submit(Task::broadcast("fail"))
        .unwrap()
        .into_ticket();
    let mut second = runtime
        .submit(Task::broadcast("ok"))
        .unwrap()
        .into_ticket();

    assert!(runtime.wait(&mut first).is_err());
    assert!(matches!(
        second.try_take(),
        Some(Err(Error::WorkerFault { .. }))
    ));
    drop(runtime);
}

/// Dropping an idle runtime stops its workers.
#[test]
fn test_drop_when_idle() {
    let mut runtime = Multicore::new(RuntimeConfig::testing(2), |_| Ok(FunctionRegistry::new()))
        .unwrap();
    runtime.wait_idle().unwrap();
    drop(runtime);
}

/// The memfd backing works the same as the heap.
#[test]
fn test_memfd_backed_runtime() {
    let config = RuntimeConfig {
        backing: Backing::Memfd,
        ..RuntimeConfig::testing(2)
    };
    let mut runtime = Multicore::new(config, |_| {
        let mut registry = FunctionRegistry::new();
        registry.register("ones", |inv| {
            let out = inv.output_view()?;
            for i in inv.range().unwrap_or_default() {
                out.set(i as usize, 1.0);
            }
            Ok(())
        });
        Ok(registry)
    })
    .unwrap();

    let out = TypedView::whole(SharedBuffer::new(64).unwrap(), ElementType::Uint8);
    let mut ticket = runtime
        .submit(Task::build("ones", out.clone(), IndexSpace::one(0..64).unwrap()))
        .unwrap()
        .into_ticket();
    runtime.wait(&mut ticket).unwrap();
    assert!(out.to_vec().iter().all(|&v| v == 1.0));
    runtime.shutdown().unwrap();
}
