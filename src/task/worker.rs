//! The worker thread.
//!
//! A worker alternates between two places: parked in the barrier, or
//! claiming work items. After every release it bumps the shared cursor;
//! a negative cursor means "leave the dispatch loop and read the inbox",
//! anything else means a dispatch is installed.
//!
//! ```text
//! spawn -> entry() -> enter barrier <-----------------------------+
//!                          |                                       |
//!                     fetch_add(next)                              |
//!                  < 0 /          \ >= 0                           |
//!                inbox             decode header + args once       |
//!          Transfer |  Shutdown    claim items until >= limit -----+
//!                   |      \
//!   register buffers, re-enter  exit
//! ```

use super::codec::{HandleTable, Value, decode};
use super::layout::{ControlLayout, DispatchMode, decode_header, load};
use super::registry::{FunctionRegistry, Invocation, Kernel};
use crate::error::{Error, Result};
use crate::memory::SharedBuffer;
use crate::observability::{WorkerMetrics, span_dispatch, span_worker};
use crate::sync::{BarrierDescriptor, Notifier, WorkerBarrier};
use smallvec::SmallVec;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

/// What a worker entry point gets to build its function registry.
#[derive(Debug, Clone)]
pub struct WorkerSetup {
    /// Worker index, `0..num_workers`.
    pub index: usize,
    /// Total number of workers.
    pub num_workers: usize,
    /// The runtime's control buffer.
    pub control: SharedBuffer,
    /// Notification sender, for kernels that attach locks or barriers.
    pub notifier: Notifier,
}

/// Builds a worker's function registry. Called once on each worker thread.
pub type WorkerEntry = Arc<dyn Fn(&WorkerSetup) -> Result<FunctionRegistry> + Send + Sync>;

/// Out-of-band command, read after the cursor goes negative.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Register these buffers under their handles, then rejoin the barrier.
    Transfer(Vec<(u32, SharedBuffer)>),
    /// Leave the worker loop.
    Shutdown,
}

enum Step {
    Barrier,
    Inbox,
}

pub(crate) struct Worker {
    setup: WorkerSetup,
    layout: ControlLayout,
    barrier: WorkerBarrier,
    registry: FunctionRegistry,
    handles: HandleTable,
    inbox: kanal::Receiver<WorkerCommand>,
    metrics: WorkerMetrics,
}

impl Worker {
    pub(crate) fn new(
        setup: WorkerSetup,
        layout: ControlLayout,
        barrier: BarrierDescriptor,
        inbox: kanal::Receiver<WorkerCommand>,
    ) -> Self {
        Self {
            barrier: WorkerBarrier::attach(&setup.control, barrier, setup.notifier.clone()),
            handles: HandleTable::new(setup.control.clone()),
            metrics: WorkerMetrics::new(setup.index),
            registry: FunctionRegistry::new(),
            layout,
            inbox,
            setup,
        }
    }

    /// Run until told to shut down.
    ///
    /// Errors from a dispatch are reported as faults and the worker carries
    /// on; only a broken barrier or channel ends the thread.
    pub(crate) fn run(mut self, entry: &WorkerEntry) -> Result<()> {
        let index = self.setup.index;
        let _span = span_worker(index).entered();

        match guarded("<entry>", || entry(&self.setup)) {
            Ok(registry) => {
                debug!(functions = registry.len(), "worker registry ready");
                self.registry = registry;
            }
            Err(e) => {
                warn!(error = %e, "worker entry failed");
                self.setup.notifier.fault(index, &e)?;
            }
        }

        loop {
            self.barrier.enter()?;
            if let Step::Barrier = self.dispatch()? {
                continue;
            }
            let command = self
                .inbox
                .recv()
                .map_err(|_| Error::Disconnected("worker inbox closed".into()))?;
            match command {
                WorkerCommand::Transfer(buffers) => {
                    debug!(count = buffers.len(), "buffers transferred");
                    for (handle, buffer) in buffers {
                        self.handles.insert(handle, buffer);
                    }
                }
                WorkerCommand::Shutdown => {
                    debug!("worker shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(&mut self) -> Result<Step> {
        let control = self.setup.control.clone();
        let item_size = load(&control, self.layout.item_size);
        let first = control
            .word(self.layout.next)
            .fetch_add(item_size, Ordering::SeqCst);
        if first < 0 {
            return Ok(Step::Inbox);
        }

        if let Err(e) = self.execute(&control, first, item_size) {
            if matches!(e, Error::Disconnected(_) | Error::System(_)) {
                return Err(e);
            }
            self.metrics.record_fault();
            debug!(error = %e, "dispatch failed");
            self.setup.notifier.fault(self.setup.index, &e)?;
        }
        Ok(Step::Barrier)
    }

    fn execute(&mut self, control: &SharedBuffer, first: i32, item_size: i32) -> Result<()> {
        let words = control.words();
        let header = load(control, self.layout.function);
        if header < 0 {
            return Err(Error::Protocol("released with no dispatch header".into()));
        }
        let (mode, function) = decode_header(words, header as usize)?;
        let args = decode(
            words,
            load(control, self.layout.arg_start) as usize,
            load(control, self.layout.arg_end) as usize,
            &self.handles,
        )?;

        let label = function
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<eval>".into());
        let _span = span_dispatch(mode.name(), &label).entered();

        let function = match (mode, function) {
            (DispatchMode::Eval, _) => {
                let source = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Protocol("eval dispatch without source".into()))?;
                let index = self.setup.index;
                let registry = &mut self.registry;
                return guarded("<eval>", || registry.eval(source, index));
            }
            (_, Some(function)) => function,
            (_, None) => return Err(Error::Protocol(format!("{mode} dispatch without function"))),
        };
        let kernel = self.registry.get(&function)?;

        if mode == DispatchMode::Broadcast {
            let invocation = Invocation {
                worker: self.setup.index,
                function: &function,
                output: None,
                bounds: SmallVec::new(),
                args: &args,
                notifier: &self.setup.notifier,
            };
            return call(kernel, &invocation);
        }

        let (output, rest) = args
            .split_first()
            .ok_or_else(|| Error::Protocol("build dispatch without output".into()))?;
        if item_size <= 0 {
            return Err(Error::Protocol(format!("build with item size {item_size}")));
        }
        let limit = load(control, self.layout.limit);
        let cursor = control.word(self.layout.next);
        let k = item_size as usize;

        let mut item = first;
        let mut claimed = 0;
        let result = loop {
            if item >= limit {
                break Ok(());
            }
            let at = item as usize;
            let Some(cells) = words.get(at..at + k) else {
                break Err(Error::Protocol(format!("work item at word {at} out of bounds")));
            };
            trace!(item = at, "claimed work item");
            let invocation = Invocation {
                worker: self.setup.index,
                function: &function,
                output: Some(output),
                bounds: cells.iter().map(|c| c.load(Ordering::Relaxed)).collect(),
                args: rest,
                notifier: &self.setup.notifier,
            };
            claimed += 1;
            if let Err(e) = call(kernel, &invocation) {
                break Err(e);
            }
            item = cursor.fetch_add(item_size, Ordering::SeqCst);
        };
        self.metrics.record_items(claimed);
        result
    }
}

fn call(kernel: &Kernel, invocation: &Invocation<'_>) -> Result<()> {
    guarded(&invocation.function().to_string(), || kernel(invocation))
}

/// Run `f`, turning a panic into a kernel error.
fn guarded<T>(function: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        Err(Error::kernel(function, format!("panicked: {message}")))
    })
}

/// Spawn worker `worker` on a named thread.
///
/// If the loop ends with an error, the coordinator is told before the
/// thread exits.
pub(crate) fn spawn(
    name: String,
    worker: Worker,
    entry: WorkerEntry,
) -> Result<JoinHandle<Result<()>>> {
    let handle = thread::Builder::new().name(name).spawn(move || {
        let index = worker.setup.index;
        let notifier = worker.setup.notifier.clone();
        let result = worker.run(&entry);
        if let Err(e) = &result {
            error!(worker = index, error = %e, "worker loop ended");
            let _ = notifier.fault(index, e);
        }
        result
    })?;
    Ok(handle)
}
