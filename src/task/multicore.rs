//! The coordinator side of the task distributor.
//!
//! [`Multicore`] owns the control buffer, the barrier every worker parks
//! in, and the submission queue. Only one dispatch is installed at a time:
//!
//! ```text
//!            submit                 quiescent                quiescent
//!   Idle ─────────────> Running ─────────────> Idle ... ─────────────> (next)
//!     │ new buffers                    ^
//!     └──────> Transferring ───────────┘
//!                     quiescent: install + release
//! ```
//!
//! Nothing here blocks except [`wait`](Multicore::wait),
//! [`wait_idle`](Multicore::wait_idle) and [`shutdown`](Multicore::shutdown).
//! Completions are driven by [`pump`](Multicore::pump).

use super::codec::{BufferTable, Value, encode, encoded_len};
use super::layout::{
    CONTROL_CELLS, ControlLayout, DispatchMode, FunctionId, encode_header, header_len,
};
use super::registry::FunctionRegistry;
use super::space::{IndexSpace, WorkItem};
use super::ticket::{Completer, Submission, TaskId, Ticket};
use super::worker::{self, Worker, WorkerCommand, WorkerEntry, WorkerSetup};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::memory::{BumpAllocator, Mark, SharedBuffer};
use crate::observability::{
    DispatchTimer, record_dispatch, record_queue_depth, record_transfer, trace_complete,
    trace_install, trace_phase_change,
};
use crate::sync::{CoordinatorBarrier, Dispatcher, Notification, Notifier};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Callback run on the coordinator with the runtime borrowed mutably.
pub type Callback = Box<dyn FnOnce(&mut Multicore) -> Result<()> + Send>;

const SETTLE_POLL: Duration = Duration::from_millis(20);

fn round8(bytes: usize) -> usize {
    bytes.next_multiple_of(8)
}

/// A unit of work for the runtime.
///
/// # Example
///
/// ```rust,ignore
/// let task = Task::build("fill", output, IndexSpace::one(0..1000)?)
///     .arg(2.5)
///     .on_done(|_| Ok(()));
/// runtime.submit(task)?;
/// ```
pub struct Task {
    kind: TaskKind,
    args: Vec<Value>,
    done: Option<Callback>,
}

enum TaskKind {
    Build {
        function: FunctionId,
        output: Value,
        space: IndexSpace,
    },
    Broadcast {
        function: FunctionId,
    },
    Eval {
        source: String,
    },
}

impl Task {
    /// Call `function` on every work item of `space`, writing to `output`.
    pub fn build(
        function: impl Into<FunctionId>,
        output: impl Into<Value>,
        space: IndexSpace,
    ) -> Self {
        Self::new(TaskKind::Build {
            function: function.into(),
            output: output.into(),
            space,
        })
    }

    /// Call `function` once on every worker.
    pub fn broadcast(function: impl Into<FunctionId>) -> Self {
        Self::new(TaskKind::Broadcast {
            function: function.into(),
        })
    }

    /// Hand `source` to every worker's evaluator.
    pub fn eval(source: impl Into<String>) -> Self {
        Self::new(TaskKind::Eval {
            source: source.into(),
        })
    }

    fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            args: Vec::new(),
            done: None,
        }
    }

    /// Append an argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Run `done` on the coordinator once the workers have finished.
    pub fn on_done(
        mut self,
        done: impl FnOnce(&mut Multicore) -> Result<()> + Send + 'static,
    ) -> Self {
        self.done = Some(Box::new(done));
        self
    }

    /// The dispatch mode this task will use.
    pub fn mode(&self) -> DispatchMode {
        match self.kind {
            TaskKind::Build { .. } => DispatchMode::Build,
            TaskKind::Broadcast { .. } => DispatchMode::Broadcast,
            TaskKind::Eval { .. } => DispatchMode::Eval,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("mode", &self.mode())
            .field("args", &self.args.len())
            .field("done", &self.done.is_some())
            .finish()
    }
}

/// A validated task, ready to install.
struct Prepared {
    id: TaskId,
    mode: DispatchMode,
    function: Option<FunctionId>,
    values: Vec<Value>,
    items: Vec<WorkItem>,
    item_words: usize,
    arg_words: usize,
    done: Option<Callback>,
    completer: Completer,
}

struct InFlight {
    prepared: Prepared,
    released: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for every worker to reach the barrier the first time.
    Starting,
    Idle,
    /// Workers are registering new buffers; the task is not installed yet.
    Transferring,
    Running,
    ShutDown,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Idle => "idle",
            Phase::Transferring => "transferring",
            Phase::Running => "running",
            Phase::ShutDown => "shut down",
        }
    }
}

struct WorkerHandle {
    inbox: kanal::Sender<WorkerCommand>,
    thread: Option<JoinHandle<Result<()>>>,
}

/// A pool of worker threads sharing one control buffer.
///
/// # Example
///
/// ```rust,ignore
/// use multicore::prelude::*;
///
/// let mut runtime = Multicore::new(RuntimeConfig::with_workers(4), |_setup| {
///     let mut registry = FunctionRegistry::new();
///     registry.register("square", |inv| {
///         let out = inv.output_view()?;
///         for i in inv.range().unwrap_or_default() {
///             out.set(i as usize, (i * i) as f64);
///         }
///         Ok(())
///     });
///     Ok(registry)
/// })?;
///
/// let output = TypedView::whole(SharedBuffer::new(4 * 100)?, ElementType::Int32);
/// let mut ticket = runtime
///     .submit(Task::build("square", output.clone(), IndexSpace::one(0..100)?))?
///     .into_ticket();
/// runtime.wait(&mut ticket)?;
/// runtime.shutdown()?;
/// ```
pub struct Multicore {
    config: RuntimeConfig,
    control: SharedBuffer,
    arena: BumpAllocator,
    working: Mark,
    working_bytes: usize,
    layout: ControlLayout,
    barrier: CoordinatorBarrier,
    dispatcher: Dispatcher,
    workers: Vec<WorkerHandle>,
    buffers: BufferTable,
    phase: Phase,
    queue: VecDeque<Prepared>,
    current: Option<InFlight>,
    ready: Option<Callback>,
    poisoned: Option<Error>,
}

impl Multicore {
    /// Start a runtime; equivalent to [`init`](Self::init) with no ready
    /// callback.
    pub fn new<F>(config: RuntimeConfig, entry: F) -> Result<Self>
    where
        F: Fn(&WorkerSetup) -> Result<FunctionRegistry> + Send + Sync + 'static,
    {
        Self::init(config, entry, |_| Ok(()))
    }

    /// Allocate the control region and spawn the workers.
    ///
    /// Each worker calls `entry` on its own thread to build its function
    /// registry. `ready` runs from [`pump`](Self::pump) once every worker
    /// has reached the barrier; anything submitted before then is queued.
    pub fn init<F, R>(config: RuntimeConfig, entry: F, ready: R) -> Result<Self>
    where
        F: Fn(&WorkerSetup) -> Result<FunctionRegistry> + Send + Sync + 'static,
        R: FnOnce(&mut Multicore) -> Result<()> + Send + 'static,
    {
        config.validate()?;

        let control = SharedBuffer::with_backing(config.control_bytes, config.backing)?;
        let arena = BumpAllocator::initialize(&control, 0, config.control_bytes)?;
        let cells = arena.allocate(CONTROL_CELLS * 4)?;
        let layout = ControlLayout::at(cells / 4);
        let barrier = CoordinatorBarrier::new(&control, layout.barrier, config.num_workers)?;
        layout.write_exit_signal(control.words());
        control.word(layout.limit).store(0, Ordering::SeqCst);
        control.word(layout.arg_start).store(0, Ordering::SeqCst);
        control.word(layout.arg_end).store(0, Ordering::SeqCst);

        let working = arena.mark();
        let working_bytes = arena.remaining();
        let dispatcher = Dispatcher::new();

        debug!(
            workers = config.num_workers,
            control_bytes = config.control_bytes,
            working_bytes,
            "starting runtime"
        );

        let entry: WorkerEntry = Arc::new(entry);
        let mut workers = Vec::with_capacity(config.num_workers);
        for index in 0..config.num_workers {
            let (tx, rx) = kanal::unbounded();
            let setup = WorkerSetup {
                index,
                num_workers: config.num_workers,
                control: control.clone(),
                notifier: dispatcher.notifier(),
            };
            let worker = Worker::new(setup, layout, barrier.descriptor(), rx);
            let name = format!("{}-{index}", config.thread_name);
            let thread = worker::spawn(name, worker, Arc::clone(&entry))?;
            workers.push(WorkerHandle {
                inbox: tx,
                thread: Some(thread),
            });
        }

        Ok(Self {
            buffers: BufferTable::new(control.clone()),
            config,
            control,
            arena,
            working,
            working_bytes,
            layout,
            barrier,
            dispatcher,
            workers,
            phase: Phase::Starting,
            queue: VecDeque::new(),
            current: None,
            ready: Some(Box::new(ready)),
            poisoned: None,
        })
    }

    /// The configuration the runtime was started with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// The control buffer.
    pub fn control(&self) -> &SharedBuffer {
        &self.control
    }

    /// Bytes of working memory available to one dispatch.
    pub fn working_capacity(&self) -> usize {
        self.working_bytes
    }

    /// Tasks waiting behind the one in flight.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True once the workers are parked with nothing in flight or queued.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle && self.current.is_none() && self.queue.is_empty()
    }

    /// The fatal error that poisoned the runtime, if any.
    pub fn poison_error(&self) -> Option<&Error> {
        self.poisoned.as_ref()
    }

    /// A notification sender, e.g. for worker-side locks on user buffers.
    pub fn notifier(&self) -> Notifier {
        self.dispatcher.notifier()
    }

    /// The dispatcher, for registering handlers of user locks and barriers.
    ///
    /// The runtime's own barrier is routed before the dispatcher sees it.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Submit a build.
    pub fn build<D>(
        &mut self,
        done: D,
        function: impl Into<FunctionId>,
        output: impl Into<Value>,
        space: IndexSpace,
        args: Vec<Value>,
    ) -> Result<Submission>
    where
        D: FnOnce(&mut Multicore) -> Result<()> + Send + 'static,
    {
        self.submit(Task::build(function, output, space).args(args).on_done(done))
    }

    /// Submit a broadcast.
    pub fn broadcast<D>(
        &mut self,
        done: D,
        function: impl Into<FunctionId>,
        args: Vec<Value>,
    ) -> Result<Submission>
    where
        D: FnOnce(&mut Multicore) -> Result<()> + Send + 'static,
    {
        self.submit(Task::broadcast(function).args(args).on_done(done))
    }

    /// Submit source text for every worker's evaluator.
    pub fn eval<D>(&mut self, done: D, source: impl Into<String>) -> Result<Submission>
    where
        D: FnOnce(&mut Multicore) -> Result<()> + Send + 'static,
    {
        self.submit(Task::eval(source).on_done(done))
    }

    /// Validate `task` and dispatch it, or queue it behind the one in
    /// flight.
    ///
    /// Validation errors are returned here and leave the runtime untouched.
    pub fn submit(&mut self, task: Task) -> Result<Submission> {
        self.check_poisoned()?;
        if self.phase == Phase::ShutDown {
            return Err(Error::ShutDown);
        }
        let (prepared, ticket) = self.prepare(task)?;

        if self.phase == Phase::Idle && self.queue.is_empty() {
            self.start(prepared)?;
            return Ok(Submission::Dispatched(ticket));
        }
        if !self.config.queue_submissions && self.phase != Phase::Starting {
            return Err(Error::Busy);
        }

        let position = self.queue.len();
        debug!(task = %prepared.id, position, "task queued");
        self.queue.push_back(prepared);
        record_queue_depth(self.queue.len());
        Ok(Submission::Queued { ticket, position })
    }

    fn prepare(&self, task: Task) -> Result<(Prepared, Ticket)> {
        let Task { kind, args, done } = task;
        let (mode, function, values, items, item_words) = match kind {
            TaskKind::Build {
                function,
                output,
                space,
            } => {
                if !matches!(output, Value::Buffer(_) | Value::View(_)) {
                    return Err(Error::InvalidOutput(format!(
                        "build output must be a shared buffer or typed view, got {}",
                        output.kind()
                    )));
                }
                space.validate()?;
                let items = space.slice(self.config.slice_factor * self.config.num_workers);
                let mut values = Vec::with_capacity(args.len() + 1);
                values.push(output);
                values.extend(args);
                let item_words = space.item_words();
                (DispatchMode::Build, Some(function), values, items, item_words)
            }
            TaskKind::Broadcast { function } => {
                (DispatchMode::Broadcast, Some(function), args, Vec::new(), 0)
            }
            TaskKind::Eval { source } => {
                let mut values = Vec::with_capacity(args.len() + 1);
                values.push(Value::Str(source));
                values.extend(args);
                (DispatchMode::Eval, None, values, Vec::new(), 0)
            }
        };
        if let Some(function) = &function {
            function.validate()?;
        }

        // Working memory starts 8-aligned, so encoding at word 0 gives the
        // same float padding as the real position.
        let arg_words = encoded_len(&values, 0)?;
        if arg_words > self.config.max_item_words {
            return Err(Error::ItemTooLarge {
                words: arg_words,
                budget: self.config.max_item_words,
            });
        }
        let needed = round8(arg_words * 4)
            + round8(header_len(function.as_ref()) * 4)
            + round8(items.len() * item_words * 4);
        if needed > self.working_bytes {
            return Err(Error::WorkingMemoryExhausted {
                needed,
                available: self.working_bytes,
            });
        }

        let id = TaskId::next();
        let (ticket, completer) = Ticket::new(id);
        let prepared = Prepared {
            id,
            mode,
            function,
            values,
            items,
            item_words,
            arg_words,
            done,
            completer,
        };
        Ok((prepared, ticket))
    }

    fn start(&mut self, prepared: Prepared) -> Result<()> {
        let fresh = self.buffers.register_new(&prepared.values);
        let result = if fresh.is_empty() {
            self.install(&prepared)
                .and_then(|_| self.release(Phase::Running))
        } else {
            self.transfer(fresh)
        };

        match result {
            Ok(()) => {
                record_dispatch(prepared.mode.name());
                self.current = Some(InFlight {
                    prepared,
                    released: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                prepared.completer.complete(Err(e.clone()));
                if e.is_fatal() {
                    self.poison(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Hand new buffers to every worker, then release them into the inbox.
    fn transfer(&mut self, fresh: Vec<(u32, SharedBuffer)>) -> Result<()> {
        debug!(buffers = fresh.len(), "transferring buffers");
        record_transfer(fresh.len());
        for worker in &self.workers {
            worker
                .inbox
                .send(WorkerCommand::Transfer(fresh.clone()))
                .map_err(|_| Error::Disconnected("worker inbox closed".into()))?;
        }
        self.layout.write_exit_signal(self.control.words());
        self.release(Phase::Transferring)
    }

    /// Roll working memory back and write the arguments, the header and
    /// the work items. The workers must be parked.
    fn install(&mut self, prepared: &Prepared) -> Result<()> {
        let quiescence = self
            .barrier
            .quiescence()
            .ok_or_else(|| Error::Protocol("install while workers are running".into()))?;
        self.arena.release(self.working, &quiescence);

        let arg_at = self.arena.allocate(prepared.arg_words * 4)? / 4;
        let args = encode(&prepared.values, arg_at, &self.buffers)?;
        let header = encode_header(prepared.mode, prepared.function.as_ref());
        let header_at = self.arena.allocate(header.len() * 4)? / 4;
        let item_count = prepared.items.len() * prepared.item_words;
        let items_at = self.arena.allocate(item_count * 4)? / 4;
        drop(quiescence);

        let mut items = Vec::with_capacity(item_count);
        for item in &prepared.items {
            item.write_words(&mut items);
        }

        let words = self.control.words();
        write_words(words, arg_at, &args);
        write_words(words, header_at, &header);
        write_words(words, items_at, &items);

        let layout = self.layout;
        let store = |cell: usize, value: usize| words[cell].store(value as i32, Ordering::SeqCst);
        store(layout.arg_start, arg_at);
        store(layout.arg_end, arg_at + args.len());
        store(layout.item_size, prepared.item_words);
        store(layout.next, items_at);
        store(layout.limit, items_at + item_count);
        store(layout.function, header_at);

        trace_install(
            prepared.id.get(),
            prepared.mode.name(),
            prepared.items.len(),
            args.len(),
        );
        Ok(())
    }

    fn release(&mut self, next: Phase) -> Result<()> {
        if !self.barrier.release() {
            return Err(Error::Protocol("release while workers are running".into()));
        }
        self.set_phase(next);
        Ok(())
    }

    fn set_phase(&mut self, phase: Phase) {
        trace_phase_change(self.phase.name(), phase.name());
        self.phase = phase;
    }

    fn start_next(&mut self) -> Result<()> {
        if self.phase != Phase::Idle || self.poisoned.is_some() {
            return Ok(());
        }
        if let Some(next) = self.queue.pop_front() {
            record_queue_depth(self.queue.len());
            debug!(task = %next.id, "starting queued task");
            self.start(next)?;
        }
        Ok(())
    }

    fn on_quiescent(&mut self) -> Result<()> {
        match self.phase {
            Phase::Starting => {
                self.set_phase(Phase::Idle);
                debug!(workers = self.workers.len(), "workers ready");
                let ready = match self.ready.take() {
                    Some(ready) => ready(self),
                    None => Ok(()),
                };
                self.start_next()?;
                ready
            }
            Phase::Transferring => {
                let in_flight = self.current.take().ok_or_else(|| {
                    Error::Protocol("transfer finished with no task in flight".into())
                })?;
                let result = self
                    .install(&in_flight.prepared)
                    .and_then(|_| self.release(Phase::Running));
                self.current = Some(in_flight);
                result
            }
            Phase::Running => {
                let InFlight { prepared, released } = self.current.take().ok_or_else(|| {
                    Error::Protocol("dispatch finished with no task in flight".into())
                })?;
                self.set_phase(Phase::Idle);
                DispatchTimer::new(prepared.mode.name()).record_since(released);
                trace_complete(prepared.id.get(), prepared.mode.name());
                prepared.completer.complete(Ok(()));
                let done = match prepared.done {
                    Some(done) => done(self),
                    None => Ok(()),
                };
                self.start_next()?;
                done
            }
            Phase::Idle | Phase::ShutDown => Err(Error::Protocol(format!(
                "barrier quiescent while {}",
                self.phase.name()
            ))),
        }
    }

    fn handle(&mut self, notification: Notification) -> Result<()> {
        let result = match notification {
            Notification::BarrierQuiescent(id) if id == self.barrier.id() => self.on_quiescent(),
            other => self.dispatcher.dispatch(other),
        };
        if let Err(e) = &result {
            if e.is_fatal() {
                self.poison(e.clone());
            }
        }
        result
    }

    fn poison(&mut self, error: Error) {
        if self.poisoned.is_some() {
            return;
        }
        error!(error = %error, "runtime poisoned");
        if let Some(in_flight) = self.current.take() {
            in_flight.prepared.completer.complete(Err(error.clone()));
        }
        for prepared in self.queue.drain(..) {
            prepared.completer.complete(Err(error.clone()));
        }
        self.poisoned = Some(error);
    }

    fn check_poisoned(&self) -> Result<()> {
        match &self.poisoned {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Handle every notification already queued, without blocking.
    ///
    /// Returns how many were handled.
    pub fn pump(&mut self) -> Result<usize> {
        self.check_poisoned()?;
        let mut handled = 0;
        while let Some(notification) = self.dispatcher.try_next()? {
            self.handle(notification)?;
            handled += 1;
        }
        Ok(handled)
    }

    fn pump_one(&mut self) -> Result<()> {
        self.check_poisoned()?;
        let notification = self.dispatcher.next(self.config.wait_timeout)?;
        self.handle(notification)
    }

    /// Block until `ticket` resolves, handling notifications meanwhile.
    pub fn wait(&mut self, ticket: &mut Ticket) -> Result<()> {
        loop {
            if let Some(outcome) = ticket.try_take() {
                return outcome;
            }
            self.pump_one()?;
        }
    }

    /// Block until nothing is in flight or queued.
    pub fn wait_idle(&mut self) -> Result<()> {
        while !self.is_idle() {
            self.pump_one()?;
        }
        Ok(())
    }

    /// Wait for the barrier to fill after a fatal error, ignoring faults.
    fn settle(&mut self) -> Result<()> {
        let deadline = self.config.wait_timeout.map(|t| Instant::now() + t);
        while !self.barrier.is_quiescent() {
            let exited = self.workers.iter().position(|w| {
                w.thread
                    .as_ref()
                    .is_some_and(JoinHandle::is_finished)
            });
            if let Some(index) = exited {
                return Err(Error::Protocol(format!(
                    "worker {index} exited outside the barrier"
                )));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::Timeout);
            }
            match self.dispatcher.next(Some(SETTLE_POLL)) {
                Ok(Notification::BarrierQuiescent(id)) if id == self.barrier.id() => {}
                Ok(other) => {
                    if let Err(e) = self.dispatcher.dispatch(other) {
                        debug!(error = %e, "ignored while settling");
                    }
                }
                Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn stop_workers(&mut self) -> Result<()> {
        if !self.barrier.is_quiescent() {
            return Err(Error::Protocol("shutdown while workers are running".into()));
        }
        self.layout.write_exit_signal(self.control.words());
        for worker in &self.workers {
            // A worker whose inbox is gone has already exited; join reports it.
            let _ = worker.inbox.send(WorkerCommand::Shutdown);
        }
        self.release(Phase::ShutDown)?;

        let mut outcome = Ok(());
        for (index, worker) in self.workers.iter_mut().enumerate() {
            let Some(thread) = worker.thread.take() else {
                continue;
            };
            let result = thread
                .join()
                .unwrap_or(Err(Error::WorkerPanicked(index)));
            if let Err(e) = result {
                warn!(worker = index, error = %e, "worker exited with error");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        debug!("runtime shut down");
        outcome
    }

    /// Wait for queued work, stop every worker and join their threads.
    ///
    /// On a poisoned runtime the workers are still stopped, then the
    /// poisoning error is returned.
    pub fn shutdown(mut self) -> Result<()> {
        match self.poisoned.clone() {
            None => {
                self.wait_idle()?;
                self.stop_workers()
            }
            Some(poison) => {
                self.settle()?;
                self.stop_workers()?;
                Err(poison)
            }
        }
    }
}

impl Drop for Multicore {
    fn drop(&mut self) {
        if self.phase == Phase::ShutDown {
            return;
        }
        if !self.barrier.is_quiescent() {
            warn!(
                phase = self.phase.name(),
                "runtime dropped while workers are running; leaking worker threads"
            );
            return;
        }
        if let Err(e) = self.stop_workers() {
            warn!(error = %e, "shutdown on drop failed");
        }
    }
}

impl fmt::Debug for Multicore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multicore")
            .field("workers", &self.workers.len())
            .field("phase", &self.phase)
            .field("queued", &self.queue.len())
            .field("in_flight", &self.current.as_ref().map(|c| c.prepared.id))
            .field("buffers", &self.buffers.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

fn write_words(words: &[AtomicI32], at: usize, values: &[i32]) {
    for (cell, value) in words[at..at + values.len()].iter().zip(values) {
        cell.store(*value, Ordering::Relaxed);
    }
}
