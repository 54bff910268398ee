//! Worker-side function table.

use super::codec::Value;
use super::layout::FunctionId;
use crate::error::{Error, Result};
use crate::memory::{SharedBuffer, TypedView};
use crate::sync::Notifier;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

/// A worker function.
pub type Kernel = Box<dyn Fn(&Invocation<'_>) -> Result<()> + Send>;

/// Runs source text sent with [`Multicore::eval`](super::Multicore::eval).
///
/// Evaluators may register further functions, which later builds and
/// broadcasts can then call by name.
pub trait Evaluator: Send {
    /// Evaluate `source` on worker `worker`.
    fn eval(&self, source: &str, registry: &mut FunctionRegistry, worker: usize) -> Result<()>;
}

impl<F> Evaluator for F
where
    F: Fn(&str, &mut FunctionRegistry, usize) -> Result<()> + Send,
{
    fn eval(&self, source: &str, registry: &mut FunctionRegistry, worker: usize) -> Result<()> {
        self(source, registry, worker)
    }
}

/// A single call of a worker function.
pub struct Invocation<'a> {
    pub(crate) worker: usize,
    pub(crate) function: &'a FunctionId,
    pub(crate) output: Option<&'a Value>,
    pub(crate) bounds: SmallVec<[i32; 4]>,
    pub(crate) args: &'a [Value],
    pub(crate) notifier: &'a Notifier,
}

impl<'a> Invocation<'a> {
    /// Index of the worker running this call.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// The function being called.
    pub fn function(&self) -> &FunctionId {
        self.function
    }

    /// The build's output argument; `None` for broadcasts.
    pub fn output(&self) -> Option<&'a Value> {
        self.output
    }

    /// The output as a typed view.
    pub fn output_view(&self) -> Result<&'a TypedView> {
        self.output
            .and_then(Value::as_view)
            .ok_or_else(|| self.fail("output is not a typed view"))
    }

    /// The output as a whole buffer.
    pub fn output_buffer(&self) -> Result<&'a SharedBuffer> {
        self.output
            .and_then(Value::as_buffer)
            .ok_or_else(|| self.fail("output is not a shared buffer"))
    }

    /// Item bounds as `lo, hi` pairs, outermost dimension first.
    pub fn bounds(&self) -> &[i32] {
        &self.bounds
    }

    /// The item's range in a one-dimensional build.
    pub fn range(&self) -> Option<Range<i32>> {
        match self.bounds.as_slice() {
            [lo, hi] => Some(*lo..*hi),
            _ => None,
        }
    }

    /// The item's `(rows, cols)` in a two-dimensional build.
    pub fn ranges_2d(&self) -> Option<(Range<i32>, Range<i32>)> {
        match self.bounds.as_slice() {
            [ylo, yhi, xlo, xhi] => Some((*ylo..*yhi, *xlo..*xhi)),
            _ => None,
        }
    }

    /// Extra arguments, after the output.
    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    /// Argument `index`, or an error naming the function.
    pub fn arg(&self, index: usize) -> Result<&'a Value> {
        self.args
            .get(index)
            .ok_or_else(|| self.fail(format!("missing argument {index}")))
    }

    /// Argument `index` as an integer.
    pub fn int(&self, index: usize) -> Result<i32> {
        let value = self.arg(index)?;
        value
            .as_int()
            .ok_or_else(|| self.fail(format!("argument {index} is {}, not int", value.kind())))
    }

    /// Argument `index` as a number.
    pub fn number(&self, index: usize) -> Result<f64> {
        let value = self.arg(index)?;
        value
            .as_f64()
            .ok_or_else(|| self.fail(format!("argument {index} is {}, not a number", value.kind())))
    }

    /// Argument `index` as a view.
    pub fn view(&self, index: usize) -> Result<&'a TypedView> {
        let value = self.arg(index)?;
        value
            .as_view()
            .ok_or_else(|| self.fail(format!("argument {index} is {}, not a view", value.kind())))
    }

    /// Send a text message to the coordinator's log.
    pub fn message(&self, text: impl Into<String>) -> Result<()> {
        self.notifier.message(self.worker, text)
    }

    /// Notification sender, e.g. for attaching a
    /// [`WorkerLock`](crate::sync::WorkerLock).
    pub fn notifier(&self) -> &Notifier {
        self.notifier
    }

    fn fail(&self, message: impl Into<String>) -> Error {
        Error::kernel(self.function.to_string(), message)
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("worker", &self.worker)
            .field("function", &self.function)
            .field("bounds", &self.bounds.as_slice())
            .field("args", &self.args.len())
            .finish()
    }
}

/// The functions a worker can run, populated by the worker entry point.
#[derive(Default)]
pub struct FunctionRegistry {
    named: HashMap<String, Kernel>,
    numbered: HashMap<u32, Kernel>,
    evaluator: Option<Box<dyn Evaluator>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&Invocation<'_>) -> Result<()> + Send + 'static,
    ) -> &mut Self {
        self.named.insert(name.into(), Box::new(f));
        self
    }

    /// Register `f` under number `id`.
    pub fn register_numbered(
        &mut self,
        id: u32,
        f: impl Fn(&Invocation<'_>) -> Result<()> + Send + 'static,
    ) -> &mut Self {
        self.numbered.insert(id, Box::new(f));
        self
    }

    /// Install the evaluator used by eval dispatches.
    pub fn set_evaluator(&mut self, evaluator: impl Evaluator + 'static) -> &mut Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Is a function registered under `id`?
    pub fn contains(&self, id: &FunctionId) -> bool {
        self.get(id).is_ok()
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.named.len() + self.numbered.len()
    }

    /// Returns true if no functions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get(&self, id: &FunctionId) -> Result<&Kernel> {
        let kernel = match id {
            FunctionId::Named(name) => self.named.get(name),
            FunctionId::Numbered(n) => self.numbered.get(n),
        };
        kernel.ok_or_else(|| Error::UnknownFunction(id.to_string()))
    }

    /// Run the evaluator on `source`.
    pub(crate) fn eval(&mut self, source: &str, worker: usize) -> Result<()> {
        let evaluator = self
            .evaluator
            .take()
            .ok_or_else(|| Error::UnknownFunction("<eval>".into()))?;
        let result = evaluator.eval(source, self, worker);
        // Keep a replacement the evaluator installed for itself.
        if self.evaluator.is_none() {
            self.evaluator = Some(evaluator);
        }
        result
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("named", &names)
            .field("numbered", &self.numbered.len())
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}
