//! Error types for Multicore.

use thiserror::Error;

/// Result type alias using Multicore's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Multicore operations.
///
/// Variants fall into four groups: input validation (raised at the call
/// site, never retried), capacity (the shared region is too small),
/// lifecycle (call made in the wrong state) and fatal protocol
/// violations. See [`Error::is_fatal`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The index space is not a list of one or two `[lo, hi)` ranges.
    #[error("invalid index space: {0}")]
    InvalidIndexSpace(String),

    /// The output argument of a build is not a shared buffer or typed view.
    #[error("invalid output: {0}")]
    InvalidOutput(String),

    /// An argument cannot be marshalled.
    #[error("invalid argument #{index}: {reason}")]
    InvalidArgument {
        /// Position of the argument, the output counts as #0.
        index: usize,
        /// Why it was rejected.
        reason: String,
    },

    /// A typed view does not fit its buffer or is misaligned.
    #[error("invalid view: {0}")]
    InvalidView(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The bump allocator cannot satisfy a request.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested (after rounding).
        requested: usize,
        /// Bytes left in the arena.
        available: usize,
    },

    /// Arguments and work items do not fit in the control region.
    #[error("not enough working memory: need {needed} bytes, {available} available")]
    WorkingMemoryExhausted {
        /// Bytes needed to install the dispatch.
        needed: usize,
        /// Bytes of working memory in the control region.
        available: usize,
    },

    /// The marshalled argument list exceeds the per-item word budget.
    #[error("marshalled arguments take {words} words, budget is {budget}")]
    ItemTooLarge {
        /// Words produced by the encoder.
        words: usize,
        /// Configured maximum.
        budget: usize,
    },

    /// Memory segment creation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// A dispatch is in flight and queueing is disabled.
    #[error("a build or broadcast is already in flight")]
    Busy,

    /// The runtime has been shut down.
    #[error("runtime is shut down")]
    ShutDown,

    /// Coordinator and worker state machines disagree.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A worker was asked to run a function it never registered.
    #[error("no function installed for {0}")]
    UnknownFunction(String),

    /// A worker saw a buffer handle that was never transferred to it.
    #[error("unregistered buffer handle {0}")]
    UnknownBuffer(u32),

    /// A user kernel returned an error.
    #[error("kernel {function} failed: {message}")]
    Kernel {
        /// Function identifier.
        function: String,
        /// Error message from the kernel.
        message: String,
    },

    /// A worker reported a fatal error.
    #[error("worker {worker} failed: {message}")]
    WorkerFault {
        /// Worker index.
        worker: usize,
        /// Rendered worker-side error.
        message: String,
    },

    /// A worker thread panicked.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    /// A notification or command channel closed unexpectedly.
    #[error("channel disconnected: {0}")]
    Disconnected(String),

    /// Waiting for a dispatch took longer than the configured timeout.
    #[error("timed out waiting for the workers")]
    Timeout,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(std::sync::Arc<std::io::Error>),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Build a kernel error from inside a worker function.
    pub fn kernel(function: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Kernel {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Does this error leave the shared-memory protocol in an unknown state?
    ///
    /// Fatal errors poison the runtime: there is no way to roll shared
    /// state back mid-dispatch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::UnknownFunction(_)
                | Error::UnknownBuffer(_)
                | Error::Kernel { .. }
                | Error::WorkerFault { .. }
                | Error::WorkerPanicked(_)
                | Error::Disconnected(_)
                | Error::System(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(std::sync::Arc::new(err))
    }
}
