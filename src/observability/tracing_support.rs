//! Spans and structured log helpers for the runtime.

use tracing::{Level, Span, span};

/// Create a span covering a worker thread's lifetime.
///
/// # Example
///
/// ```rust,ignore
/// use multicore::observability::span_worker;
///
/// let _guard = span_worker(3).entered();
/// // everything logged here carries worker = 3
/// ```
#[inline]
pub fn span_worker(index: usize) -> Span {
    span!(Level::DEBUG, "worker", index = index)
}

/// Create a span for one dispatch on a worker.
#[inline]
pub fn span_dispatch(mode: &str, function: &str) -> Span {
    span!(
        Level::DEBUG,
        "dispatch",
        mode = %mode,
        function = %function
    )
}

/// Log a dispatch being installed in working memory.
#[inline]
pub fn trace_install(task: u64, mode: &str, items: usize, arg_words: usize) {
    tracing::debug!(
        task = task,
        mode = %mode,
        items = items,
        arg_words = arg_words,
        "dispatch installed"
    );
}

/// Log a dispatch completing.
#[inline]
pub fn trace_complete(task: u64, mode: &str) {
    tracing::debug!(task = task, mode = %mode, "dispatch complete");
}

/// Log a runtime phase change.
#[inline]
pub fn trace_phase_change(from: &str, to: &str) {
    tracing::trace!(from = %from, to = %to, "runtime phase changed");
}
