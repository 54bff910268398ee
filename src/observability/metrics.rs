//! Metrics collection using metrics-rs.

use metrics::{Counter, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const DISPATCHES: &str = "multicore_dispatches_total";
const ITEMS_CLAIMED: &str = "multicore_items_claimed_total";
const KERNEL_FAULTS: &str = "multicore_kernel_faults_total";
const BUFFERS_TRANSFERRED: &str = "multicore_buffers_transferred_total";
const DISPATCH_TIME_NS: &str = "multicore_dispatch_time_ns";
const QUEUE_DEPTH: &str = "multicore_queue_depth";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(DISPATCHES, Unit::Count, "Dispatches released to the workers");
    metrics::describe_counter!(ITEMS_CLAIMED, Unit::Count, "Work items claimed by workers");
    metrics::describe_counter!(KERNEL_FAULTS, Unit::Count, "Worker functions that failed");
    metrics::describe_counter!(
        BUFFERS_TRANSFERRED,
        Unit::Count,
        "Shared buffers handed to the workers"
    );
    metrics::describe_histogram!(
        DISPATCH_TIME_NS,
        Unit::Nanoseconds,
        "Time from release to barrier quiescence"
    );
    metrics::describe_gauge!(QUEUE_DEPTH, Unit::Count, "Tasks waiting for the workers");
}

/// Record a dispatch released to the workers.
#[inline]
pub fn record_dispatch(mode: &'static str) {
    counter!(DISPATCHES, "mode" => mode).increment(1);
}

/// Record buffers transferred ahead of a dispatch.
#[inline]
pub fn record_transfer(buffers: usize) {
    counter!(BUFFERS_TRANSFERRED).increment(buffers as u64);
}

/// Record the submission queue depth.
#[inline]
pub fn record_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}

/// Per-worker counters, created once per worker thread.
#[derive(Clone)]
pub struct WorkerMetrics {
    index: usize,
    items: Counter,
    faults: Counter,
}

impl WorkerMetrics {
    /// Create the counters for worker `index`.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            items: counter!(ITEMS_CLAIMED, "worker" => index.to_string()),
            faults: counter!(KERNEL_FAULTS, "worker" => index.to_string()),
        }
    }

    /// Record claimed items.
    #[inline]
    pub fn record_items(&self, count: u64) {
        self.items.increment(count);
    }

    /// Record a failed function call.
    #[inline]
    pub fn record_fault(&self) {
        self.faults.increment(1);
    }

    /// Worker index.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Times dispatches from release to completion.
#[derive(Clone)]
pub struct DispatchTimer {
    histogram: Histogram,
}

impl DispatchTimer {
    /// Create a timer for dispatches of `mode`.
    pub fn new(mode: &'static str) -> Self {
        Self {
            histogram: histogram!(DISPATCH_TIME_NS, "mode" => mode),
        }
    }

    /// Record a completed dispatch.
    #[inline]
    pub fn record(&self, duration: Duration) {
        self.histogram.record(duration.as_nanos() as f64);
    }

    /// Record the time elapsed since `start`.
    #[inline]
    pub fn record_since(&self, start: Instant) {
        self.record(start.elapsed());
    }
}
