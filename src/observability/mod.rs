//! Observability: tracing spans and metrics.
//!
//! The library never installs a subscriber or recorder; applications pick
//! their own. Without one, every helper here is a no-op.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `multicore_dispatches_total` | Counter | Dispatches released, by mode |
//! | `multicore_items_claimed_total` | Counter | Work items claimed, by worker |
//! | `multicore_kernel_faults_total` | Counter | Failed function calls, by worker |
//! | `multicore_buffers_transferred_total` | Counter | Buffers handed to the workers |
//! | `multicore_dispatch_time_ns` | Histogram | Release to quiescence, by mode |
//! | `multicore_queue_depth` | Gauge | Tasks waiting for the workers |

mod metrics;
mod tracing_support;

pub use metrics::{
    DispatchTimer, WorkerMetrics, init_metrics, record_dispatch, record_queue_depth,
    record_transfer,
};
pub use tracing_support::{
    span_dispatch, span_worker, trace_complete, trace_install, trace_phase_change,
};
