//! Runtime configuration.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default size of the control region (64K words).
pub const DEFAULT_CONTROL_BYTES: usize = 0x10000 * 4;

/// Default over-slicing factor: items per worker per dimension.
pub const DEFAULT_SLICE_FACTOR: usize = 4;

/// Default budget for one marshalled argument list, in words.
pub const DEFAULT_MAX_ITEM_WORDS: usize = 4096;

/// Which memory backs the buffers the runtime creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backing {
    /// memfd-backed shared memory, mappable by other processes.
    #[default]
    Memfd,
    /// Plain heap memory (single process only).
    Heap,
}

/// Configuration for a [`Multicore`](crate::task::Multicore) runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub num_workers: usize,

    /// Size of the private control region in bytes. Barrier cells,
    /// metadata cells, arguments and work items all live here.
    pub control_bytes: usize,

    /// Items per worker per dimension when slicing an index space.
    ///
    /// Over-slicing trades per-item dispatch overhead for better load
    /// balance when per-index cost is uneven.
    pub slice_factor: usize,

    /// Maximum number of words one marshalled argument list may take.
    pub max_item_words: usize,

    /// Backing for the control region.
    pub backing: Backing,

    /// Queue submissions made while a dispatch is in flight instead of
    /// rejecting them with [`Error::Busy`].
    pub queue_submissions: bool,

    /// Prefix for worker thread names.
    pub thread_name: String,

    /// Give up waiting on the workers after this long.
    pub wait_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            control_bytes: DEFAULT_CONTROL_BYTES,
            slice_factor: DEFAULT_SLICE_FACTOR,
            max_item_words: DEFAULT_MAX_ITEM_WORDS,
            backing: Backing::Memfd,
            queue_submissions: true,
            thread_name: "multicore-worker".to_string(),
            wait_timeout: None,
        }
    }
}

impl RuntimeConfig {
    /// Default configuration with a fixed worker count.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Small heap-backed configuration for tests.
    pub fn testing(num_workers: usize) -> Self {
        Self {
            num_workers,
            backing: Backing::Heap,
            wait_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::InvalidConfig("num_workers must be > 0".into()));
        }
        if self.slice_factor == 0 {
            return Err(Error::InvalidConfig("slice_factor must be > 0".into()));
        }
        if self.max_item_words == 0 {
            return Err(Error::InvalidConfig("max_item_words must be > 0".into()));
        }
        // Cells are i32 and hold byte offsets.
        if self.control_bytes > i32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "control_bytes {} exceeds i32 range",
                self.control_bytes
            )));
        }
        if self.control_bytes < 256 {
            return Err(Error::InvalidConfig(format!(
                "control_bytes {} is too small to hold the control block",
                self.control_bytes
            )));
        }
        Ok(())
    }
}
