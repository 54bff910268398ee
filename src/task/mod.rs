//! Task distribution: marshalling, slicing and the worker pool.
//!
//! A [`Task`] names a worker function and carries its arguments. The
//! [`Multicore`] runtime encodes the arguments into the control buffer,
//! slices the index space into work items, and releases the workers, who
//! claim items through a shared cursor until none are left. The last worker
//! back in the barrier completes the task.
//!
//! # Wire format
//!
//! Arguments are written as tagged 32-bit words ([`codec`]); the dispatch
//! header and the control cells are described in [`layout`].

pub mod codec;
pub mod layout;
mod multicore;
mod registry;
pub mod space;
mod ticket;
mod worker;

pub use codec::{BufferTable, HandleTable, Value};
pub use layout::{ControlLayout, DispatchMode, FunctionId};
pub use multicore::{Callback, Multicore, Task};
pub use registry::{Evaluator, FunctionRegistry, Invocation, Kernel};
pub use space::{IndexSpace, WorkItem};
pub use ticket::{Submission, TaskId, Ticket};
pub use worker::{WorkerCommand, WorkerEntry, WorkerSetup};
