//! Completion handles for submitted tasks.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// One-shot handle resolved when a task completes or fails.
///
/// Tickets resolve from inside [`Multicore::pump`](super::Multicore::pump);
/// use [`Multicore::wait`](super::Multicore::wait) to block on one.
pub struct Ticket {
    id: TaskId,
    rx: kanal::Receiver<Result<()>>,
    outcome: Option<Result<()>>,
    resolved: bool,
}

impl Ticket {
    pub(crate) fn new(id: TaskId) -> (Self, Completer) {
        let (tx, rx) = kanal::bounded(1);
        (
            Self {
                id,
                rx,
                outcome: None,
                resolved: false,
            },
            Completer { id, tx },
        )
    }

    /// Task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    fn poll(&mut self) {
        if self.resolved {
            return;
        }
        self.outcome = match self.rx.try_recv() {
            Ok(Some(outcome)) => Some(outcome),
            Ok(None) => return,
            Err(_) => Some(Err(Error::Disconnected(format!(
                "{} dropped without completing",
                self.id
            )))),
        };
        self.resolved = true;
    }

    /// Has the task finished, successfully or not?
    ///
    /// Stays true after the outcome has been taken.
    pub fn is_ready(&mut self) -> bool {
        self.poll();
        self.resolved
    }

    /// The outcome, if the task has finished.
    ///
    /// Returns the outcome only once; later calls return `None`.
    pub fn try_take(&mut self) -> Option<Result<()>> {
        self.poll();
        self.outcome.take()
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("resolved", &self.resolved)
            .field("taken", &(self.resolved && self.outcome.is_none()))
            .finish()
    }
}

/// Coordinator side of a [`Ticket`].
pub(crate) struct Completer {
    id: TaskId,
    tx: kanal::Sender<Result<()>>,
}

impl Completer {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    /// Resolve the ticket; a dropped ticket is not an error.
    pub(crate) fn complete(self, outcome: Result<()>) {
        let _ = self.tx.try_send(outcome);
    }
}

/// What happened to a submitted task.
#[derive(Debug)]
pub enum Submission {
    /// Installed and released to the workers right away.
    Dispatched(Ticket),
    /// Waiting behind other work.
    Queued {
        /// Completion handle.
        ticket: Ticket,
        /// Tasks ahead of this one in the queue.
        position: usize,
    },
}

impl Submission {
    /// The completion handle.
    pub fn ticket(&self) -> &Ticket {
        match self {
            Submission::Dispatched(ticket) | Submission::Queued { ticket, .. } => ticket,
        }
    }

    /// Take the completion handle.
    pub fn into_ticket(self) -> Ticket {
        match self {
            Submission::Dispatched(ticket) | Submission::Queued { ticket, .. } => ticket,
        }
    }

    /// Was the task queued?
    pub fn is_queued(&self) -> bool {
        matches!(self, Submission::Queued { .. })
    }
}
