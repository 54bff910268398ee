//! Worker-to-coordinator notifications.

use super::{BarrierId, LockId};
use crate::error::{Error, Result};

/// A message from a worker to the coordinator.
///
/// This channel never carries bulk data: payloads travel through shared
/// memory and notifications only say that something happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Every party has checked into the barrier.
    BarrierQuiescent(BarrierId),
    /// A worker released a lock straight to the waiting coordinator.
    LockHandOff(LockId),
    /// Free-form text from a kernel.
    Message {
        /// Sending worker.
        worker: usize,
        /// Message text.
        text: String,
    },
    /// A worker hit an error that ends the run.
    Fault {
        /// Failing worker.
        worker: usize,
        /// Rendered error.
        message: String,
    },
}

/// Sending half of the notification channel, held by workers.
#[derive(Clone)]
pub struct Notifier {
    inner: kanal::Sender<Notification>,
}

impl Notifier {
    pub(crate) fn new(inner: kanal::Sender<Notification>) -> Self {
        Self { inner }
    }

    /// Send a notification.
    pub fn send(&self, notification: Notification) -> Result<()> {
        self.inner
            .send(notification)
            .map_err(|_| Error::Disconnected("notification channel closed".into()))
    }

    /// Send a text message on behalf of `worker`.
    pub fn message(&self, worker: usize, text: impl Into<String>) -> Result<()> {
        self.send(Notification::Message {
            worker,
            text: text.into(),
        })
    }

    /// Report a fatal worker error.
    pub fn fault(&self, worker: usize, error: &Error) -> Result<()> {
        self.send(Notification::Fault {
            worker,
            message: error.to_string(),
        })
    }

    /// Check if the coordinator side is gone.
    pub fn is_closed(&self) -> bool {
        self.inner.is_disconnected()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("pending", &self.inner.len())
            .finish()
    }
}
