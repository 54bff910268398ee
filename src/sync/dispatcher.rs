//! Coordinator-side routing of notifications to handlers.

use super::{BarrierId, LockId, Notification, Notifier};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

/// Handler run every time a barrier becomes quiescent.
pub type QuiescenceHandler = Box<dyn FnMut() -> Result<()> + Send>;

/// Continuation run once the lock has been handed to the coordinator.
pub(crate) type HandOff = Box<dyn FnOnce() + Send>;

/// Receives worker notifications and routes them by id.
///
/// One dispatcher serves any number of locks and barriers. Quiescence
/// handlers stay installed until removed; hand-off continuations are
/// one-shot and are registered by
/// [`CoordinatorLock::async_lock`](super::CoordinatorLock::async_lock).
pub struct Dispatcher {
    tx: kanal::Sender<Notification>,
    rx: kanal::Receiver<Notification>,
    quiescence: HashMap<BarrierId, QuiescenceHandler>,
    hand_offs: HashMap<LockId, HandOff>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty handler table.
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        Self {
            tx,
            rx,
            quiescence: HashMap::new(),
            hand_offs: HashMap::new(),
        }
    }

    /// A sender for workers.
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.tx.clone())
    }

    /// Install the handler for quiescence of barrier `id`, replacing any
    /// previous one.
    pub fn on_quiescent(
        &mut self,
        id: BarrierId,
        handler: impl FnMut() -> Result<()> + Send + 'static,
    ) {
        self.quiescence.insert(id, Box::new(handler));
    }

    /// Remove the quiescence handler for `id`.
    pub fn remove_quiescent(&mut self, id: BarrierId) -> bool {
        self.quiescence.remove(&id).is_some()
    }

    pub(crate) fn has_hand_off(&self, id: LockId) -> bool {
        self.hand_offs.contains_key(&id)
    }

    pub(crate) fn register_hand_off(&mut self, id: LockId, hand_off: HandOff) {
        self.hand_offs.insert(id, hand_off);
    }

    /// Number of lock hand-offs still waiting for their notification.
    pub fn pending_hand_offs(&self) -> usize {
        self.hand_offs.len()
    }

    /// Take the next notification without blocking.
    pub fn try_next(&self) -> Result<Option<Notification>> {
        self.rx
            .try_recv()
            .map_err(|_| Error::Disconnected("notification channel closed".into()))
    }

    /// Block until a notification arrives, or until `timeout` passes.
    pub fn next(&self, timeout: Option<Duration>) -> Result<Notification> {
        match timeout {
            None => self
                .rx
                .recv()
                .map_err(|_| Error::Disconnected("notification channel closed".into())),
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(notification) => Ok(notification),
                Err(kanal::ReceiveErrorTimeout::Timeout) => Err(Error::Timeout),
                Err(_) => Err(Error::Disconnected("notification channel closed".into())),
            },
        }
    }

    /// Route one notification to its handler.
    ///
    /// A quiescence or hand-off notification with nothing registered for
    /// its id is a protocol violation. A worker fault surfaces as
    /// [`Error::WorkerFault`].
    pub fn dispatch(&mut self, notification: Notification) -> Result<()> {
        match notification {
            Notification::BarrierQuiescent(id) => {
                let handler = self.quiescence.get_mut(&id).ok_or_else(|| {
                    Error::Protocol(format!("no quiescence handler for barrier {id}"))
                })?;
                debug!(barrier = %id, "barrier quiescent");
                handler()
            }
            Notification::LockHandOff(id) => {
                let hand_off = self.hand_offs.remove(&id).ok_or_else(|| {
                    Error::Protocol(format!("hand-off for lock {id} with no pending request"))
                })?;
                debug!(lock = %id, "lock handed off to coordinator");
                hand_off();
                Ok(())
            }
            Notification::Message { worker, text } => {
                info!(worker, "{text}");
                Ok(())
            }
            Notification::Fault { worker, message } => {
                error!(worker, %message, "worker fault");
                Err(Error::WorkerFault { worker, message })
            }
        }
    }

    /// Dispatch everything already queued; returns how many were handled.
    pub fn pump(&mut self) -> Result<usize> {
        let mut handled = 0;
        while let Some(notification) = self.try_next()? {
            self.dispatch(notification)?;
            handled += 1;
        }
        Ok(handled)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.rx.len())
            .field("quiescence_handlers", &self.quiescence.len())
            .field("pending_hand_offs", &self.hand_offs.len())
            .finish()
    }
}
