//! One-shot event waiters

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{DispatcherInner, HandlerError};
use crate::events::Event;

/// Why a waiter finished without an event
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for event")]
    Timeout,

    #[error("waiter was cancelled")]
    Cancelled,

    /// The predicate returned an error
    #[error("waiter predicate failed: {0}")]
    Predicate(HandlerError),
}

pub(crate) type WaitResult = Result<Arc<Event>, WaitError>;

/// Registered side of a waiter, owned by the dispatcher
pub(crate) struct PendingWaiter {
    pub(crate) id: u64,
    pub(crate) predicate: super::Predicate,
    pub(crate) sender: oneshot::Sender<WaitResult>,
}

/// Handle to a registered one-shot waiter.
///
/// Completes with the first matching event. Dropping it (or calling
/// [`Waiter::cancel`]) removes it from the dispatcher.
pub struct Waiter {
    id: u64,
    event: String,
    timeout: Option<Duration>,
    receiver: oneshot::Receiver<WaitResult>,
    dispatcher: Weak<DispatcherInner>,
}

impl Waiter {
    pub(crate) fn new(
        id: u64,
        event: String,
        timeout: Option<Duration>,
        receiver: oneshot::Receiver<WaitResult>,
        dispatcher: Weak<DispatcherInner>,
    ) -> Self {
        Self {
            id,
            event,
            timeout,
            receiver,
            dispatcher,
        }
    }

    /// Event name this waiter listens for
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Wait for the matching event, the deadline, or cancellation
    pub async fn wait(mut self) -> Result<Arc<Event>, WaitError> {
        let outcome = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut self.receiver).await {
                Ok(outcome) => outcome,
                Err(_) => return self.expire(),
            },
            None => (&mut self.receiver).await,
        };
        outcome.unwrap_or(Err(WaitError::Cancelled))
    }

    /// Settle a waiter whose deadline passed.
    ///
    /// An outcome delivered before the waiter was detached still wins.
    fn expire(&mut self) -> Result<Arc<Event>, WaitError> {
        self.detach();
        match self.receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(event = %self.event, "Waiter timed out");
                Err(WaitError::Timeout)
            }
        }
    }

    /// Abandon the waiter
    pub fn cancel(self) {
        drop(self);
    }

    fn detach(&self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove_waiter(&self.event, self.id);
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("timeout", &self.timeout)
            .finish()
    }
}
