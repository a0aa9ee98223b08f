//! Fan-out of committed ledger events.
//!
//! Consumers (audit trails, dashboards, the alert sweeper trigger) learn about
//! stock movements, receptions and alerts from the bus. The ledger store stays
//! authoritative: a consumer that misses a message can always re-read state.
//!
//! Publication happens after commit and may be retried by the caller, so a
//! consumer can see the same envelope twice and must tolerate it.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end handed out by [`EventBus::subscribe`].
///
/// A subscriber sees every message published after it subscribed, in
/// publication order.
#[derive(Debug)]
pub struct Subscription<M> {
    inbox: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(inbox: Receiver<M>) -> Self {
        Self { inbox }
    }

    pub fn recv(&self) -> Result<M, RecvError> {
        self.inbox.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.inbox.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.inbox.recv_timeout(timeout)
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.inbox.try_iter().collect()
    }
}

/// Publish side of the ledger's event distribution.
///
/// A failing `publish` never undoes the commit that produced the message; the
/// engine reports the failure to its caller instead.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        <B as EventBus<M>>::publish(self, message)
    }

    fn subscribe(&self) -> Subscription<M> {
        <B as EventBus<M>>::subscribe(self)
    }
}
