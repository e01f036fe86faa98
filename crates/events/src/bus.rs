//! Signal publishing/subscription abstraction (mechanics only).
//!
//! The bus fans every published signal out to all live subscribers. It gives no
//! persistence and no delivery guarantee beyond "best effort while subscribed":
//! account operations must never fail because a listener went away.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to a signal stream.
///
/// Each subscription receives a copy of every signal published after it was
/// created (broadcast semantics). Intended for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub contract.
///
/// Implementations must be `Send + Sync`: request handlers publish concurrently.
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
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}

/// Publish and swallow failures (logged at `warn`).
///
/// Signals describe work that already happened; a broken bus must not turn a
/// completed confirmation or reset into an error response.
pub fn publish_best_effort<M, B>(bus: &B, message: M)
where
    B: EventBus<M> + ?Sized,
    M: crate::Event,
{
    let event_type = message.event_type();
    if let Err(e) = bus.publish(message) {
        tracing::warn!(event_type, error = ?e, "signal publish failed");
    }
}
