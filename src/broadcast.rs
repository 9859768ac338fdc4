//! A bounded, lag-tolerant, multi-subscriber fan-out, used by the
//! connection type for its event and raw-message observables.
//!
//! `tokio::sync::broadcast` already implements the backpressure policy
//! wanted here: a lagging receiver observes `RecvError::Lagged(n)` and
//! catches back up at the oldest retained value rather than stalling the
//! publisher. This module is a thin typed wrapper around it. Stream
//! completion is modeled with a `tokio::sync::watch<bool>` "closed" flag,
//! since `broadcast::Sender` has no "close and wake every receiver"
//! operation of its own.

use tokio::sync::{broadcast, watch};

use tracing::warn;

const CHANNEL_CAPACITY: usize = 1024;

/// The sending half of a fan-out. Cloneable; every clone publishes to the
/// same set of subscribers.
#[derive(Clone)]
pub(crate) struct FanoutHandle<T> {
    tx: broadcast::Sender<T>,
    closed_tx: watch::Sender<bool>,
}

impl<T: Clone> FanoutHandle<T> {
    pub fn new() -> (Self, Subscription<T>) {
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        let (closed_tx, closed_rx) = watch::channel(false);
        let handle = Self { tx, closed_tx };
        let subscription = Subscription {
            rx,
            closed_rx,
        };
        (handle, subscription)
    }

    /// Publish a value to every current and future subscriber. A value
    /// with no subscribers is simply dropped, matching spec.md §4.2's
    /// "lazy" observable semantics.
    pub fn publish(&self, value: T) {
        let _ = self.tx.send(value);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
            closed_rx: self.closed_tx.subscribe(),
        }
    }

    /// Mark the fan-out closed: every subscriber's `recv` returns `None`
    /// once it has drained whatever was already buffered.
    pub fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

/// A receiving handle for one subscriber.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
    closed_rx: watch::Receiver<bool>,
}

impl<T: Clone> Subscription<T> {
    /// Await the next published value. Returns `None` once the fan-out
    /// has been closed and every already-buffered value drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if *self.closed_rx.borrow() {
                // Closed already observed (possibly before we ever reached
                // this `recv` call): drain whatever is still buffered.
                return match self.rx.try_recv() {
                    Ok(value) => Some(value),
                    Err(_) => None,
                };
            }
            tokio::select! {
                biased;
                result = self.rx.recv() => {
                    match result {
                        Ok(value) => return Some(value),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event subscriber lagged, dropping oldest events");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
                _ = self.closed_rx.changed() => {
                    continue;
                }
            }
        }
    }
}
