//! Fan-out delivery of session output to a dynamic set of subscribers.

use crate::error::{Result, StreamError};
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Registry of subscriber channels.
///
/// Every published item is cloned into each live subscriber's queue in
/// publication order. There is no replay: a subscriber only sees items
/// published after it subscribed. Queues are unbounded so a slow subscriber
/// never stalls the session or its siblings.
pub(crate) struct Multicast<T> {
    registry: Mutex<Registry<T>>,
}

struct Registry<T> {
    subscribers: Vec<mpsc::UnboundedSender<Result<T>>>,
    closed: bool,
}

impl<T: Clone> Multicast<T> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Register a subscriber. On a closed multicast the subscription ends
    /// immediately.
    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock();
        if !registry.closed {
            registry.subscribers.push(tx);
        }
        Subscription { rx }
    }

    pub(crate) fn publish(&self, item: T) {
        let mut registry = self.registry.lock();
        registry
            .subscribers
            .retain(|tx| tx.send(Ok(item.clone())).is_ok());
    }

    /// Deliver a terminal error to every subscriber and close.
    pub(crate) fn fail(&self, err: StreamError) {
        let mut registry = self.registry.lock();
        for tx in registry.subscribers.drain(..) {
            let _ = tx.send(Err(err.clone()));
        }
        registry.closed = true;
    }

    /// End every subscription; later subscribers end immediately.
    pub(crate) fn close(&self) {
        let mut registry = self.registry.lock();
        registry.subscribers.clear();
        registry.closed = true;
    }

    /// Accept subscribers again after a close, for a new session.
    pub(crate) fn reopen(&self) {
        self.registry.lock().closed = false;
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }
}

/// One subscriber's view of a session's output.
///
/// Yields items in the order the session produced them. A session that
/// terminates with an error yields that error as its last item.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
}

impl<T> Subscription<T> {
    /// Receive the next item, or `None` once the session has closed.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
