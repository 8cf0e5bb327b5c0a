//! Typed publish/subscribe bus.
//!
//! Every subscriber owns an unbounded queue, so a slow consumer never blocks
//! the publisher and never drops events. Events are delivered to subscribers
//! in subscription order, and each subscriber sees events in publish order.
//! Dropping a [`Subscription`] unsubscribes it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// Identifier handed out by [`EventBus::subscribe`], monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct BusInner<T> {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriptionId, mpsc::UnboundedSender<T>>>,
}

/// Cloneable handle to a typed bus. All clones publish to the same subscribers.
pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.inner.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new("events")
    }
}

impl<T> EventBus<T> {
    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Remove a subscription by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.lock().remove(&id).is_some()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a bus. `name` only shows up in traces.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name,
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a new subscriber. It only sees events published afterwards.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().insert(id, tx);
        trace!(bus = self.inner.name, subscription = %id, "subscribed");
        Subscription { id, rx, bus: Arc::downgrade(&self.inner) }
    }

    /// Deliver `event` to every live subscriber and return how many received it.
    ///
    /// Subscribers whose receiving side has gone away are pruned.
    pub fn publish(&self, event: T) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|_, tx| {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }
}

/// Receiving half of a bus subscription.
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
    bus: Weak<BusInner<T>>,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the bus is gone and the
    /// queue has been drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Take every event queued so far.
    pub fn drain(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.lock().remove(&self.id);
        }
    }
}
