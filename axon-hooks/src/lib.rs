#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;

use axon_types::{HookError, RunEvent};

/// A hook-bus subscriber.
///
/// Subscribers are awaited in registration order for every published event.
/// Returning an error aborts delivery of the current event to later
/// subscribers and surfaces the error to the emitter.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handle one event.
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError>;
}

struct Entry {
    id: u64,
    subscriber: Arc<dyn Subscriber>,
}

struct BusInner {
    subscribers: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.subscribers
            .write()
            .expect("subscriber set poisoned")
            .retain(|entry| entry.id != id);
    }
}

/// The hook bus.
///
/// Cloning shares the same subscriber set; the loop, the registry, and
/// stream sinks all hold clones of one bus.
#[derive(Clone)]
pub struct HookBus {
    inner: Arc<BusInner>,
}

impl HookBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber at the end of the delivery order.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .expect("subscriber set poisoned")
            .push(Entry { id, subscriber });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .expect("subscriber set poisoned")
            .len()
    }

    /// Whether the bus has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every subscriber in registration order.
    ///
    /// The subscriber set is snapshotted before iteration: registrations and
    /// closes performed by subscribers mid-delivery affect only future
    /// events.
    ///
    /// # Errors
    ///
    /// The first subscriber error; later subscribers do not see the event.
    pub async fn publish(&self, event: &RunEvent) -> Result<(), HookError> {
        let snapshot: Vec<Arc<dyn Subscriber>> = {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .expect("subscriber set poisoned");
            subscribers.iter().map(|e| e.subscriber.clone()).collect()
        };
        for subscriber in snapshot {
            subscriber.on_event(event).await?;
        }
        Ok(())
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one registration. Closing removes the subscriber; closing
/// twice is a no-op. Dropping without closing leaves the subscriber
/// registered.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    closed: AtomicBool,
}

impl Subscription {
    /// Deregister the subscriber. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }

    /// Whether this subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
