// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed, synchronous event bus.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Type-erased handler. Returns `false` once it wants to be removed.
type Handler = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<TypeId, Vec<(SubscriptionId, Handler)>>>,
}

impl Registry {
    fn insert(&self, type_id: TypeId, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.handlers
            .write()
            .entry(type_id)
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, type_id: TypeId, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&type_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&type_id);
        }
        removed
    }
}

/// Publish/subscribe hub shared by every service.
///
/// Subscribers register a handler for one event type `T` and receive every
/// `T` published afterwards. Delivery is synchronous on the publishing
/// thread, in subscription order, to a copy of the handler list taken when
/// [`publish`](Self::publish) is called. Handlers may therefore subscribe or
/// unsubscribe (including themselves) while an event is being delivered.
///
/// A handler that panics is logged and skipped; the remaining handlers still
/// receive the event.
///
/// Cloning is cheap; clones share the same subscribers.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use blelink::event::EventBus;
///
/// #[derive(Clone)]
/// struct Ping(u32);
///
/// let bus = EventBus::new();
/// let seen = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&seen);
/// let subscription = bus.subscribe(move |ping: &Ping| {
///     counter.fetch_add(ping.0 as usize, Ordering::SeqCst);
/// });
///
/// bus.publish(Ping(2));
/// drop(subscription);
/// bus.publish(Ping(5));
///
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Creates an event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every handler currently subscribed to `T`.
    pub fn publish<T>(&self, event: T)
    where
        T: Any + Send + Sync,
    {
        let type_id = TypeId::of::<T>();
        let handlers: Vec<(SubscriptionId, Handler)> = self
            .registry
            .handlers
            .read()
            .get(&type_id)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(event = type_name::<T>(), "No subscribers");
            return;
        }

        for (id, handler) in handlers {
            let delivered = catch_unwind(AssertUnwindSafe(|| handler(&event as &dyn Any)));
            match delivered {
                Ok(true) => {}
                Ok(false) => {
                    self.registry.remove(type_id, id);
                }
                Err(_) => {
                    tracing::warn!(
                        event = type_name::<T>(),
                        subscription = %id,
                        "Event handler panicked"
                    );
                }
            }
        }
    }

    /// Registers `handler` for events of type `T`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<T, F>(&self, handler: F) -> Subscription
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<T>() {
                handler(event);
            }
            true
        });
        let type_id = TypeId::of::<T>();
        let id = self.registry.insert(type_id, erased);
        tracing::trace!(event = type_name::<T>(), subscription = %id, "Subscribed");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            type_id,
            id,
            active: true,
        }
    }

    /// Returns a channel receiving a clone of every `T` published from now on.
    ///
    /// The subscription is removed on the first publish after the receiver
    /// has been dropped.
    #[must_use]
    pub fn subscribe_channel<T>(&self) -> mpsc::UnboundedReceiver<T>
    where
        T: Any + Clone + Send + Sync,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let erased: Handler = Arc::new(move |event: &dyn Any| {
            match event.downcast_ref::<T>() {
                Some(event) => tx.send(event.clone()).is_ok(),
                None => true,
            }
        });
        self.registry.insert(TypeId::of::<T>(), erased);
        rx
    }

    /// Returns the number of handlers subscribed to `T`.
    #[must_use]
    pub fn subscriber_count<T>(&self) -> usize
    where
        T: Any,
    {
        self.registry
            .handlers
            .read()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self.registry.handlers.read().len();
        f.debug_struct("EventBus")
            .field("event_types", &types)
            .finish()
    }
}

/// Guard for a handler registered with [`EventBus::subscribe`].
///
/// Dropping the guard unsubscribes the handler.
#[must_use = "dropping a Subscription unsubscribes its handler immediately"]
pub struct Subscription {
    registry: Weak<Registry>,
    type_id: TypeId,
    id: SubscriptionId,
    active: bool,
}

impl Subscription {
    /// Returns the subscription's identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the handler from the bus.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keeps the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.type_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Pong;

    #[test]
    fn delivers_only_matching_type() {
        let bus = EventBus::new();
        let pings = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&pings);
        let _sub = bus.subscribe(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Ping(1));
        bus.publish(Pong);
        bus.publish(Ping(2));

        assert_eq!(pings.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_unsubscribes() {
        let bus = EventBus::new();
        let sub = bus.subscribe(|_: &Ping| {});
        assert_eq!(bus.subscriber_count::<Ping>(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count::<Ping>(), 0);
    }

    #[test]
    fn detach_keeps_handler() {
        let bus = EventBus::new();
        bus.subscribe(|_: &Ping| {}).detach();
        assert_eq!(bus.subscriber_count::<Ping>(), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _first = bus.subscribe(|_: &Ping| panic!("boom"));
        let log = Arc::clone(&seen);
        let _second = bus.subscribe(move |ping: &Ping| log.lock().push(ping.0));

        bus.publish(Ping(7));
        bus.publish(Ping(8));

        assert_eq!(*seen.lock(), vec![7, 8]);
        assert_eq!(bus.subscriber_count::<Ping>(), 2);
    }

    #[test]
    fn handler_can_unsubscribe_itself_during_delivery() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let own = Arc::clone(&slot);
        let counter = Arc::clone(&calls);
        let sub = bus.subscribe(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = own.lock().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        bus.publish(Ping(1));
        bus.publish(Ping(2));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count::<Ping>(), 0);
    }

    #[test]
    fn subscribing_during_delivery_takes_effect_next_publish() {
        let bus = EventBus::new();
        let late = Arc::new(AtomicUsize::new(0));
        let keep = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let counter = Arc::clone(&late);
        let subs = Arc::clone(&keep);
        let _outer = bus.subscribe(move |_: &Ping| {
            let counter = Arc::clone(&counter);
            let sub = inner_bus.subscribe(move |_: &Ping| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            subs.lock().push(sub);
        });

        bus.publish(Ping(1));
        assert_eq!(late.load(Ordering::SeqCst), 0);

        bus.publish(Ping(2));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_subscription_receives_clones() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel::<Ping>();

        bus.publish(Ping(3));

        assert_eq!(rx.recv().await, Some(Ping(3)));
    }

    #[test]
    fn closed_channel_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe_channel::<Ping>();
        assert_eq!(bus.subscriber_count::<Ping>(), 1);

        drop(rx);
        bus.publish(Ping(1));

        assert_eq!(bus.subscriber_count::<Ping>(), 0);
    }
}
