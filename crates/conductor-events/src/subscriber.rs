//! Synchronous event subscriber trait and registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::event::ConductorEvent;

/// Filter function type for event subscribers.
pub type EventFilter = Box<dyn Fn(&ConductorEvent) -> bool + Send + Sync>;

/// Trait for synchronous event subscribers.
///
/// Implement this trait to receive events synchronously. Subscribers should
/// not perform heavy work in `on_event` since it runs on the publisher's
/// call stack, under the emitter's lock already released but still
/// delaying whoever called `emit`. For heavy processing, subscribe to the
/// bus's async [`crate::EventReceiver`] instead.
pub trait EventSubscriber: Send + Sync {
    /// Called when an event is published.
    fn on_event(&self, event: &ConductorEvent);

    /// Optional filter for event types. Default accepts everything.
    fn accepts(&self, event: &ConductorEvent) -> bool {
        let _ = event;
        true
    }

    /// Optional name for debugging.
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Registration handle for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Registry for managing synchronous event subscribers.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn EventSubscriber>>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.read().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &count)
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber. Returns a handle for later unregistration.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        let id = SubscriberId::new();
        let name = subscriber.name().to_string();

        let mut subs = self.subscribers.write().expect("lock poisoned");
        subs.insert(id, subscriber);

        debug!(subscriber_name = %name, "subscriber registered");
        id
    }

    /// Unregister a subscriber. Returns `true` if it was present.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.write().expect("lock poisoned");
        subs.remove(&id).is_some()
    }

    /// Notify all subscribers of an event. Never blocks the caller past a
    /// subscriber that panics — panics are caught and logged.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn notify(&self, event: &ConductorEvent) {
        let subs = self.subscribers.read().expect("lock poisoned");

        for (id, subscriber) in subs.iter() {
            if subscriber.accepts(event) {
                trace!(
                    subscriber_name = %subscriber.name(),
                    event_type = %event.event_type(),
                    "notifying subscriber"
                );

                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    subscriber.on_event(event);
                }));

                if let Err(e) = result {
                    warn!(
                        subscriber_id = ?id,
                        subscriber_name = %subscriber.name(),
                        error = ?e,
                        "subscriber panicked"
                    );
                }
            }
        }
    }

    /// Number of registered subscribers.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.read().expect("lock poisoned").len()
    }

    /// True if no subscribers are registered.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().expect("lock poisoned").is_empty()
    }
}

/// A subscriber built from a plain closure plus an optional filter.
pub struct FilterSubscriber<F>
where
    F: Fn(&ConductorEvent) + Send + Sync,
{
    name: String,
    filter: Option<EventFilter>,
    handler: F,
}

impl<F> FilterSubscriber<F>
where
    F: Fn(&ConductorEvent) + Send + Sync,
{
    /// Create a new filter subscriber.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            filter: None,
            handler,
        }
    }

    /// Attach a predicate that must return `true` for `on_event` to run.
    #[must_use]
    pub fn with_filter<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ConductorEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }
}

impl<F> EventSubscriber for FilterSubscriber<F>
where
    F: Fn(&ConductorEvent) + Send + Sync,
{
    fn on_event(&self, event: &ConductorEvent) {
        (self.handler)(event);
    }

    fn accepts(&self, event: &ConductorEvent) -> bool {
        match &self.filter {
            Some(f) => f(event),
            None => true,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use conductor_core::SessionId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event() -> ConductorEvent {
        ConductorEvent::ConversationStart {
            metadata: EventMetadata::new("test", SessionId::global()),
            last_user_message: None,
        }
    }

    struct CountingSubscriber {
        name: String,
        count: AtomicUsize,
    }

    impl CountingSubscriber {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                count: AtomicUsize::new(0),
            }
        }

        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl EventSubscriber for CountingSubscriber {
        fn on_event(&self, _event: &ConductorEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn register_and_unregister() {
        let registry = SubscriberRegistry::new();
        assert!(registry.is_empty());

        let subscriber = Arc::new(CountingSubscriber::new("test"));
        let id = registry.register(subscriber);

        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn notify_delivers_to_all_subscribers() {
        let registry = SubscriberRegistry::new();
        let sub1 = Arc::new(CountingSubscriber::new("sub1"));
        let sub2 = Arc::new(CountingSubscriber::new("sub2"));
        registry.register(Arc::clone(&sub1) as Arc<dyn EventSubscriber>);
        registry.register(Arc::clone(&sub2) as Arc<dyn EventSubscriber>);

        registry.notify(&sample_event());

        assert_eq!(sub1.count(), 1);
        assert_eq!(sub2.count(), 1);
    }

    #[test]
    fn filter_subscriber_respects_predicate() {
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);

        let subscriber = FilterSubscriber::new("text_only", move |_event| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        })
        .with_filter(|e| e.event_type() == "user_message");

        let registry = SubscriberRegistry::new();
        registry.register(Arc::new(subscriber));

        registry.notify(&sample_event());
        assert_eq!(received.load(Ordering::SeqCst), 0);

        let user_message = ConductorEvent::UserMessage {
            metadata: EventMetadata::new("test", SessionId::global()),
            text: "correction".to_string(),
        };
        registry.notify(&user_message);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
