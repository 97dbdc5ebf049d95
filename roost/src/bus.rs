//! Typed in-process publish/subscribe for cache change events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::{Entity, EntityId, EntityPatch, Session, SessionId};

/// A change event published by the engine.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// An entity was inserted for the first time.
    EntityCreated(Entity),
    /// An entity was replaced by a fresher or speculative copy.
    EntityUpdated(Entity),
    /// An entity was removed.
    EntityDeleted(EntityId),
    /// A failed optimistic mutation was compensated. `entity` is the
    /// restored post-rollback state, `patch` the change that was reverted,
    /// so dependent aggregates can revert too.
    MutationRolledBack { entity: Entity, patch: EntityPatch },
    /// A conversation session was created or updated.
    SessionChanged(Session),
    /// A conversation session was removed.
    SessionRemoved(SessionId),
}

impl StoreEvent {
    /// The kind discriminant used for subscription matching.
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::EntityCreated(_) => EventKind::EntityCreated,
            StoreEvent::EntityUpdated(_) => EventKind::EntityUpdated,
            StoreEvent::EntityDeleted(_) => EventKind::EntityDeleted,
            StoreEvent::MutationRolledBack { .. } => EventKind::MutationRolledBack,
            StoreEvent::SessionChanged(_) => EventKind::SessionChanged,
            StoreEvent::SessionRemoved(_) => EventKind::SessionRemoved,
        }
    }
}

/// Event kind for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    MutationRolledBack,
    SessionChanged,
    SessionRemoved,
}

/// Handle returned by [`NotificationBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

type Predicate = Arc<dyn Fn(&StoreEvent) -> bool + Send + Sync>;
type Handler = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct Subscription {
    handle: SubscriptionHandle,
    kind: EventKind,
    accept: Predicate,
    handler: Handler,
}

/// Synchronous in-process event bus.
///
/// Delivery order equals publish order, and only subscriptions whose kind
/// and predicate match are invoked, so views never re-filter the full
/// stream. No cross-process or restart durability.
#[derive(Default)]
pub struct NotificationBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_handle: AtomicU64,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscriptions", &self.subscriptions.lock().unwrap().len())
            .finish()
    }
}

impl NotificationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind with an accept predicate.
    pub fn subscribe(
        &self,
        kind: EventKind,
        accept: impl Fn(&StoreEvent) -> bool + Send + Sync + 'static,
        handler: impl Fn(&StoreEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().unwrap().push(Subscription {
            handle,
            kind,
            accept: Arc::new(accept),
            handler: Arc::new(handler),
        });
        handle
    }

    /// Subscribe to every event of one kind.
    pub fn subscribe_all(
        &self,
        kind: EventKind,
        handler: impl Fn(&StoreEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.subscribe(kind, |_| true, handler)
    }

    /// Remove a subscription. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|s| s.handle != handle);
    }

    /// Deliver an event synchronously to every matching subscription.
    pub fn publish(&self, event: &StoreEvent) {
        // Matching handlers are collected before invocation so a handler may
        // subscribe or unsubscribe re-entrantly without deadlocking.
        let kind = event.kind();
        let matching: Vec<Handler> = {
            let subs = self.subscriptions.lock().unwrap();
            subs.iter()
                .filter(|s| s.kind == kind && (s.accept)(event))
                .map(|s| s.handler.clone())
                .collect()
        };

        for handler in matching {
            handler(event);
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }
}
