use crate::store::Key;
use kube::api::DynamicObject;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// A change applied to an informer's store
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    Added(DynamicObject),
    Updated {
        old: DynamicObject,
        new: DynamicObject,
    },
    Deleted(DynamicObject),
}

impl ObjectEvent {
    /// The object as it is after the change (or as it was, for deletes).
    #[must_use]
    pub const fn object(&self) -> &DynamicObject {
        match self {
            Self::Added(object) | Self::Deleted(object) => object,
            Self::Updated { new, .. } => new,
        }
    }
}

/// Callbacks invoked for objects matching a watched key
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, _object: &DynamicObject) {}

    fn on_update(&self, _old: &DynamicObject, _new: &DynamicObject) {}

    fn on_delete(&self, _object: &DynamicObject) {}
}

/// Adapts a closure over [`ObjectEvent`] into a handler.
pub struct HandlerFn<F>(F);

impl<F> ResourceEventHandler for HandlerFn<F>
where
    F: Fn(ObjectEvent) + Send + Sync,
{
    fn on_add(&self, object: &DynamicObject) {
        (self.0)(ObjectEvent::Added(object.clone()));
    }

    fn on_update(&self, old: &DynamicObject, new: &DynamicObject) {
        (self.0)(ObjectEvent::Updated {
            old: old.clone(),
            new: new.clone(),
        });
    }

    fn on_delete(&self, object: &DynamicObject) {
        (self.0)(ObjectEvent::Deleted(object.clone()));
    }
}

#[must_use]
pub fn handler_fn<F>(f: F) -> Arc<dyn ResourceEventHandler>
where
    F: Fn(ObjectEvent) + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Identifies one `watch` registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(Uuid);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscription {
    id: WatchId,
    key: Key,
    handler: Arc<dyn ResourceEventHandler>,
}

/// Handlers registered on one informer
#[derive(Default)]
pub struct HandlerSet {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl HandlerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: Key, handler: Arc<dyn ResourceEventHandler>) -> WatchId {
        let id = WatchId(Uuid::new_v4());
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription { id, key, handler });
        id
    }

    pub fn unsubscribe(&self, id: WatchId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Invoke every handler whose key matches the event's object.
    ///
    /// Handlers run outside the lock so they may register or remove watches.
    pub fn notify(&self, event: &ObjectEvent) {
        let matching: Vec<Arc<dyn ResourceEventHandler>> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.key.matches(event.object()))
            .map(|s| s.handler.clone())
            .collect();

        for handler in matching {
            match event {
                ObjectEvent::Added(object) => handler.on_add(object),
                ObjectEvent::Updated { old, new } => handler.on_update(old, new),
                ObjectEvent::Deleted(object) => handler.on_delete(object),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
