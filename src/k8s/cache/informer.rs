/**
 * Informer: one watch loop mirroring a resource type into an indexed store.
 *
 * The loop consumes kube-runtime watcher events, keeps the store current and
 * fans changes out to the registered handlers. It runs until its lifecycle
 * token is cancelled or the watch stream ends for good.
 */
use super::resource::ResourceType;
use super::subscription::{HandlerSet, ObjectEvent, ResourceEventHandler, WatchId};
use crate::k8s::cluster::WatchStream;
use crate::store::Key;
use futures::StreamExt;
use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::watcher;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a resource type inside the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InformerState {
    Unrequested,
    Starting,
    Synced,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ObjectKey {
    namespace: String,
    name: String,
}

impl ObjectKey {
    fn from_object(object: &DynamicObject) -> Self {
        Self {
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
        }
    }
}

pub struct Informer {
    id: Uuid,
    resource_type: ResourceType,
    api_resource: ApiResource,
    store: RwLock<HashMap<ObjectKey, DynamicObject>>,
    synced: watch::Sender<bool>,
    handlers: HandlerSet,
    token: CancellationToken,
}

impl Informer {
    #[must_use]
    pub fn new(api_resource: ApiResource, token: CancellationToken) -> Arc<Self> {
        let (synced, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            resource_type: ResourceType::from(&api_resource),
            api_resource,
            store: RwLock::new(HashMap::new()),
            synced,
            handlers: HandlerSet::new(),
            token,
        })
    }

    /// Unique per informer instance; a recreated informer gets a new id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    #[must_use]
    pub const fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn state(&self) -> InformerState {
        if self.is_stopped() {
            InformerState::Stopped
        } else if self.has_synced() {
            InformerState::Synced
        } else {
            InformerState::Starting
        }
    }

    /// Objects matching `key`, ordered by namespace and name.
    #[must_use]
    pub fn list(&self, key: &Key) -> Vec<DynamicObject> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<(&ObjectKey, &DynamicObject)> =
            store.iter().filter(|(_, object)| key.matches(object)).collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        matching.into_iter().map(|(_, object)| object.clone()).collect()
    }

    /// Look up one object. Falls back to the cluster-scoped entry.
    #[must_use]
    pub fn get(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let namespaced = ObjectKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        store
            .get(&namespaced)
            .or_else(|| {
                store.get(&ObjectKey {
                    namespace: String::new(),
                    name: name.to_string(),
                })
            })
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self, key: Key, handler: Arc<dyn ResourceEventHandler>) -> WatchId {
        self.handlers.subscribe(key, handler)
    }

    pub fn unsubscribe(&self, id: WatchId) -> bool {
        self.handlers.unsubscribe(id)
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Wait for the initial backfill. Returns false if `stop` fires or the
    /// informer is stopped first.
    pub async fn wait_for_sync(&self, stop: &CancellationToken) -> bool {
        if self.is_stopped() {
            return false;
        }

        let mut synced = self.synced.subscribe();
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            result = synced.wait_for(|synced| *synced) => result.is_ok(),
            () = stop.cancelled() => self.has_synced(),
        }
    }

    /// Drive the watch loop until cancelled or the stream ends.
    pub async fn run(self: Arc<Self>, mut events: WatchStream) {
        info!("starting informer for {}", self.resource_type);
        let mut relist = None;

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    info!("informer for {} stopped", self.resource_type);
                    break;
                }
                next = events.next() => match next {
                    Some(Ok(event)) => self.apply(event, &mut relist),
                    Some(Err(e)) => warn!("watch error for {}: {}", self.resource_type, e),
                    None => {
                        warn!("watch stream for {} ended, informer will not sync", self.resource_type);
                        break;
                    }
                },
            }
        }
    }

    /// Apply one watcher event to the store and notify handlers.
    ///
    /// `relist` buffers objects between `Init` and `InitDone`.
    pub(crate) fn apply(
        &self,
        event: watcher::Event<DynamicObject>,
        relist: &mut Option<HashMap<ObjectKey, DynamicObject>>,
    ) {
        let changes = match event {
            watcher::Event::Init => {
                debug!("relist started for {}", self.resource_type);
                *relist = Some(HashMap::new());
                return;
            }
            watcher::Event::InitApply(object) => {
                relist
                    .get_or_insert_with(HashMap::new)
                    .insert(ObjectKey::from_object(&object), object);
                return;
            }
            watcher::Event::InitDone => {
                let fresh = relist.take().unwrap_or_default();
                let changes = self.replace(fresh);
                if !self.synced.send_replace(true) {
                    info!(
                        "informer for {} synced with {} objects",
                        self.resource_type,
                        self.len()
                    );
                }
                changes
            }
            watcher::Event::Apply(object) => {
                let previous = self
                    .store
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(ObjectKey::from_object(&object), object.clone());
                vec![match previous {
                    Some(old) => ObjectEvent::Updated { old, new: object },
                    None => ObjectEvent::Added(object),
                }]
            }
            watcher::Event::Delete(object) => {
                let removed = self
                    .store
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&ObjectKey::from_object(&object));
                vec![ObjectEvent::Deleted(removed.unwrap_or(object))]
            }
        };

        for change in &changes {
            if self.token.is_cancelled() {
                return;
            }
            self.handlers.notify(change);
        }
    }

    /// Swap in a relisted store, returning the differences as events.
    fn replace(&self, fresh: HashMap<ObjectKey, DynamicObject>) -> Vec<ObjectEvent> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::take(&mut *store);

        let mut changes = Vec::new();
        for (key, object) in &fresh {
            match previous.get(key) {
                Some(old) if old.resource_version() == object.resource_version() => {}
                Some(old) => changes.push(ObjectEvent::Updated {
                    old: old.clone(),
                    new: object.clone(),
                }),
                None => changes.push(ObjectEvent::Added(object.clone())),
            }
        }
        for (key, old) in previous {
            if !fresh.contains_key(&key) {
                changes.push(ObjectEvent::Deleted(old));
            }
        }

        *store = fresh;
        changes
    }
}

impl std::fmt::Debug for Informer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("state", &self.state())
            .field("objects", &self.len())
            .finish_non_exhaustive()
    }
}
