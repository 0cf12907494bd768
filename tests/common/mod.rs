#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::watcher;
use kubecache::error::{Error, Result};
use kubecache::k8s::cache::AccessKey;
use kubecache::k8s::cluster::{ClusterClient, WatchStream};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;

type WatchEvent = core::result::Result<watcher::Event<DynamicObject>, watcher::Error>;

/// In-memory cluster: watch events are pushed by the test, access reviews
/// are counted, writes land in a map.
pub struct FakeCluster {
    kinds: HashMap<GroupVersionKind, ApiResource>,
    denied: Mutex<HashSet<(String, String)>>,
    reviews: AtomicUsize,
    review_delay: Mutex<Duration>,
    fail_reviews: AtomicBool,
    offline: AtomicBool,
    watchers: Mutex<HashMap<String, Vec<UnboundedSender<WatchEvent>>>>,
    watches: Mutex<HashMap<String, usize>>,
    objects: Mutex<HashMap<(String, String, String), DynamicObject>>,
    conflict: AtomicBool,
    deleted: Mutex<Vec<String>>,
}

pub fn pods() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Pod"))
}

pub fn deployments() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"))
}

pub fn config_maps() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"))
}

pub fn object(resource: &ApiResource, namespace: &str, name: &str) -> DynamicObject {
    let mut object = DynamicObject::new(name, resource).within(namespace);
    object.metadata.resource_version = Some("1".to_string());
    object
}

pub fn labelled(
    resource: &ApiResource,
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
) -> DynamicObject {
    let mut object = object(resource, namespace, name);
    object.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<BTreeMap<_, _>>(),
    );
    object
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        let kinds = [pods(), deployments(), config_maps()]
            .into_iter()
            .map(|ar| {
                (
                    GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind),
                    ar,
                )
            })
            .collect();

        Arc::new(Self {
            kinds,
            denied: Mutex::new(HashSet::new()),
            reviews: AtomicUsize::new(0),
            review_delay: Mutex::new(Duration::ZERO),
            fail_reviews: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            watchers: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            conflict: AtomicBool::new(false),
            deleted: Mutex::new(Vec::new()),
        })
    }

    pub fn deny(&self, verb: &str, resource: &str) {
        self.denied
            .lock()
            .unwrap()
            .insert((verb.to_string(), resource.to_string()));
    }

    pub fn reviews(&self) -> usize {
        self.reviews.load(Ordering::SeqCst)
    }

    pub fn set_review_delay(&self, delay: Duration) {
        *self.review_delay.lock().unwrap() = delay;
    }

    pub fn fail_reviews(&self, fail: bool) {
        self.fail_reviews.store(fail, Ordering::SeqCst);
    }

    /// Make discovery fail as if the API server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// End every open watch of `plural`.
    pub fn close(&self, plural: &str) {
        self.watchers.lock().unwrap().remove(plural);
    }

    pub fn set_conflict(&self, conflict: bool) {
        self.conflict.store(conflict, Ordering::SeqCst);
    }

    /// How many watches were opened for a resource plural.
    pub fn watch_count(&self, plural: &str) -> usize {
        self.watches
            .lock()
            .unwrap()
            .get(plural)
            .copied()
            .unwrap_or_default()
    }

    /// Push one event to every open watch of `plural`.
    pub fn send(&self, plural: &str, event: watcher::Event<DynamicObject>) {
        if let Some(senders) = self.watchers.lock().unwrap().get_mut(plural) {
            senders.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        }
    }

    /// Complete an initial list for `plural` with `objects`.
    pub fn sync(&self, plural: &str, objects: Vec<DynamicObject>) {
        self.send(plural, watcher::Event::Init);
        for object in objects {
            self.send(plural, watcher::Event::InitApply(object));
        }
        self.send(plural, watcher::Event::InitDone);
    }

    pub fn put(&self, resource: &ApiResource, object: DynamicObject) {
        self.objects.lock().unwrap().insert(
            (
                resource.plural.clone(),
                object.namespace().unwrap_or_default(),
                object.name_any(),
            ),
            object,
        );
    }

    pub fn stored(&self, resource: &ApiResource, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(
                resource.plural.clone(),
                namespace.to_string(),
                name.to_string(),
            ))
            .cloned()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn default_namespace(&self) -> &str {
        "default"
    }

    async fn resource(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
        }
        self.kinds.get(gvk).cloned().ok_or_else(|| Error::Mapping {
            key: gvk.kind.clone(),
            message: "no matches for kind".to_string(),
        })
    }

    async fn access_review(&self, key: &AccessKey) -> Result<bool> {
        self.reviews.fetch_add(1, Ordering::SeqCst);
        let delay = *self.review_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_reviews.load(Ordering::SeqCst) {
            return Err(Error::Custom("connection refused".to_string()));
        }

        Ok(!self
            .denied
            .lock()
            .unwrap()
            .contains(&(key.verb.clone(), key.resource.clone())))
    }

    fn watch(&self, resource: &ApiResource, _namespace: Option<&str>) -> WatchStream {
        let (tx, rx) = unbounded_channel();
        self.watchers
            .lock()
            .unwrap()
            .entry(resource.plural.clone())
            .or_default()
            .push(tx);
        *self
            .watches
            .lock()
            .unwrap()
            .entry(resource.plural.clone())
            .or_default() += 1;
        UnboundedReceiverStream::new(rx).boxed()
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.stored(resource, namespace, name))
    }

    async fn replace(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        if self.conflict.load(Ordering::SeqCst) {
            return Err(Error::Conflict {
                key: object.name_any(),
                message: "the object has been modified".to_string(),
            });
        }
        self.put(resource, object.clone());
        Ok(object.clone())
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        let removed = self.objects.lock().unwrap().remove(&(
            resource.plural.clone(),
            namespace.to_string(),
            name.to_string(),
        ));
        if removed.is_none() {
            return Err(Error::NotFound {
                key: format!("{}/{namespace}/{name}", resource.plural),
            });
        }
        self.deleted
            .lock()
            .unwrap()
            .push(format!("{}/{namespace}/{name}", resource.plural));
        Ok(())
    }
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
