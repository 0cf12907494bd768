/**
 * Object store interface
 *
 * `Store` is what callers program against: permission-gated reads served from
 * the local cache, writes forwarded to the API server, and watch registration.
 */
mod get_as;
mod key;

pub use get_as::get_as;
pub use key::Key;

use crate::error::Result;
use crate::k8s::cache::{ResourceEventHandler, WatchId};
use crate::k8s::cluster::ClusterClient;
use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use std::sync::Arc;

/// Called after every successful mutation made through a store.
pub type UpdateFn = Arc<dyn Fn(&dyn Store) + Send + Sync>;

/// Mutates an object in place during `Store::update`.
pub type Updater = Box<dyn FnOnce(&mut DynamicObject) -> Result<()> + Send>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Objects matching `key`, and whether the kind is still loading.
    async fn list(&self, key: &Key) -> Result<(Vec<DynamicObject>, bool)>;

    /// `None` when the object is not in the cache.
    async fn get(&self, key: &Key) -> Result<Option<DynamicObject>>;

    async fn delete(&self, key: &Key) -> Result<()>;

    async fn watch(&self, key: &Key, handler: Arc<dyn ResourceEventHandler>) -> Result<WatchId>;

    /// Stop watching the given kinds. Kinds not being watched are ignored.
    async fn unwatch(&self, kinds: &[GroupVersionKind]) -> Result<()>;

    async fn update_cluster_client(&self, client: Arc<dyn ClusterClient>) -> Result<()>;

    fn register_on_update(&self, f: UpdateFn);

    /// Read the current object, apply `updater` and write it back.
    async fn update(&self, key: &Key, updater: Updater) -> Result<()>;

    async fn is_loading(&self, key: &Key) -> bool;
}
