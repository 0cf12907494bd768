/**
 * Object store
 *
 * Composes the access gate, the informer factory and the sync/seen trackers
 * behind the `Store` trait. Every operation holds the coordinating gate
 * shared; reset and client replacement hold it exclusively, so a caller sees
 * either the state before a reset or the state after it.
 */
use super::access::ResourceAccess;
use super::config::{CacheConfig, VERB_DELETE, VERB_GET, VERB_LIST, VERB_UPDATE, VERB_WATCH};
use super::factory::InformerFactory;
use super::informer::Informer;
use super::resource::{ResourceType, api_version_of};
use super::subscription::{ResourceEventHandler, WatchId};
use super::tracking::{SeenKindsCache, SyncTracker};
use crate::error::{Error, Result};
use crate::k8s::cluster::ClusterClient;
use crate::store::{Key, Store, UpdateFn, Updater};
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::RwLock as Gate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ObjectStore {
    gate: Gate<()>,
    client: RwLock<Arc<dyn ClusterClient>>,
    access: ResourceAccess,
    factory: Arc<InformerFactory>,
    synced: Arc<SyncTracker>,
    seen: SeenKindsCache,
    on_update: RwLock<Vec<UpdateFn>>,
    config: CacheConfig,
    shutdown: CancellationToken,
}

impl ObjectStore {
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, config: CacheConfig) -> Self {
        Self {
            gate: Gate::new(()),
            access: ResourceAccess::new(client.clone()),
            factory: Arc::new(InformerFactory::new(
                client.clone(),
                config.namespace.clone(),
            )),
            client: RwLock::new(client),
            synced: Arc::new(SyncTracker::new()),
            seen: SeenKindsCache::new(),
            on_update: RwLock::new(Vec::new()),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The permission gate, for pre-warming or inspecting cached decisions.
    #[must_use]
    pub const fn access(&self) -> &ResourceAccess {
        &self.access
    }

    #[must_use]
    pub const fn factory(&self) -> &Arc<InformerFactory> {
        &self.factory
    }

    /// Stop every informer, clear every cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub async fn reset(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        let stopped = self.factory.reset()?;
        self.access.reset();
        self.synced.reset();
        self.seen.reset();
        info!("object store reset, stopped {stopped} informers");
        Ok(())
    }

    /// Wait up to `timeout` for every live informer to finish its initial list.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub async fn wait_for_cache_sync(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<ResourceType, bool>> {
        self.factory.wait_for_cache_sync_timeout(timeout).await
    }

    /// Log informer status on SIGUSR2 until the store shuts down.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler cannot be installed
    #[cfg(unix)]
    pub fn start_diagnostics(&self) -> Result<tokio::task::JoinHandle<()>> {
        super::diagnostics::spawn(self.factory.clone(), self.shutdown.clone())
    }

    /// Stop every informer and background task for good.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.factory.shutdown();
    }

    fn client(&self) -> Arc<dyn ClusterClient> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn resource(&self, key: &Key) -> Result<ApiResource> {
        self.client().resource(&key.group_version_kind()).await
    }

    /// The informer serving `key`, created on first use.
    ///
    /// Seen-kind and loading bookkeeping happen in the factory's critical
    /// section so concurrent callers cannot both start a loop for one type.
    async fn informer(&self, key: &Key) -> Result<Arc<Informer>> {
        let resource = self.resource(key).await?;
        let gvk = key.group_version_kind();
        let scope = key.scope_key();

        let (informer, ()) = self.factory.for_resource_then(&resource, |informer, _| {
            if !self.seen.has_seen(&key.namespace, &gvk) {
                debug!("first use of {} in {:?}", key.kind, key.namespace);
                self.seen.set_seen(&key.namespace, &gvk, true);
            }

            // a false entry means a waiter is already pending for this scope
            if !informer.has_synced() && self.synced.has_synced(&scope) {
                self.synced.set_synced(&scope, false);
                let informer = informer.clone();
                let synced = self.synced.clone();
                let stop = self.shutdown.clone();
                tokio::spawn(async move {
                    if informer.wait_for_sync(&stop).await {
                        synced.mark_synced_unless(&scope, || informer.is_stopped());
                    }
                });
            }
        })?;

        Ok(informer)
    }

    fn notify_updated(&self) {
        let callbacks: Vec<UpdateFn> = self
            .on_update
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(self);
        }
    }

    async fn delete_object(&self, key: &Key) -> Result<()> {
        let _gate = self.gate.read().await;
        self.access.has_access(key, VERB_DELETE).await?;

        let name = required_name(key)?;
        let resource = self.resource(key).await?;
        self.client()
            .delete(&resource, &key.namespace, name)
            .await?;
        info!("deleted {key}");
        Ok(())
    }

    async fn update_object(&self, key: &Key, updater: Updater) -> Result<()> {
        let _gate = self.gate.read().await;
        self.access.has_access(key, VERB_UPDATE).await?;

        let name = required_name(key)?;
        let resource = self.resource(key).await?;
        let client = self.client();

        let mut object = client
            .get(&resource, &key.namespace, name)
            .await?
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })?;
        updater(&mut object)?;
        client.replace(&resource, &object).await?;
        debug!("updated {key}");
        Ok(())
    }

    fn remove_watch(&self, gvk: &GroupVersionKind, resource: &ResourceType) -> Result<()> {
        self.factory.delete_then(resource, |stopped| {
            self.seen.delete_kind(gvk);
            self.synced.delete_kind(&api_version_of(gvk), &gvk.kind);
            if !stopped {
                debug!("{resource} was not being watched");
            }
        })?;
        Ok(())
    }
}

/// Access denials pass through untouched; everything else gets the operation
/// and key attached.
fn wrap(err: Error, op: &str, key: &Key) -> Error {
    match err {
        Error::AccessDenied(_) => err,
        other => other.context(format!("{op} {key}")),
    }
}

fn required_name(key: &Key) -> Result<&str> {
    key.name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::Custom(format!("{key} does not name an object")))
}

#[async_trait]
impl Store for ObjectStore {
    async fn list(&self, key: &Key) -> Result<(Vec<DynamicObject>, bool)> {
        let _gate = self.gate.read().await;
        self.access
            .has_access(key, VERB_LIST)
            .await
            .map_err(|e| wrap(e, VERB_LIST, key))?;

        let informer = self
            .informer(key)
            .await
            .map_err(|e| wrap(e, VERB_LIST, key))?;
        let loading = !self.synced.has_synced(&key.scope_key());

        Ok((informer.list(key), loading))
    }

    async fn get(&self, key: &Key) -> Result<Option<DynamicObject>> {
        let _gate = self.gate.read().await;
        self.access
            .has_access(key, VERB_GET)
            .await
            .map_err(|e| wrap(e, VERB_GET, key))?;

        let name = required_name(key).map_err(|e| wrap(e, VERB_GET, key))?;
        let informer = self
            .informer(key)
            .await
            .map_err(|e| wrap(e, VERB_GET, key))?;

        Ok(informer.get(&key.namespace, name))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.delete_object(key)
            .await
            .map_err(|e| wrap(e, VERB_DELETE, key))?;
        self.notify_updated();
        Ok(())
    }

    async fn watch(&self, key: &Key, handler: Arc<dyn ResourceEventHandler>) -> Result<WatchId> {
        let _gate = self.gate.read().await;
        self.access
            .has_access(key, VERB_WATCH)
            .await
            .map_err(|e| wrap(e, VERB_WATCH, key))?;

        let informer = self
            .informer(key)
            .await
            .map_err(|e| wrap(e, VERB_WATCH, key))?;
        let id = informer.subscribe(key.clone(), handler);
        debug!("watch {id} registered for {key}");
        Ok(id)
    }

    async fn unwatch(&self, kinds: &[GroupVersionKind]) -> Result<()> {
        let _gate = self.gate.read().await;
        let client = self.client();

        for gvk in kinds {
            match client.resource(gvk).await {
                Ok(resource) => {
                    self.remove_watch(gvk, &ResourceType::from(&resource))?;
                }
                Err(e) => warn!("unable to unwatch {}: {}", gvk.kind, e),
            }
        }
        Ok(())
    }

    async fn update_cluster_client(&self, client: Arc<dyn ClusterClient>) -> Result<()> {
        let _gate = self.gate.write().await;
        self.access.update_client(client.clone());
        self.factory.update_client(client.clone());
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
        info!("cluster client updated");
        Ok(())
    }

    fn register_on_update(&self, f: UpdateFn) {
        self.on_update
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(f);
    }

    async fn update(&self, key: &Key, updater: Updater) -> Result<()> {
        self.update_object(key, updater)
            .await
            .map_err(|e| wrap(e, VERB_UPDATE, key))?;
        self.notify_updated();
        Ok(())
    }

    async fn is_loading(&self, key: &Key) -> bool {
        let _gate = self.gate.read().await;
        !self.synced.has_synced(&key.scope_key())
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
