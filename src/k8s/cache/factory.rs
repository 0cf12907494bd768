/**
 * Informer factory
 *
 * Starts at most one informer per resource type, ties each to a lifecycle
 * token from the registry and provides the cache-sync barrier.
 */
use super::informer::{Informer, InformerState};
use super::lifecycle::LifecycleRegistry;
use super::resource::ResourceType;
use crate::error::{Result, lock_poisoned_error};
use crate::k8s::cluster::ClusterClient;
use futures::future::join_all;
use kube::api::ApiResource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// `None` marks a type that was started and then torn down
type InformerMap = HashMap<ResourceType, Option<Arc<Informer>>>;

pub struct InformerFactory {
    informers: Mutex<InformerMap>,
    lifecycle: LifecycleRegistry,
    client: RwLock<Arc<dyn ClusterClient>>,
    namespace: Option<String>,
}

impl InformerFactory {
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, namespace: Option<String>) -> Self {
        Self {
            informers: Mutex::new(HashMap::new()),
            lifecycle: LifecycleRegistry::new(),
            client: RwLock::new(client),
            namespace,
        }
    }

    /// The informer for `resource`, started if it is not already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn for_resource(&self, resource: &ApiResource) -> Result<Arc<Informer>> {
        self.for_resource_then(resource, |_, _| ())
            .map(|(informer, ())| informer)
    }

    /// Like [`InformerFactory::for_resource`], running `f` in the same critical
    /// section. `f` learns whether this call created the informer.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn for_resource_then<T>(
        &self,
        resource: &ApiResource,
        f: impl FnOnce(&Arc<Informer>, bool) -> T,
    ) -> Result<(Arc<Informer>, T)> {
        let resource_type = ResourceType::from(resource);
        let mut informers = self.informers()?;

        if let Some(Some(informer)) = informers.get(&resource_type) {
            if !informer.is_stopped() {
                let out = f(informer, false);
                return Ok((informer.clone(), out));
            }
        }

        // a stopped informer may still hold a token; clear it before re-adding
        self.lifecycle.delete(&resource_type);
        let token = self.lifecycle.add_child(resource_type.clone());
        let informer = Informer::new(resource.clone(), token);

        let events = self.client().watch(resource, self.namespace.as_deref());
        tokio::spawn(informer.clone().run(events));
        debug!("created informer {} for {}", informer.id(), resource_type);

        informers.insert(resource_type, Some(informer.clone()));
        let out = f(&informer, true);
        Ok((informer, out))
    }

    /// Stop the informer for `resource_type`. Returns false if none was running.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn delete(&self, resource_type: &ResourceType) -> Result<bool> {
        self.delete_then(resource_type, |_| ())
            .map(|(stopped, ())| stopped)
    }

    /// Like [`InformerFactory::delete`], running `f` in the same critical section.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn delete_then<T>(
        &self,
        resource_type: &ResourceType,
        f: impl FnOnce(bool) -> T,
    ) -> Result<(bool, T)> {
        let mut informers = self.informers()?;
        self.lifecycle.delete(resource_type);

        let stopped = match informers.get_mut(resource_type) {
            Some(entry) => entry.take().is_some(),
            None => false,
        };
        if stopped {
            info!("stopped informer for {resource_type}");
        }

        Ok((stopped, f(stopped)))
    }

    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn state(&self, resource_type: &ResourceType) -> Result<InformerState> {
        Ok(match self.informers()?.get(resource_type) {
            None => InformerState::Unrequested,
            Some(None) => InformerState::Stopped,
            Some(Some(informer)) => informer.state(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn get(&self, resource_type: &ResourceType) -> Result<Option<Arc<Informer>>> {
        Ok(self.informers()?.get(resource_type).cloned().flatten())
    }

    /// Resource types with a live informer, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn resources(&self) -> Result<Vec<ResourceType>> {
        let mut resources: Vec<ResourceType> = self
            .informers()?
            .iter()
            .filter(|(_, informer)| informer.is_some())
            .map(|(resource_type, _)| resource_type.clone())
            .collect();
        resources.sort();
        Ok(resources)
    }

    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn len(&self) -> Result<usize> {
        Ok(self.informers()?.values().filter(|i| i.is_some()).count())
    }

    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Wait until every live informer has synced or `stop` fires.
    ///
    /// Reports each type separately so a kind that never syncs can be told
    /// apart from the rest.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub async fn wait_for_cache_sync(
        &self,
        stop: &CancellationToken,
    ) -> Result<HashMap<ResourceType, bool>> {
        let informers: Vec<Arc<Informer>> = self.informers()?.values().flatten().cloned().collect();

        let results = join_all(informers.iter().map(|informer| async move {
            (
                informer.resource_type().clone(),
                informer.wait_for_sync(stop).await,
            )
        }))
        .await;

        Ok(results.into_iter().collect())
    }

    /// [`InformerFactory::wait_for_cache_sync`] bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub async fn wait_for_cache_sync_timeout(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<ResourceType, bool>> {
        let stop = CancellationToken::new();
        let timer = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                stop.cancel();
            })
        };

        let result = self.wait_for_cache_sync(&stop).await;
        timer.abort();
        result
    }

    /// Stop every informer and forget them all. Returns how many were live.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lock is poisoned
    pub fn reset(&self) -> Result<usize> {
        let mut informers = self.informers()?;
        self.lifecycle.reset_all();
        let live = informers.values().filter(|i| i.is_some()).count();
        informers.clear();
        Ok(live)
    }

    /// Use `client` for informers created from now on.
    pub fn update_client(&self, client: Arc<dyn ClusterClient>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    /// Stop every watch loop for good.
    pub fn shutdown(&self) {
        self.lifecycle.shutdown();
    }

    fn client(&self) -> Arc<dyn ClusterClient> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn informers(&self) -> Result<MutexGuard<'_, InformerMap>> {
        self.informers
            .lock()
            .map_err(|_| lock_poisoned_error("informer factory lock poisoned"))
    }
}
