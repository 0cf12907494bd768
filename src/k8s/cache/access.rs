/**
 * Permission gate for the object store.
 *
 * Decisions come from `SelfSubjectAccessReview`s and are cached per
 * (namespace, group, resource, verb) until an explicit reset.
 */
use crate::error::{Error, Result};
use crate::k8s::cluster::ClusterClient;
use crate::store::Key;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, instrument};

/// Identity of a permission check
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AccessKey {
    pub namespace: String,
    pub group: String,
    pub resource: String,
    pub verb: String,
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccessKey[Namespace='{}', Group='{}', Resource='{}', Verb='{}']",
            self.namespace, self.group, self.resource, self.verb
        )
    }
}

/// Memoized access decisions
#[derive(Debug, Default)]
pub struct AccessCache {
    access: RwLock<HashMap<AccessKey, bool>>,
}

impl AccessCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(allowed, found)`.
    pub fn get(&self, key: &AccessKey) -> (bool, bool) {
        self.access
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or((false, false), |allowed| (*allowed, true))
    }

    pub fn set(&self, key: AccessKey, allowed: bool) {
        self.access
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, allowed);
    }

    pub fn reset(&self) {
        self.access
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.access
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answers "may verb V be performed on the resource behind this key".
pub struct ResourceAccess {
    client: RwLock<Arc<dyn ClusterClient>>,
    cache: AccessCache,
    // one async lock per access key with a review in flight
    inflight: Mutex<HashMap<AccessKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResourceAccess {
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client: RwLock::new(client),
            cache: AccessCache::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Check access for `verb` on the resource addressed by `key`.
    ///
    /// # Errors
    ///
    /// - `Error::Mapping` if the key's kind cannot be mapped to a resource
    /// - the discovery error itself if the API server could not be asked
    /// - `Error::Fetch` if the access review could not be performed
    /// - `Error::AccessDenied` if the review (or the cached decision) denies access
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn has_access(&self, key: &Key, verb: &str) -> Result<()> {
        let access_key = self.access_key(key, verb).await?;

        let allowed = match self.cache.get(&access_key) {
            (allowed, true) => allowed,
            (_, false) => self.fetch_access(&access_key).await?,
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::AccessDenied(access_key))
        }
    }

    pub fn reset(&self) {
        self.cache.reset();
    }

    pub fn get(&self, key: &AccessKey) -> (bool, bool) {
        self.cache.get(key)
    }

    pub fn set(&self, key: AccessKey, allowed: bool) {
        self.cache.set(key, allowed);
    }

    /// Swap the connection used for future reviews. Cached decisions are kept.
    pub fn update_client(&self, client: Arc<dyn ClusterClient>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    fn client(&self) -> Arc<dyn ClusterClient> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn access_key(&self, key: &Key, verb: &str) -> Result<AccessKey> {
        if key.kind.is_empty() {
            return Err(Error::Mapping {
                key: key.to_string(),
                message: "unable to check access for a key without a kind".to_string(),
            });
        }

        let resource = self
            .client()
            .resource(&key.group_version_kind())
            .await?;

        Ok(AccessKey {
            namespace: key.namespace.clone(),
            group: resource.group,
            resource: resource.plural,
            verb: verb.to_string(),
        })
    }

    async fn fetch_access(&self, key: &AccessKey) -> Result<bool> {
        let gate = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        let _flight = gate.lock().await;

        // another caller may have finished the review while we waited
        if let (allowed, true) = self.cache.get(key) {
            return Ok(allowed);
        }

        debug!("fetch access start: {key}");
        let result = self.client().access_review(key).await;

        if let Ok(allowed) = result {
            self.cache.set(key.clone(), allowed);
        }
        {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if inflight.get(key).is_some_and(|current| Arc::ptr_eq(current, &gate)) {
                inflight.remove(key);
            }
        }
        debug!("fetch access finish: {key}");

        result.map_err(|e| Error::Fetch {
            key: key.clone(),
            source: Box::new(e),
        })
    }
}
