/**
 * Cluster connection used by the object store.
 *
 * `ClusterClient` is the seam between the cache and the API server: discovery
 * (kind to resource mapping), permission reviews, the watch primitive and the
 * handful of writes the store forwards. `KubeCluster` is the kube-rs backed
 * implementation.
 */
use crate::error::{Error, Result};
use crate::k8s::cache::AccessKey;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, PostParams};
use kube::discovery::Scope;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Client, ResourceExt};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Event stream produced by the watch primitive for one resource type.
pub type WatchStream =
    BoxStream<'static, core::result::Result<watcher::Event<DynamicObject>, watcher::Error>>;

/// Backend connection the cache talks to. Swappable at runtime.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Namespace configured for the current context.
    fn default_namespace(&self) -> &str;

    /// Map a kind to the resource that serves it.
    async fn resource(&self, gvk: &GroupVersionKind) -> Result<ApiResource>;

    /// Ask the API server whether the current identity may perform `key.verb`.
    async fn access_review(&self, key: &AccessKey) -> Result<bool>;

    /// Open a long-lived watch over a resource type. Transient errors are retried
    /// by the stream itself; the stream ends only on permanent failure.
    fn watch(&self, resource: &ApiResource, namespace: Option<&str>) -> WatchStream;

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn replace(&self, resource: &ApiResource, object: &DynamicObject)
    -> Result<DynamicObject>;

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()>;
}

/// `ClusterClient` backed by a kube client with cached discovery.
pub struct KubeCluster {
    client: Client,
    default_namespace: String,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, Scope)>>,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let default_namespace = client.default_namespace().to_string();
        Self {
            client,
            default_namespace,
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Build a cluster connection from the inferred kube config.
    ///
    /// # Errors
    ///
    /// Returns an error if the kube config cannot be inferred or the client cannot be built
    pub async fn infer(user_agent: Option<&str>) -> Result<Self> {
        let client = super::client::new(user_agent).await?;
        Ok(Self::new(client))
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Cluster-scoped kinds are always addressed without a namespace.
    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let scope = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&gvk)
            .map(|(_, scope)| scope.clone());

        match scoped_namespace(scope.as_ref(), namespace) {
            "" => Api::all_with(self.client.clone(), resource),
            namespace => Api::namespaced_with(self.client.clone(), namespace, resource),
        }
    }
}

fn scoped_namespace<'a>(scope: Option<&Scope>, namespace: &'a str) -> &'a str {
    match scope {
        Some(Scope::Cluster) => "",
        _ => namespace,
    }
}

/// Only an unknown kind is a mapping failure; an unreachable server is not.
fn discovery_error(gvk: &GroupVersionKind, err: kube::Error) -> Error {
    match err {
        kube::Error::Discovery(_) => Error::Mapping {
            key: format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind),
            message: err.to_string(),
        },
        kube::Error::Api(ref response) if response.code == 404 => Error::Mapping {
            key: format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind),
            message: err.to_string(),
        },
        other => other.into(),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    async fn resource(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        if let Some(resource) = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(gvk)
        {
            return Ok(resource.0.clone());
        }

        debug!("discovering resource for {}/{}/{}", gvk.group, gvk.version, gvk.kind);
        let (resource, caps) = kube::discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(|e| discovery_error(gvk, e))?;

        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(gvk.clone(), (resource.clone(), caps.scope));
        Ok(resource)
    }

    async fn access_review(&self, key: &AccessKey) -> Result<bool> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(key.namespace.clone()),
                    group: Some(key.group.clone()),
                    resource: Some(key.resource.clone()),
                    verb: Some(key.verb.clone()),
                    ..ResourceAttributes::default()
                }),
                ..SelfSubjectAccessReviewSpec::default()
            },
            ..SelfSubjectAccessReview::default()
        };

        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let review = api.create(&PostParams::default(), &review).await?;
        Ok(review.status.is_some_and(|status| status.allowed))
    }

    fn watch(&self, resource: &ApiResource, namespace: Option<&str>) -> WatchStream {
        let api = self.api(resource, namespace.unwrap_or_default());
        watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed()
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        match self
            .api(resource, &namespace)
            .replace(&name, &PostParams::default(), object)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(kube::Error::Api(response)) if response.code == 409 => Err(Error::Conflict {
                key: format!("{}/{namespace}/{name}", resource.plural),
                message: response.message,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        self.api(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
