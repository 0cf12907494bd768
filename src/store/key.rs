use crate::action::Payload;
use crate::error::{Error, Result};
use crate::k8s::cache::{api_version_of, gvk_from_api_version};
use kube::ResourceExt;
use kube::api::{DynamicObject, GroupVersionKind};
use std::collections::BTreeMap;
use std::fmt;

/// Addresses data in the object store.
///
/// `name` selects a single object and `selector` filters a list; a key carries
/// at most one of the two in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key {
    pub namespace: String,
    pub api_version: String,
    pub kind: String,
    pub name: Option<String>,
    pub selector: Option<BTreeMap<String, String>>,
}

impl Key {
    #[must_use]
    pub fn new(namespace: &str, api_version: &str, kind: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_selector<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.selector = Some(
            labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn group_version_kind(&self) -> GroupVersionKind {
        gvk_from_api_version(&self.api_version, &self.kind)
    }

    /// The key with name and selector stripped, identifying the scope a list
    /// or watch is loading for.
    #[must_use]
    pub fn scope_key(&self) -> Self {
        Self::new(&self.namespace, &self.api_version, &self.kind)
    }

    /// Whether `object` falls within this key's namespace, name and selector.
    /// Cluster-scoped objects match any namespace.
    #[must_use]
    pub fn matches(&self, object: &DynamicObject) -> bool {
        if !self.namespace.is_empty() {
            if let Some(namespace) = object.metadata.namespace.as_deref() {
                if namespace != self.namespace {
                    return false;
                }
            }
        }

        if let Some(name) = &self.name {
            if object.metadata.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }

        self.selector.as_ref().is_none_or(|selector| {
            let labels = object.labels();
            selector
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|value| value == v))
        })
    }

    /// # Errors
    ///
    /// Returns an error if the object carries no type information
    pub fn from_object(object: &DynamicObject) -> Result<Self> {
        let types = object.types.as_ref().ok_or_else(|| {
            Error::Custom(format!("object {} has no apiVersion or kind", object.name_any()))
        })?;

        Ok(Self {
            namespace: object.namespace().unwrap_or_default(),
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            name: Some(object.name_any()),
            selector: None,
        })
    }

    #[must_use]
    pub fn from_group_version_kind(gvk: &GroupVersionKind) -> Self {
        Self::new("", &api_version_of(gvk), &gvk.kind)
    }

    /// The selector is not carried in payloads.
    #[must_use]
    pub fn to_action_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("namespace", self.namespace.as_str());
        payload.insert("apiVersion", self.api_version.as_str());
        payload.insert("kind", self.kind.as_str());
        payload.insert("name", self.name.as_deref().unwrap_or_default());
        payload
    }

    /// # Errors
    ///
    /// Returns an error if `apiVersion`, `kind` or `name` are missing, or if
    /// `namespace` is present but not a string
    pub fn from_payload(payload: &Payload) -> Result<Self> {
        let namespace = payload.optional_string("namespace")?;
        let api_version = payload.string("apiVersion")?;
        let kind = payload.string("kind")?;
        let name = payload.string("name")?;

        Ok(Self {
            namespace,
            api_version,
            kind,
            name: (!name.is_empty()).then_some(name),
            selector: None,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CacheKey[")?;
        if !self.namespace.is_empty() {
            write!(f, "Namespace='{}', ", self.namespace)?;
        }
        write!(f, "ApiVersion='{}', Kind='{}'", self.api_version, self.kind)?;

        if let Some(name) = self.name.as_deref().filter(|name| !name.is_empty()) {
            write!(f, ", Name='{name}'")?;
        }

        if let Some(selector) = self.selector.as_ref().filter(|s| !s.is_empty()) {
            let rendered: Vec<String> = selector.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, ", Selector='{}'", rendered.join(","))?;
        }

        f.write_str("]")
    }
}
