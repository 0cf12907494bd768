use super::resource::ResourceType;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owns the cancellation token of every running watch loop.
///
/// All tokens are children of one root token, so dropping the registry stops
/// every loop it ever handed a token to.
#[derive(Debug, Default)]
pub struct LifecycleRegistry {
    root: CancellationToken,
    children: Mutex<HashMap<ResourceType, CancellationToken>>,
}

impl LifecycleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for `resource_type`.
    ///
    /// Callers must `delete` a live type before adding it again. A token that
    /// is overwritten anyway is cancelled so its loop does not run unowned.
    pub fn add_child(&self, resource_type: ResourceType) -> CancellationToken {
        let token = self.root.child_token();
        if let Some(previous) = self.children().insert(resource_type.clone(), token.clone()) {
            warn!("replacing live watch loop for {resource_type}");
            previous.cancel();
        }
        token
    }

    /// Cancel and forget the token for `resource_type`. Returns false if none was registered.
    pub fn delete(&self, resource_type: &ResourceType) -> bool {
        self.children().remove(resource_type).is_some_and(|token| {
            token.cancel();
            debug!("stopped watch loop for {resource_type}");
            true
        })
    }

    /// Cancel and forget every token. Returns how many were registered.
    pub fn reset_all(&self) -> usize {
        let mut children = self.children();
        let count = children.len();
        for (_, token) in children.drain() {
            token.cancel();
        }
        count
    }

    pub fn contains(&self, resource_type: &ResourceType) -> bool {
        self.children().contains_key(resource_type)
    }

    pub fn len(&self) -> usize {
        self.children().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel the root token, stopping every loop, registered or not.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.reset_all();
    }

    fn children(&self) -> MutexGuard<'_, HashMap<ResourceType, CancellationToken>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LifecycleRegistry {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
