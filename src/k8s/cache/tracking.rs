use crate::store::Key;
use kube::api::GroupVersionKind;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Tracks whether the initial backfill for a key has completed.
///
/// Keys that were never registered read as synced so callers are not kept
/// waiting on kinds nobody asked the tracker about.
#[derive(Debug, Default)]
pub struct SyncTracker {
    status: RwLock<HashMap<String, SyncEntry>>,
}

#[derive(Debug)]
struct SyncEntry {
    api_version: String,
    kind: String,
    synced: bool,
}

impl SyncTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_synced(&self, key: &Key, synced: bool) {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                SyncEntry {
                    api_version: key.api_version.clone(),
                    kind: key.kind.clone(),
                    synced,
                },
            );
    }

    /// Mark `key` synced unless `stale` holds, checked under the tracker lock.
    ///
    /// Reset and unwatch stop informers before clearing the tracker, so a
    /// waiter whose informer was stopped cannot mark a newer one's key.
    pub fn mark_synced_unless(&self, key: &Key, stale: impl FnOnce() -> bool) -> bool {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if stale() {
            return false;
        }
        status.insert(
            key.to_string(),
            SyncEntry {
                api_version: key.api_version.clone(),
                kind: key.kind.clone(),
                synced: true,
            },
        );
        true
    }

    pub fn has_synced(&self, key: &Key) -> bool {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.to_string())
            .is_none_or(|entry| entry.synced)
    }

    pub fn has_seen(&self, key: &Key) -> bool {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key.to_string())
    }

    /// Drop every entry tracked for a kind, in any namespace.
    pub fn delete_kind(&self, api_version: &str, kind: &str) {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, entry| entry.api_version != api_version || entry.kind != kind);
    }

    pub fn reset(&self) {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Remembers which kinds have been noticed in each scope.
#[derive(Debug, Default)]
pub struct SeenKindsCache {
    seen: RwLock<HashMap<String, HashMap<GroupVersionKind, bool>>>,
}

impl SeenKindsCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_seen(&self, scope: &str, gvk: &GroupVersionKind, seen: bool) {
        self.seen
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope.to_string())
            .or_default()
            .insert(gvk.clone(), seen);
    }

    pub fn has_seen(&self, scope: &str, gvk: &GroupVersionKind) -> bool {
        self.seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .and_then(|kinds| kinds.get(gvk))
            .copied()
            .unwrap_or(false)
    }

    /// Forget a kind in every scope.
    pub fn delete_kind(&self, gvk: &GroupVersionKind) {
        let mut seen = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        for kinds in seen.values_mut() {
            kinds.remove(gvk);
        }
        seen.retain(|_, kinds| !kinds.is_empty());
    }

    pub fn reset(&self) {
        self.seen
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
