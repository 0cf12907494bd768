/**
 * Configuration constants for the object store
 */
use std::time::Duration;

/// How long the CLI waits for informers to finish their initial list
pub const DEFAULT_SYNC_TIMEOUT_SECONDS: u64 = 30;

/// Verbs checked before each store operation
pub const VERB_LIST: &str = "list";
pub const VERB_GET: &str = "get";
pub const VERB_DELETE: &str = "delete";
pub const VERB_UPDATE: &str = "update";
pub const VERB_WATCH: &str = "watch";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Restrict every informer to one namespace. `None` watches all namespaces.
    pub namespace: Option<String>,
    pub sync_timeout: Duration,
    /// Log informer status on SIGUSR2
    pub diagnostics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECONDS),
            diagnostics: true,
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(
        DEFAULT_SYNC_TIMEOUT_SECONDS > 0,
        "DEFAULT_SYNC_TIMEOUT_SECONDS must be greater than 0"
    );
};
