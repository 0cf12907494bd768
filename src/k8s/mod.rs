pub mod cache;
pub mod client;
pub mod cluster;

/// Default user agent for `kubecache` - automatically uses the package version
///
/// Can be overridden via the `KUBECACHE_USER_AGENT` environment variable.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
