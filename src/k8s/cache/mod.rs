pub mod access;
pub mod config;
#[cfg(unix)]
pub mod diagnostics;
pub mod factory;
pub mod informer;
pub mod lifecycle;
pub mod object_store;
pub mod resource;
pub mod subscription;
pub mod tracking;

pub use access::{AccessCache, AccessKey, ResourceAccess};
pub use config::CacheConfig;
pub use factory::InformerFactory;
pub use informer::{Informer, InformerState};
pub use lifecycle::LifecycleRegistry;
pub use object_store::ObjectStore;
pub use resource::{ResourceType, api_version_of, gvk_from_api_version};
pub use subscription::{HandlerSet, ObjectEvent, ResourceEventHandler, WatchId, handler_fn};
pub use tracking::{SeenKindsCache, SyncTracker};
