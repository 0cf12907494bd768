use super::{Alerter, Payload};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Handles one kind of action request
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn action_name(&self) -> &str;

    async fn handle(&self, alerter: &dyn Alerter, payload: &Payload) -> Result<()>;
}

/// Routes action requests to dispatchers by path.
#[derive(Default)]
pub struct ActionManager {
    dispatchers: RwLock<HashMap<String, Arc<dyn Dispatcher>>>,
}

impl ActionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the dispatcher's own action name.
    pub fn register(&self, dispatcher: Arc<dyn Dispatcher>) {
        let path = dispatcher.action_name().to_string();
        self.register_path(&path, dispatcher);
    }

    /// Register under `path`, replacing any earlier registration.
    pub fn register_path(&self, path: &str, dispatcher: Arc<dyn Dispatcher>) {
        debug!("registering action {path}");
        self.dispatchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), dispatcher);
    }

    /// # Errors
    ///
    /// Returns `Error::ActionNotFound` if nothing is registered for `path`,
    /// otherwise whatever the dispatcher returns
    pub async fn dispatch(&self, alerter: &dyn Alerter, path: &str, payload: &Payload) -> Result<()> {
        let dispatcher = self
            .dispatchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ActionNotFound {
                path: path.to_string(),
            })?;

        dispatcher.handle(alerter, payload).await
    }
}
