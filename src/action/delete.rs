use super::{
    Alert, AlertType, Alerter, DEFAULT_ALERT_EXPIRATION, Dispatcher, Payload, alert_for_error,
};
use crate::error::Result;
use crate::store::{Key, Store};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const ACTION_DELETE_OBJECT: &str = "action.kubecache/deleteObject";

/// Deletes the object named by the payload and reports the outcome as an alert.
pub struct ObjectDeleter {
    store: Arc<dyn Store>,
}

impl ObjectDeleter {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Dispatcher for ObjectDeleter {
    fn action_name(&self) -> &str {
        ACTION_DELETE_OBJECT
    }

    /// Failures to delete are reported through `alerter`, not returned.
    async fn handle(&self, alerter: &dyn Alerter, payload: &Payload) -> Result<()> {
        debug!("deleting object: {payload:?}");
        let key = Key::from_payload(payload)?;
        let name = key.name.as_deref().unwrap_or_default();

        let alert = match self.store.delete(&key).await {
            Ok(()) => Alert::new(
                AlertType::Info,
                format!("Deleted {} {name:?}", key.kind),
                DEFAULT_ALERT_EXPIRATION,
            ),
            Err(e) => Alert {
                message: format!("Unable to delete {} {name:?}: {e}", key.kind),
                ..alert_for_error(&e)
            },
        };
        alerter.send_alert(alert);

        Ok(())
    }
}
