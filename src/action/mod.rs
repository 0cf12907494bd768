mod alert;
pub mod delete;
mod manager;
mod payload;

pub use alert::{Alert, AlertType, Alerter, DEFAULT_ALERT_EXPIRATION, alert_for_error};
pub use delete::ObjectDeleter;
pub use manager::{ActionManager, Dispatcher};
pub use payload::Payload;
