use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

pub const DEFAULT_ALERT_EXPIRATION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertType {
    Error,
    Warning,
    Info,
}

/// A short message shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<SystemTime>,
}

impl Alert {
    /// A zero `expire_in` creates an alert that never expires.
    #[must_use]
    pub fn new(alert_type: AlertType, message: impl Into<String>, expire_in: Duration) -> Self {
        Self {
            alert_type,
            message: message.into(),
            expiration: (!expire_in.is_zero()).then(|| SystemTime::now() + expire_in),
        }
    }
}

pub trait Alerter: Send + Sync {
    fn send_alert(&self, alert: Alert);
}

/// Alert severity for a failed operation. Access denials are informational.
#[must_use]
pub fn alert_for_error(err: &Error) -> Alert {
    let alert_type = match err.kind() {
        ErrorKind::AccessDenied => AlertType::Info,
        ErrorKind::Conflict | ErrorKind::Fetch | ErrorKind::Transport => AlertType::Warning,
        _ => AlertType::Error,
    };
    Alert::new(alert_type, err.to_string(), DEFAULT_ALERT_EXPIRATION)
}
