use crate::k8s::cache::AccessKey;
use derive_more::From;
use k8s_openapi::serde_json;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    KubeConfig(kube::config::KubeconfigError),

    #[from]
    HttpHeader(hyper::http::Error),

    #[from]
    Io(std::io::Error),

    /// The kind is unknown to the API server. Not retryable.
    Mapping { key: String, message: String },

    /// The permission query failed. Safe to retry.
    Fetch {
        key: AccessKey,
        source: Box<Error>,
    },

    /// The current identity may not perform the verb on the resource.
    #[from]
    AccessDenied(AccessKey),

    /// The write was rejected because the object changed underneath it.
    Conflict { key: String, message: String },

    NotFound { key: String },

    /// An error with the key and operation it happened in.
    Context {
        context: String,
        source: Box<Error>,
    },

    ActionNotFound { path: String },

    LockPoisoned(String),

    /// Custom error message
    Custom(String),
}

/// Helper for mutex/rwlock poisoning. A poisoned lock means a thread panicked
/// while holding it.
#[must_use]
pub fn lock_poisoned_error(message: &str) -> Error {
    Error::LockPoisoned(message.to_string())
}

/// Coarse classification of an [`Error`], stable through context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Mapping,
    Fetch,
    AccessDenied,
    Conflict,
    NotFound,
    /// The API server could not be reached.
    Transport,
    Other,
}

impl Error {
    /// Wrap with the operation and key it failed for, keeping the kind.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error below any context wrapping.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Mapping { .. } => ErrorKind::Mapping,
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io(_)
            | Self::Kube(kube::Error::HyperError(_) | kube::Error::Service(_)) => {
                ErrorKind::Transport
            }
            _ => ErrorKind::Other,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Fetch | ErrorKind::Conflict | ErrorKind::Transport
        )
    }

    /// The denied access key, if this is an access denial.
    #[must_use]
    pub fn access_denied(&self) -> Option<&AccessKey> {
        match self.root() {
            Self::AccessDenied(key) => Some(key),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Json(e) => write!(fmt, "json: {e}"),
            Self::Kube(e) => write!(fmt, "kube: {e}"),
            Self::Infer(e) => write!(fmt, "infer config: {e}"),
            Self::KubeConfig(e) => write!(fmt, "kubeconfig: {e}"),
            Self::HttpHeader(e) => write!(fmt, "http header: {e}"),
            Self::Io(e) => write!(fmt, "io: {e}"),
            Self::Mapping { key, message } => {
                write!(fmt, "unable to map {key} to a resource: {message}")
            }
            Self::Fetch { key, source } => write!(fmt, "fetch access {key}: {source}"),
            Self::AccessDenied(key) => write!(
                fmt,
                "access denied: no {} access in {} to {}/{}",
                key.verb, key.namespace, key.group, key.resource
            ),
            Self::Conflict { key, message } => write!(fmt, "conflict updating {key}: {message}"),
            Self::NotFound { key } => write!(fmt, "{key} not found"),
            Self::Context { context, source } => write!(fmt, "{context}: {source}"),
            Self::ActionNotFound { path } => write!(fmt, "action path {path:?} not found"),
            Self::LockPoisoned(message) => write!(
                fmt,
                "{message} - this indicates a prior panic, application may be in an inconsistent state"
            ),
            Self::Custom(message) => write!(fmt, "{message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Kube(e) => Some(e),
            Self::Infer(e) => Some(e),
            Self::KubeConfig(e) => Some(e),
            Self::HttpHeader(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Fetch { source, .. } | Self::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
