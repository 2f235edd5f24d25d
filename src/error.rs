//! Error types.
//!
//! Two families live here. [`Error`] is what reclog's own fallible operations
//! return: binding a port, accepting a connection. [`HandlerError`] is what a
//! handler returns when it wants the failure logged with its own severity,
//! reason and structured context.

use std::net::SocketAddr;

use http::StatusCode;

use crate::log::{Fields, Severity};
use crate::request::BodyError;

/// A boxed error usable across threads.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by reclog's infrastructure operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid socket address `{0}`")]
    InvalidAddr(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure reported by a handler.
///
/// Carries everything the access log needs to classify it: a severity, a
/// human-readable reason, the status to send when the handler has not sent
/// one yet, and ordered key/value context.
///
/// ```rust
/// use http::StatusCode;
/// use reclog::{HandlerError, Severity};
///
/// let err = HandlerError::new("db unavailable")
///     .with_status(StatusCode::SERVICE_UNAVAILABLE)
///     .with_field("table", "users");
///
/// assert_eq!(err.severity(), Severity::Error);
/// assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct HandlerError {
    severity: Severity,
    reason: String,
    status: StatusCode,
    fields: Fields,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    /// An error-level failure that suggests `500 Internal Server Error`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self::with_severity(Severity::Error, reason)
    }

    /// A warn-level failure that suggests `500 Internal Server Error`.
    pub fn warn(reason: impl Into<String>) -> Self {
        Self::with_severity(Severity::Warn, reason)
    }

    /// An info-level failure, typically a client mistake. Suggests `400 Bad Request`.
    pub fn info(reason: impl Into<String>) -> Self {
        Self::with_severity(Severity::Info, reason).with_status(StatusCode::BAD_REQUEST)
    }

    pub fn with_severity(severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            severity,
            reason: reason.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            fields: Vec::new(),
            source: None,
        }
    }

    /// Status sent to the client if the handler has not committed one.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Appends a context field. Order is preserved in the log call.
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn severity(&self) -> Severity { self.severity }
    pub fn reason(&self) -> &str { &self.reason }
    pub fn status(&self) -> StatusCode { self.status }
    pub fn fields(&self) -> &Fields { &self.fields }
}

/// A broken request body is the client's (or the proxy's) problem.
impl From<BodyError> for HandlerError {
    fn from(e: BodyError) -> Self {
        Self::warn(format!("request body: {e}"))
            .with_status(StatusCode::BAD_REQUEST)
            .with_source(e)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self::new(format!("io: {e}")).with_source(e)
    }
}
