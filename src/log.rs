//! Severity classification and delivery to the access logger.
//!
//! Every request ends in exactly one [`Logger::log`] call. The severity comes
//! from the handler's error when there is one, otherwise from the status
//! that was sent:
//!
//! | Outcome | Severity |
//! |---|---|
//! | handler error | the error's own [`Severity`] |
//! | 5xx | `Warn` |
//! | 4xx | `Info` |
//! | anything else | `Debug` |
//!
//! Delivery is synchronous. A slow logger stalls the request it is logging,
//! so loggers that do I/O should hand off to their own buffer or task.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use http::StatusCode;

use crate::error::HandlerError;
use crate::handler::Outcome;
use crate::response::{ResponseRecorder, ResponseWriter};

/// Ordered structured context attached to a log call.
pub type Fields = Vec<(String, String)>;

/// Log severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info  => "info",
            Self::Warn  => "warn",
            Self::Error => "error",
        }
    }

    /// Severity of a request that completed without a handler error.
    pub fn for_status(status: StatusCode) -> Self {
        match status.as_u16() {
            500..=599 => Self::Warn,
            400..=499 => Self::Info,
            _         => Self::Debug,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Severity> for tracing::Level {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Info  => tracing::Level::INFO,
            Severity::Warn  => tracing::Level::WARN,
            Severity::Error => tracing::Level::ERROR,
        }
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

/// Receives one call per request: severity, rendered message, structured
/// fields and the handler's error, if any.
///
/// Any `Fn(Severity, &str, &Fields, Option<&HandlerError>)` is a logger; wrap
/// closures with [`from_fn`] so their argument types are inferred.
pub trait Logger: Send + Sync {
    fn log(&self, severity: Severity, message: &str, fields: &Fields, error: Option<&HandlerError>);
}

impl<F> Logger for F
where
    F: Fn(Severity, &str, &Fields, Option<&HandlerError>) + Send + Sync,
{
    fn log(&self, severity: Severity, message: &str, fields: &Fields, error: Option<&HandlerError>) {
        self(severity, message, fields, error)
    }
}

/// Builds a [`Logger`] from a closure.
///
/// ```rust
/// use reclog::log::{from_fn, Severity};
///
/// let logger = from_fn(|severity, message, _fields, _error| {
///     eprintln!("[{severity}] {message}");
/// });
/// # let _ = logger;
/// ```
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(Severity, &str, &Fields, Option<&HandlerError>) + Send + Sync,
{
    f
}

/// Adapter for callers that only care about severity and message.
pub struct MessageLogger<F>(pub F);

impl<F> Logger for MessageLogger<F>
where
    F: Fn(Severity, &str) + Send + Sync,
{
    fn log(&self, severity: Severity, message: &str, _fields: &Fields, _error: Option<&HandlerError>) {
        (self.0)(severity, message)
    }
}

/// Logs nothing. Lines are still rendered, then dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _: Severity, _: &str, _: &Fields, _: Option<&HandlerError>) {}
}

/// Emits each access line as a `tracing` event under target `reclog::access`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

/// `tracing` levels must be known at compile time, so each arm spells its macro.
macro_rules! access_event {
    ($mac:ident, $message:expr, $fields:expr, $error:expr) => {
        tracing::$mac!(
            target: "reclog::access",
            fields = %FieldList($fields),
            error = $error.map(tracing::field::display),
            "{}",
            $message
        )
    };
}

impl Logger for TracingLogger {
    fn log(&self, severity: Severity, message: &str, fields: &Fields, error: Option<&HandlerError>) {
        match severity {
            Severity::Debug => access_event!(debug, message, fields, error),
            Severity::Info  => access_event!(info, message, fields, error),
            Severity::Warn  => access_event!(warn, message, fields, error),
            Severity::Error => access_event!(error, message, fields, error),
        }
    }
}

/// `key=value` pairs separated by spaces.
struct FieldList<'a>(&'a Fields);

impl fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value:?}")?;
        }
        Ok(())
    }
}

// ── Delivery ──────────────────────────────────────────────────────────────────

/// Sends the error's suggested status if the handler never committed one.
///
/// No-op for successful outcomes and for responses already finalized.
pub fn settle<W: ResponseWriter>(outcome: &Outcome, res: &mut ResponseRecorder<W>) {
    if let Err(err) = outcome {
        if !res.is_finalized() {
            res.write_status(err.status());
        }
    }
}

/// Classifies the outcome and hands `message` to `logger`.
///
/// For an error the fields are `reason` followed by the error's own fields.
/// A panicking logger is contained here and reported through `tracing`.
pub fn deliver<W: ResponseWriter>(
    logger: &dyn Logger,
    message: &str,
    outcome: &Outcome,
    res: &mut ResponseRecorder<W>,
) {
    settle(outcome, res);

    let (severity, fields, error) = match outcome {
        Err(err) => {
            let mut fields = Vec::with_capacity(err.fields().len() + 1);
            fields.push(("reason".to_owned(), err.reason().to_owned()));
            fields.extend(err.fields().iter().cloned());
            (err.severity(), fields, Some(err))
        }
        Ok(()) => (Severity::for_status(res.effective_status()), Vec::new(), None),
    };

    let call = panic::catch_unwind(AssertUnwindSafe(|| {
        logger.log(severity, message, &fields, error)
    }));
    if call.is_err() {
        tracing::error!(%severity, "access logger panicked; log line dropped");
    }
}
