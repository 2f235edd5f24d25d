//! # reclog
//!
//! Uniform access logging for hyper services, without touching handlers.
//!
//! Every request goes through two recorders. The [`Request`] keeps a
//! replayable copy of the body when asked to; the [`ResponseRecorder`]
//! forwards writes to the real response and remembers the first status, the
//! byte count and the first chunk of the body. When the handler returns, a
//! [`Template`] turns that record into one line and the line goes to your
//! [`Logger`], at a severity picked from the handler's error or, failing
//! that, from the status code.
//!
//! What reclog does not do: ship, store or aggregate logs, trace across
//! services, or validate templates beyond token replacement.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::{Method, StatusCode};
//! use reclog::{Config, HandlerError, Mux, Request, ResponseRecorder, ResponseWriter, Router, Server, TracingLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reclog::Error> {
//!     tracing_subscriber::fmt::init();
//!
//!     let router = Router::new()
//!         .on(Method::GET, "/users/{id}", get_user)
//!         .on(Method::GET, "/health",     health);
//!
//!     let mux = Mux::new(router, Config::default()).with_logger(TracingLogger);
//!     Server::bind("0.0.0.0:3000")?.serve(mux).await
//! }
//!
//! async fn get_user(req: &mut Request, res: &mut ResponseRecorder) -> Result<(), HandlerError> {
//!     let id = req.param("id").unwrap_or_default().to_owned();
//!     if id.is_empty() {
//!         return Err(HandlerError::info("missing id"));
//!     }
//!     res.write(format!(r#"{{"id":"{id}"}}"#).as_bytes())?;
//!     Ok(())
//! }
//!
//! async fn health(_req: &mut Request, res: &mut ResponseRecorder) {
//!     res.write_status(StatusCode::NO_CONTENT);
//! }
//! ```
//!
//! With the default template each request logs a line like
//!
//! ```text
//! 10.0.0.7:51234 > |GET| /users/42 0 < 200(OK) 11; "curl/8.5.0"
//! ```

mod config;
mod error;
mod handler;
mod mux;
mod request;
mod response;
mod router;
mod server;

pub mod format;
pub mod log;

pub use config::Config;
pub use error::{BoxError, Error, HandlerError};
pub use format::{DEFAULT_TEMPLATE, Template, Token};
pub use handler::{Handler, HandlerFn, IntoOutcome, Outcome};
pub use log::{Logger, Severity, TracingLogger};
pub use mux::{Mux, Wrapped};
pub use request::{Body, BodyError, Request};
pub use response::{BufferedWriter, ResponseRecorder, ResponseWriter};
pub use router::Router;
pub use server::Server;
