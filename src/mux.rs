//! Request dispatch with access logging.
//!
//! [`Mux`] sits between the server and the handlers. Per request it:
//!
//! 1. looks the route up in the [`Router`],
//! 2. records the request, capturing the body if configured,
//! 3. wraps a fresh [`BufferedWriter`] in a [`ResponseRecorder`],
//! 4. runs the handler against both recorders,
//! 5. sends the error's status if the handler failed without sending one,
//! 6. renders the access line and hands it to the logger,
//! 7. turns the buffered response into an `http::Response`.
//!
//! Unmatched routes get `404 Not Found` and are logged like any other request.
//! A handler that panics is answered with `500` and logged at `Error`.
//!
//! [`Mux::wrap`] runs steps 2 to 7 for a single handler, for callers that
//! already have their own router or service stack.
//!
//! The template and the logger can be swapped while requests are in flight.
//! Each request loads them once, so it sees either the old or the new value.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::Bytes;
use futures_util::FutureExt;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Body as HttpBody;
use hyper::service::Service;

use crate::config::Config;
use crate::error::{BoxError, HandlerError};
use crate::format::{Snapshot, Template};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, Outcome};
use crate::log::{self, Logger};
use crate::request::{Body, Request};
use crate::response::{BufferedWriter, ResponseRecorder, ResponseWriter};
use crate::router::Router;

/// A router whose every request ends in one access-log call.
///
/// ```rust,no_run
/// use http::{Method, StatusCode};
/// use reclog::{Config, HandlerError, Mux, Request, ResponseRecorder, ResponseWriter, Router, Server, TracingLogger};
///
/// async fn health(_req: &mut Request, res: &mut ResponseRecorder) -> Result<(), HandlerError> {
///     res.write_status(StatusCode::NO_CONTENT);
///     Ok(())
/// }
///
/// # async fn run() -> Result<(), reclog::Error> {
/// let router = Router::new().on(Method::GET, "/health", health);
/// let mux = Mux::new(router, Config::default()).with_logger(TracingLogger);
/// Server::bind("0.0.0.0:3000")?.serve(mux).await
/// # }
/// ```
pub struct Mux {
    router: Router,
    template: ArcSwap<Template>,
    logger: ArcSwapOption<Box<dyn Logger>>,
    capture_request_body: bool,
    capture_response_body: bool,
}

impl Mux {
    /// A mux without a logger: handlers run, nothing is logged.
    pub fn new(router: Router, config: Config) -> Self {
        Self {
            router,
            template: ArcSwap::from_pointee(Template::parse(config.template)),
            logger: ArcSwapOption::empty(),
            capture_request_body: config.capture_request_body,
            capture_response_body: config.capture_response_body,
        }
    }

    pub fn with_logger(self, logger: impl Logger + 'static) -> Self {
        self.set_logger(logger);
        self
    }

    /// Replaces the logger for requests that have not reached logging yet.
    pub fn set_logger(&self, logger: impl Logger + 'static) {
        let logger: Box<dyn Logger> = Box::new(logger);
        self.logger.store(Some(Arc::new(logger)));
    }

    /// Turns logging off.
    pub fn clear_logger(&self) {
        self.logger.store(None);
    }

    /// Replaces the access-line template. An empty template turns logging off.
    pub fn set_template(&self, template: impl Into<String>) {
        self.template.store(Arc::new(Template::parse(template)));
    }

    pub fn template(&self) -> Arc<Template> {
        self.template.load_full()
    }

    /// The router requests are dispatched through.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Runs a single handler through this mux's logging pipeline, bypassing
    /// the router. The result can be mounted on any hyper-based stack.
    ///
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use reclog::{Config, Mux, Request, ResponseRecorder, ResponseWriter, Router};
    ///
    /// async fn ping(_req: &mut Request, res: &mut ResponseRecorder) -> std::io::Result<()> {
    ///     res.write(b"pong").map(drop)
    /// }
    ///
    /// let mux = Arc::new(Mux::new(Router::new(), Config::default()));
    /// let ping = mux.wrap(ping);
    /// # let _ = ping;
    /// ```
    pub fn wrap(self: &Arc<Self>, handler: impl Handler) -> Wrapped {
        Wrapped {
            mux: Arc::clone(self),
            handler: handler.into_boxed_handler(),
            remote_addr: None,
        }
    }

    /// Dispatches one request and returns the response to send.
    ///
    /// `remote_addr` is the peer as seen by the server; `%raddr%` prints it.
    pub async fn call<B>(
        &self,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<Full<Bytes>>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match self.router.lookup(req.method(), req.uri().path()) {
            Some((handler, params)) => self.dispatch(Some(&handler), params, req, remote_addr).await,
            None => self.dispatch(None, HashMap::new(), req, remote_addr).await,
        }
    }

    /// Records, runs `handler` (or answers 404 without one), then logs.
    async fn dispatch<B>(
        &self,
        handler: Option<&BoxedHandler>,
        params: HashMap<String, String>,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<Full<Bytes>>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let started = Instant::now();

        let mut req = Request::record(req.map(Body::new), remote_addr, params, self.capture_request_body).await;
        let mut res = ResponseRecorder::new(BufferedWriter::new(), self.capture_response_body);

        let outcome = match handler {
            Some(handler) => run(handler, &mut req, &mut res).await,
            None => {
                res.write_status(StatusCode::NOT_FOUND);
                Ok(())
            }
        };

        self.finish(&req, &mut res, &outcome, started.elapsed());
        res.into_inner().into_response()
    }

    fn finish(
        &self,
        req: &Request,
        res: &mut ResponseRecorder,
        outcome: &Outcome,
        elapsed: Duration,
    ) {
        // Before rendering, so the line shows the status the client gets.
        log::settle(outcome, res);

        let Some(logger) = self.logger.load_full() else {
            return;
        };
        let template = self.template.load();
        if template.is_empty() {
            return;
        }

        let message = template.render(&Snapshot::new(req, res, elapsed));
        log::deliver(&**logger, &message, outcome, res);
    }
}

/// Runs the handler, turning a panic into a 500 so the request is still logged.
async fn run(handler: &BoxedHandler, req: &mut Request, res: &mut ResponseRecorder) -> Outcome {
    match AssertUnwindSafe(ErasedHandler::call(&**handler, req, res)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(HandlerError::new(format!("handler panicked: {reason}")))
        }
    }
}

// ── Wrapped ───────────────────────────────────────────────────────────────────

/// One handler bound to a [`Mux`], created by [`Mux::wrap`].
///
/// Call it directly, or use it as a `hyper` service: each connection should
/// get its own clone tagged with [`for_peer`](Wrapped::for_peer) so `%raddr%`
/// has a value.
#[derive(Clone)]
pub struct Wrapped {
    mux: Arc<Mux>,
    handler: BoxedHandler,
    remote_addr: Option<SocketAddr>,
}

impl Wrapped {
    /// The peer address reported for requests served through [`Service`].
    pub fn for_peer(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Runs the handler on `req`, logging the exchange through the mux.
    pub async fn call<B>(
        &self,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<Full<Bytes>>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        self.mux.dispatch(Some(&self.handler), HashMap::new(), req, remote_addr).await
    }
}

impl<B> Service<http::Request<B>> for Wrapped
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(Wrapped::call(&this, req, this.remote_addr).await) })
    }
}
