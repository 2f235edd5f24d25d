//! Handler trait and type erasure.
//!
//! # Handler shape
//!
//! ```text
//! async fn name(req: &mut Request, res: &mut ResponseRecorder) -> impl IntoOutcome
//! ```
//!
//! Handlers write through the recorder and return either nothing or a
//! `Result<(), E>` where `E: Into<HandlerError>`.
//!
//! # Why a helper trait
//!
//! The future returned by such an `async fn` borrows both arguments, so its
//! type differs for every pair of lifetimes. `Fn(&mut A, &mut B) -> Fut` cannot
//! name that family with one `Fut`. [`HandlerFn`] is generic over the borrow
//! lifetime and boxes the future once; a handler is any `F` with
//! `for<'a> F: HandlerFn<'a>`.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn hello(req, res) -> Result<(), HandlerError> { … }   ← user writes this
//!        ↓ router.on(Method::GET, "/", hello)
//! hello.into_boxed_handler()                                   ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                                   ← stored as BoxedHandler
//!        ↓
//! handler.call(&mut req, &mut res)  at request time            ← one vtable dispatch
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::request::Request;
use crate::response::ResponseRecorder;

// ── Outcome ───────────────────────────────────────────────────────────────────

/// What a handler invocation produced.
pub type Outcome = Result<(), HandlerError>;

/// Conversion of a handler's return value into an [`Outcome`].
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

/// Handlers that cannot fail return nothing.
impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome { Ok(()) }
}

impl<E: Into<HandlerError>> IntoOutcome for Result<(), E> {
    fn into_outcome(self) -> Outcome { self.map_err(Into::into) }
}

// ── Internal types ────────────────────────────────────────────────────────────

/// A boxed future borrowing the request and recorder for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut ResponseRecorder) -> BoxFuture<'a, Outcome>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── HandlerFn ─────────────────────────────────────────────────────────────────

/// A handler callable with arguments borrowed for `'a`.
///
/// Implemented for every `async fn(&mut Request, &mut ResponseRecorder) -> R`
/// with `R: IntoOutcome`. You never implement it yourself.
pub trait HandlerFn<'a>: Send + Sync + 'static {
    fn call(&self, req: &'a mut Request, res: &'a mut ResponseRecorder) -> BoxFuture<'a, Outcome>;
}

impl<'a, F, Fut, R> HandlerFn<'a> for F
where
    F: Fn(&'a mut Request, &'a mut ResponseRecorder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'a,
    R: IntoOutcome + Send + 'a,
{
    fn call(&self, req: &'a mut Request, res: &'a mut ResponseRecorder) -> BoxFuture<'a, Outcome> {
        let fut = self(req, res);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Sealed: only the blanket impl below satisfies it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F> private::Sealed for F where F: for<'a> HandlerFn<'a> + Send + Sync + 'static {}

impl<F> Handler for F
where
    F: for<'a> HandlerFn<'a> + Send + Sync + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F> ErasedHandler for FnHandler<F>
where
    F: for<'a> HandlerFn<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut ResponseRecorder) -> BoxFuture<'a, Outcome> {
        HandlerFn::call(&self.0, req, res)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use http::StatusCode;

    use super::*;
    use crate::request::Body;
    use crate::response::{BufferedWriter, ResponseWriter};

    async fn ok(_req: &mut Request, res: &mut ResponseRecorder) {
        res.write_status(StatusCode::NO_CONTENT);
    }

    async fn fails(_req: &mut Request, _res: &mut ResponseRecorder) -> Result<(), HandlerError> {
        Err(HandlerError::warn("nope"))
    }

    async fn io_fails(_req: &mut Request, _res: &mut ResponseRecorder) -> Result<(), std::io::Error> {
        Err(std::io::Error::other("disk full"))
    }

    async fn run(handler: impl Handler) -> (Outcome, ResponseRecorder) {
        let boxed = handler.into_boxed_handler();
        let req = http::Request::new(Body::empty());
        let mut req = Request::record(req, None, HashMap::new(), false).await;
        let mut res = ResponseRecorder::new(BufferedWriter::new(), false);
        let outcome = boxed.call(&mut req, &mut res).await;
        (outcome, res)
    }

    #[tokio::test]
    async fn unit_handler_succeeds() {
        let (outcome, res) = run(ok).await;
        assert!(outcome.is_ok());
        assert_eq!(res.status(), Some(StatusCode::NO_CONTENT));
    }

    #[tokio::test]
    async fn handler_error_passes_through() {
        let (outcome, _) = run(fails).await;
        assert_eq!(outcome.unwrap_err().reason(), "nope");
    }

    #[tokio::test]
    async fn foreign_errors_convert() {
        let (outcome, _) = run(io_fails).await;
        let err = outcome.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.reason().contains("disk full"));
    }
}
