//! Incoming request recorder.
//!
//! A [`Request`] is the handler's view of the inbound request. When request
//! body capture is on, the body is read eagerly at construction and the
//! request is handed a fresh body over the captured bytes, so the handler
//! reads exactly what the client sent and the log sees the same bytes.
//!
//! If that eager read fails, the failure is not raised at construction. The
//! replacement body yields the same [`BodyError`] on every read instead, so
//! only handlers that actually touch the body notice.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, USER_AGENT};
use http::{HeaderMap, Method, Uri};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::error::BoxError;

// ── BodyError ─────────────────────────────────────────────────────────────────

/// A failure while reading a request body.
///
/// Cloning shares the original failure, which is how a failed capture can be
/// replayed to the handler on every read.
#[derive(Clone)]
pub struct BodyError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl BodyError {
    pub fn new(e: impl Into<BoxError>) -> Self {
        Self(Arc::from(e.into()))
    }
}

impl fmt::Debug for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BodyError").field(&self.0).finish()
    }
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for BodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.0)
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// A type-erased request body.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Failed(BodyError),
    Stream(UnsyncBoxBody<Bytes, BodyError>),
}

impl Body {
    /// Wraps any `http_body::Body` yielding [`Bytes`], e.g. `hyper::body::Incoming`.
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { kind: Kind::Stream(body.map_err(BodyError::new).boxed_unsync()) }
    }

    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// A body whose every read fails with `err`.
    pub(crate) fn failed(err: BodyError) -> Self {
        Self { kind: Kind::Failed(err) }
    }
}

impl Default for Body {
    fn default() -> Self { Self::empty() }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self { kind: Kind::Full(Some(data)) }
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self { Bytes::from(data).into() }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self { Bytes::from_static(data.as_bytes()).into() }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BodyError>>> {
        match &mut self.get_mut().kind {
            Kind::Empty        => Poll::Ready(None),
            Kind::Full(data)   => Poll::Ready(data.take().map(|d| Ok(Frame::data(d)))),
            Kind::Failed(err)  => Poll::Ready(Some(Err(err.clone()))),
            Kind::Stream(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Empty        => true,
            Kind::Full(data)   => data.is_none(),
            Kind::Failed(_)    => false,
            Kind::Stream(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty        => SizeHint::with_exact(0),
            Kind::Full(data)   => SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64)),
            Kind::Failed(_)    => SizeHint::default(),
            Kind::Stream(body) => body.size_hint(),
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// An incoming HTTP request, as seen by a handler.
pub struct Request {
    pub(crate) head: http::request::Parts,
    pub(crate) body: Body,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) content_length: i64,
    pub(crate) captured: Option<Bytes>,
}

impl Request {
    /// Wraps `req`, reading its body eagerly when `capture_body` is set.
    pub(crate) async fn record(
        req: http::Request<Body>,
        remote_addr: Option<SocketAddr>,
        params: HashMap<String, String>,
        capture_body: bool,
    ) -> Self {
        let (head, body) = req.into_parts();
        let content_length = declared_length(&head.headers, &body);

        let (body, captured) = if capture_body {
            match body.collect().await {
                Ok(collected) => {
                    let data = collected.to_bytes();
                    (Body::from(data.clone()), Some(data))
                }
                Err(e) => (Body::failed(e), None),
            }
        } else {
            (body, None)
        };

        Self { head, body, remote_addr, params, content_length, captured }
    }

    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Declared body length: the `content-length` header, else the body's
    /// exact size when known, else `-1`.
    pub fn content_length(&self) -> i64 { self.content_length }

    /// Case-insensitive header lookup. Non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.head.headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The bytes captured at construction, when request body capture is on
    /// and the read succeeded.
    pub fn captured_body(&self) -> Option<&Bytes> {
        self.captured.as_ref()
    }

    pub fn body_mut(&mut self) -> &mut Body { &mut self.body }

    /// Reads the rest of the body into memory.
    ///
    /// Errors are sticky: once a read fails, every later call fails the same way.
    pub async fn bytes(&mut self) -> Result<Bytes, BodyError> {
        let body = std::mem::take(&mut self.body);
        match body.collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) => {
                self.body = Body::failed(e.clone());
                Err(e)
            }
        }
    }
}

fn declared_length(headers: &HeaderMap, body: &Body) -> i64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .or_else(|| body.size_hint().exact().and_then(|n| i64::try_from(n).ok()))
        .unwrap_or(-1)
}
