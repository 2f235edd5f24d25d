//! Response sinks and the recording wrapper handlers write through.
//!
//! Handlers never touch the real sink. They get a [`ResponseRecorder`], which
//! implements the same [`ResponseWriter`] surface, forwards everything, and
//! remembers what was sent: the first status, the byte count, and optionally
//! the first write's payload.
//!
//! # Finalize-once
//!
//! The first `write_status` or `write` finalizes the response. After that the
//! recorded status never changes and late `write_status` calls are dropped
//! without reaching the sink. Body writes keep flowing so streamed responses
//! still work.

use std::io;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The write surface of an HTTP response: headers, status, body bytes.
///
/// A sink that receives body bytes before any status must behave as if
/// `200 OK` had been sent.
pub trait ResponseWriter: Send {
    fn headers(&self) -> &HeaderMap;
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn write_status(&mut self, status: StatusCode);
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

// ── BufferedWriter ────────────────────────────────────────────────────────────

/// The real sink used by the dispatcher: buffers the whole response in memory
/// and becomes an `http::Response` once the handler is done.
#[derive(Debug, Default)]
pub struct BufferedWriter {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: BytesMut,
}

impl BufferedWriter {
    pub fn new() -> Self { Self::default() }

    pub fn status(&self) -> Option<StatusCode> { self.status }

    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseWriter for BufferedWriter {
    fn headers(&self) -> &HeaderMap { &self.headers }
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    fn write_status(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }
}

// ── ResponseRecorder ──────────────────────────────────────────────────────────

/// Records what a handler sends while forwarding it to the real sink `W`.
pub struct ResponseRecorder<W = BufferedWriter> {
    inner: W,
    status: Option<StatusCode>,
    bytes_written: u64,
    body: Option<Bytes>,
    capture_body: bool,
}

impl<W: ResponseWriter> ResponseRecorder<W> {
    pub fn new(inner: W, capture_body: bool) -> Self {
        Self {
            inner,
            status: None,
            bytes_written: 0,
            body: None,
            capture_body,
        }
    }

    /// The first status sent, implicit `200` included. `None` until finalized.
    pub fn status(&self) -> Option<StatusCode> { self.status }

    /// Status for display: what was sent, or `200` if nothing was.
    pub fn effective_status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn is_finalized(&self) -> bool { self.status.is_some() }

    /// Total bytes accepted by the sink.
    pub fn bytes_written(&self) -> u64 { self.bytes_written }

    /// Payload of the first write, when response body capture is on.
    pub fn captured_body(&self) -> Option<&Bytes> { self.body.as_ref() }

    /// Gives back the real sink once the handler is done.
    pub fn into_inner(self) -> W { self.inner }
}

impl<W: ResponseWriter> ResponseWriter for ResponseRecorder<W> {
    fn headers(&self) -> &HeaderMap { self.inner.headers() }
    fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }

    fn write_status(&mut self, status: StatusCode) {
        if self.is_finalized() {
            return;
        }
        self.status = Some(status);
        self.inner.write_status(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;

        if !self.is_finalized() {
            if self.capture_body {
                self.body = Some(Bytes::copy_from_slice(&buf[..n]));
            }
            self.status = Some(StatusCode::OK);
        }
        Ok(n)
    }
}

/// Lets handlers use `write!` and friends.
impl<W: ResponseWriter> io::Write for ResponseRecorder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWriter::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}
