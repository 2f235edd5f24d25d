//! Access-line templates.
//!
//! A template is literal text with `%token%` placeholders:
//!
//! ```text
//! %raddr% > |%mtd%| %uri% %reqb% < %rescode%(%resst%) %resb%; "%ua%"
//! ```
//!
//! renders as
//!
//! ```text
//! 10.0.0.7:51234 > |GET| /users/42?full=1 0 < 200(OK) 27; "curl/8.5.0"
//! ```
//!
//! The template is split into literal and token segments once, when it is
//! set. Rendering replays the segments and appends each value as-is. Values
//! are never scanned again, so a header that contains `%rescode%` is printed
//! literally. Unknown `%...%` sequences are plain text.
//!
//! | Token | Value |
//! |---|---|
//! | `%raddr%` | peer address, `ip:port` |
//! | `%mtd%` | request method |
//! | `%uri%` | request target as received, absolute form included |
//! | `%reqb%` | declared request length, `-1` when unknown |
//! | `%reqh%` | request headers without `user-agent` |
//! | `%ua%` | `user-agent` header |
//! | `%rescode%` | response status code |
//! | `%resst%` | status reason phrase |
//! | `%resb%` | response bytes written |
//! | `%resh%` | response headers |
//! | `%dur%` | milliseconds since dispatch started |
//! | `%reqbody%` | captured request body |
//! | `%resbody%` | captured first response write |

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use http::header::USER_AGENT;
use http::{HeaderMap, HeaderName, Method, StatusCode, Uri};

use crate::request::Request;
use crate::response::{ResponseRecorder, ResponseWriter};

/// The template used when none is configured.
pub const DEFAULT_TEMPLATE: &str = r#"%raddr% > |%mtd%| %uri% %reqb% < %rescode%(%resst%) %resb%; "%ua%""#;

// ── Token ─────────────────────────────────────────────────────────────────────

/// A recognised template placeholder.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Token {
    RemoteAddr,
    Method,
    RequestUri,
    RequestBytes,
    RequestHeaders,
    UserAgent,
    ResponseCode,
    ResponseStatus,
    ResponseBytes,
    ResponseHeaders,
    Duration,
    RequestBody,
    ResponseBody,
}

impl Token {
    pub const ALL: [Token; 13] = [
        Token::RemoteAddr,
        Token::Method,
        Token::RequestUri,
        Token::RequestBytes,
        Token::RequestHeaders,
        Token::UserAgent,
        Token::ResponseCode,
        Token::ResponseStatus,
        Token::ResponseBytes,
        Token::ResponseHeaders,
        Token::Duration,
        Token::RequestBody,
        Token::ResponseBody,
    ];

    /// The placeholder as written in a template, e.g. `"%mtd%"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoteAddr      => "%raddr%",
            Self::Method          => "%mtd%",
            Self::RequestUri      => "%uri%",
            Self::RequestBytes    => "%reqb%",
            Self::RequestHeaders  => "%reqh%",
            Self::UserAgent       => "%ua%",
            Self::ResponseCode    => "%rescode%",
            Self::ResponseStatus  => "%resst%",
            Self::ResponseBytes   => "%resb%",
            Self::ResponseHeaders => "%resh%",
            Self::Duration        => "%dur%",
            Self::RequestBody     => "%reqbody%",
            Self::ResponseBody    => "%resbody%",
        }
    }

    /// Looks up a token by the name between its percent signs.
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| {
            let s = t.as_str();
            &s[1..s.len() - 1] == name
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Template ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A parsed access-line template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let segments = split(&source);
        Self { source, segments }
    }

    pub fn as_str(&self) -> &str { &self.source }
    pub fn is_empty(&self) -> bool { self.source.is_empty() }

    /// Tokens in the order they appear.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Token(t) => Some(*t),
            Segment::Literal(_) => None,
        })
    }

    /// Renders one access line.
    pub fn render(&self, snap: &Snapshot<'_>) -> String {
        let mut out = String::with_capacity(self.source.len() + 64);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(token) => snap.push_value(*token, &mut out),
            }
        }
        out
    }
}

impl Default for Template {
    fn default() -> Self { Self::parse(DEFAULT_TEMPLATE) }
}

impl FromStr for Template {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Splits `source` into literal runs and recognised tokens, left to right.
///
/// On an unknown `%name%` only the opening `%` and the name become literal;
/// the closing `%` may still open the next token, as in `%x%mtd%`.
fn split(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = source;

    while let Some(start) = rest.find('%') {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let token = after
            .find('%')
            .and_then(|end| Token::from_name(&after[..end]).map(|t| (t, end)));

        match token {
            Some((token, end)) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Token(token));
                rest = &after[end + 1..];
            }
            None => {
                literal.push('%');
                rest = after;
            }
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Everything a template can reference about one finished request.
#[derive(Clone, Copy, Debug)]
pub struct Snapshot<'a> {
    pub remote_addr: Option<SocketAddr>,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub request_headers: &'a HeaderMap,
    pub content_length: i64,
    pub request_body: Option<&'a Bytes>,
    /// Status sent, or `200` when the handler sent nothing.
    pub status: StatusCode,
    pub response_bytes: u64,
    pub response_headers: &'a HeaderMap,
    pub response_body: Option<&'a Bytes>,
    pub elapsed: Duration,
}

impl<'a> Snapshot<'a> {
    pub fn new<W: ResponseWriter>(
        req: &'a Request,
        res: &'a ResponseRecorder<W>,
        elapsed: Duration,
    ) -> Self {
        Self {
            remote_addr: req.remote_addr(),
            method: req.method(),
            uri: req.uri(),
            request_headers: req.headers(),
            content_length: req.content_length(),
            request_body: req.captured_body(),
            status: res.effective_status(),
            response_bytes: res.bytes_written(),
            response_headers: res.headers(),
            response_body: res.captured_body(),
            elapsed,
        }
    }

    fn push_value(&self, token: Token, out: &mut String) {
        match token {
            Token::RemoteAddr => {
                if let Some(addr) = self.remote_addr {
                    out.push_str(&addr.to_string());
                }
            }
            Token::Method         => out.push_str(self.method.as_str()),
            Token::RequestUri     => out.push_str(&self.uri.to_string()),
            Token::RequestBytes   => out.push_str(&self.content_length.to_string()),
            Token::RequestHeaders => push_headers(self.request_headers, Some(&USER_AGENT), out),
            Token::UserAgent => {
                if let Some(ua) = self.request_headers.get(USER_AGENT) {
                    out.push_str(&String::from_utf8_lossy(ua.as_bytes()));
                }
            }
            Token::ResponseCode    => out.push_str(self.status.as_str()),
            Token::ResponseStatus  => out.push_str(self.status.canonical_reason().unwrap_or("")),
            Token::ResponseBytes   => out.push_str(&self.response_bytes.to_string()),
            Token::ResponseHeaders => push_headers(self.response_headers, None, out),
            Token::Duration        => out.push_str(&self.elapsed.as_millis().to_string()),
            Token::RequestBody     => push_body(self.request_body, out),
            Token::ResponseBody    => push_body(self.response_body, out),
        }
    }
}

/// `{name: value; name: v1, v2}`, sorted by name.
fn push_headers(headers: &HeaderMap, skip: Option<&HeaderName>, out: &mut String) {
    let mut sorted: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        if skip == Some(name) {
            continue;
        }
        sorted
            .entry(name.as_str())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    out.push('{');
    for (i, (name, values)) in sorted.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(&values.join(", "));
    }
    out.push('}');
}

fn push_body(body: Option<&Bytes>, out: &mut String) {
    if let Some(body) = body {
        out.push_str(&String::from_utf8_lossy(body));
    }
}
