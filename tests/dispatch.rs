//! End-to-end dispatch through `Mux::call`: handler, recorders, template and
//! logger together, without a network.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Frame;
use reclog::log::{Fields, from_fn};
use reclog::{
    Config, HandlerError, Logger, Mux, Request, ResponseRecorder, ResponseWriter, Router, Severity,
};

#[derive(Debug)]
struct Line {
    severity: Severity,
    message: String,
    fields: Fields,
    error: Option<String>,
}

fn recording() -> (Arc<Mutex<Vec<Line>>>, impl Logger) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let logger = from_fn(move |severity, message, fields, error| {
        sink.lock().unwrap().push(Line {
            severity,
            message: message.to_owned(),
            fields: fields.clone(),
            error: error.map(|e| e.to_string()),
        });
    });
    (lines, logger)
}

fn request(method: Method, uri: &str, body: &'static str) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", "curl/8.5.0")
        .header("x-note", "%rescode%")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

async fn body_of(res: http::Response<Full<Bytes>>) -> Bytes {
    res.into_body().collect().await.unwrap().to_bytes()
}

/// A request body whose connection dies before the first byte.
struct Reset;

impl hyper::body::Body for Reset {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))))
    }
}

// ── handlers ──────────────────────────────────────────────────────────────────

async fn no_content(_req: &mut Request, res: &mut ResponseRecorder) {
    res.write_status(StatusCode::NO_CONTENT);
}

async fn db_down(_req: &mut Request, _res: &mut ResponseRecorder) -> Result<(), HandlerError> {
    Err(HandlerError::new("db unavailable").with_field("table", "users"))
}

async fn sent_then_failed(_req: &mut Request, res: &mut ResponseRecorder) -> Result<(), HandlerError> {
    res.write(b"partial")?;
    Err(HandlerError::new("stream broke").with_status(StatusCode::SERVICE_UNAVAILABLE))
}

async fn echo(req: &mut Request, res: &mut ResponseRecorder) -> Result<(), HandlerError> {
    let body = req.bytes().await?;
    res.write(b"echo:")?;
    res.write(&body)?;
    Ok(())
}

async fn user(req: &mut Request, res: &mut ResponseRecorder) -> Result<(), HandlerError> {
    let id = req.param("id").unwrap_or_default().to_owned();
    res.headers_mut().insert("content-type", "application/json".parse().unwrap());
    res.write(format!(r#"{{"id":"{id}"}}"#).as_bytes())?;
    Ok(())
}

async fn unavailable(_req: &mut Request, res: &mut ResponseRecorder) {
    res.write_status(StatusCode::SERVICE_UNAVAILABLE);
}

async fn missing(_req: &mut Request, res: &mut ResponseRecorder) {
    res.write_status(StatusCode::NOT_FOUND);
}

async fn silent(_req: &mut Request, _res: &mut ResponseRecorder) {}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn custom_template_renders_method_uri_and_status() {
    let (lines, logger) = recording();
    let router = Router::new().on(Method::GET, "/health", no_content);
    let mux = Mux::new(router, Config::default().with_template("%mtd% %uri% -> %rescode%"))
        .with_logger(logger);

    let res = mux.call(request(Method::GET, "/health", ""), None).await;

    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].message, "GET /health -> 204");
    assert_eq!(lines[0].severity, Severity::Debug);
}

#[tokio::test]
async fn handler_error_sets_status_and_logs_reason() {
    let (lines, logger) = recording();
    let router = Router::new().on(Method::GET, "/users", db_down);
    let mux = Mux::new(router, Config::default()).with_logger(logger);

    let addr = "192.0.2.1:40000".parse().unwrap();
    let res = mux.call(request(Method::GET, "/users", ""), Some(addr)).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let lines = lines.lock().unwrap();
    let line = &lines[0];
    assert_eq!(line.severity, Severity::Error);
    assert_eq!(
        line.message,
        r#"192.0.2.1:40000 > |GET| /users 0 < 500(Internal Server Error) 0; "curl/8.5.0""#
    );
    assert_eq!(line.fields[0], ("reason".to_owned(), "db unavailable".to_owned()));
    assert_eq!(line.fields[1], ("table".to_owned(), "users".to_owned()));
    assert_eq!(line.error.as_deref(), Some("db unavailable"));
}

#[tokio::test]
async fn committed_status_survives_a_later_error() {
    let (lines, logger) = recording();
    let router = Router::new().on(Method::GET, "/stream", sent_then_failed);
    let mux = Mux::new(router, Config::default().with_template("%rescode% %resb%"))
        .with_logger(logger);

    let res = mux.call(request(Method::GET, "/stream", ""), None).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_of(res).await, Bytes::from_static(b"partial"));
    let lines = lines.lock().unwrap();
    assert_eq!(lines[0].message, "200 7");
    assert_eq!(lines[0].severity, Severity::Error);
}

#[tokio::test]
async fn captured_bodies_match_what_the_handler_saw() {
    let (lines, logger) = recording();
    let router = Router::new().on(Method::POST, "/echo", echo);
    let config = Config::default()
        .with_template("%reqb% [%reqbody%] -> %resb% [%resbody%]")
        .with_request_body(true)
        .with_response_body(true);
    let mux = Mux::new(router, config).with_logger(logger);

    let res = mux.call(request(Method::POST, "/echo", "ping"), None).await;

    assert_eq!(body_of(res).await, Bytes::from_static(b"echo:ping"));
    let lines = lines.lock().unwrap();
    assert_eq!(lines[0].message, "4 [ping] -> 9 [echo:]");
}

#[tokio::test]
async fn bodies_are_not_captured_by_default() {
    let (lines, logger) = recording();
    let router = Router::new().on(Method::POST, "/echo", echo);
    let mux = Mux::new(router, Config::default().with_template("[%reqbody%][%resbody%]"))
        .with_logger(logger);

    let res = mux.call(request(Method::POST, "/echo", "ping"), None).await;

    assert_eq!(body_of(res).await, Bytes::from_static(b"echo:ping"));
    assert_eq!(lines.lock().unwrap()[0].message, "[][]");
}

#[tokio::test]
async fn header_values_are_never_re_expanded() {
    let (lines, logger) = recording();
    let router = Router::new().on(Method::GET, "/users/{id}", user);
    let mux = Mux::new(router, Config::default().with_template("%reqh% | %resh% | %rescode%"))
        .with_logger(logger);

    mux.call(request(Method::GET, "/users/42", ""), None).await;

    let lines = lines.lock().unwrap();
    assert_eq!(
        lines[0].message,
        "{x-note: %rescode%} | {content-type: application/json} | 200"
    );
}

#[tokio::test]
async fn path_params_reach_the_handler() {
    let router = Router::new().on(Method::GET, "/users/{id}", user);
    let mux = Mux::new(router, Config::default());

    let res = mux.call(request(Method::GET, "/users/7", ""), None).await;

    assert_eq!(res.headers().get("content-type").unwrap(), "application/json");
    assert_eq!(body_of(res).await, Bytes::from_static(br#"{"id":"7"}"#));
}

#[tokio::test]
async fn severity_follows_status_without_error() {
    let (lines, logger) = recording();
    let router = Router::new()
        .on(Method::GET, "/down", unavailable)
        .on(Method::GET, "/gone", missing)
        .on(Method::GET, "/quiet", silent);
    let mux = Mux::new(router, Config::default().with_template("%rescode%")).with_logger(logger);

    mux.call(request(Method::GET, "/down", ""), None).await;
    mux.call(request(Method::GET, "/gone", ""), None).await;
    let quiet = mux.call(request(Method::GET, "/quiet", ""), None).await;

    assert_eq!(quiet.status(), StatusCode::OK);
    let lines = lines.lock().unwrap();
    let seen: Vec<_> = lines.iter().map(|l| (l.severity, l.message.as_str())).collect();
    assert_eq!(
        seen,
        vec![
            (Severity::Warn, "503"),
            (Severity::Info, "404"),
            (Severity::Debug, "200"),
        ]
    );
    assert!(lines.iter().all(|l| l.fields.is_empty() && l.error.is_none()));
}

#[tokio::test]
async fn concurrent_requests_see_whole_templates() {
    let (lines, logger) = recording();
    let router = Router::new().route("/", silent);
    let mux = Arc::new(Mux::new(router, Config::default().with_template("A %mtd% A")).with_logger(logger));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..32 {
        let mux = Arc::clone(&mux);
        tasks.spawn(async move {
            if i % 4 == 0 {
                mux.set_template(if i % 8 == 0 { "B %mtd% B" } else { "A %mtd% A" });
            }
            mux.call(request(Method::PUT, "/", ""), None).await;
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 32);
    assert!(lines.iter().all(|l| l.message == "A PUT A" || l.message == "B PUT B"));
}

#[tokio::test]
async fn broken_request_body_becomes_a_logged_400() {
    for capture in [true, false] {
        let (lines, logger) = recording();
        let router = Router::new().on(Method::POST, "/echo", echo);
        let config = Config::default()
            .with_template("%mtd% %uri% %rescode%(%resst%)")
            .with_request_body(capture);
        let mux = Mux::new(router, config).with_logger(logger);

        let req = http::Request::post("/echo").body(Reset).unwrap();
        let res = mux.call(req, None).await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].severity, Severity::Warn);
        assert_eq!(lines[0].message, "POST /echo 400(Bad Request)");
        assert_eq!(lines[0].fields[0].0, "reason");
        assert!(lines[0].fields[0].1.contains("peer reset"), "capture={capture}");
    }
}
