//! Minimal reclog example: a few JSON endpoints with access logging.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -X POST http://localhost:3000/users
//!   curl http://localhost:3000/flaky
//!   curl http://localhost:3000/nowhere

use std::sync::Arc;

use http::{Method, StatusCode};
use reclog::{
    Config, HandlerError, Mux, Request, ResponseRecorder, ResponseWriter, Router, Server,
    TracingLogger,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), reclog::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Router::new()
        .on(Method::GET,    "/users/{id}", get_user)
        .on(Method::POST,   "/users",      create_user)
        .on(Method::DELETE, "/users/{id}", delete_user)
        .on(Method::GET,    "/flaky",      flaky);

    let config = Config::default()
        .with_template(r#"%raddr% > |%mtd%| %uri% %reqb% [%reqbody%] < %rescode%(%resst%) %resb% in %dur%ms; "%ua%""#)
        .with_request_body(true);

    let mux = Arc::new(Mux::new(router, config).with_logger(TracingLogger));

    Server::bind("0.0.0.0:3000")?.serve(mux).await
}

// GET /users/{id}
async fn get_user(req: &mut Request, res: &mut ResponseRecorder) -> Result<(), HandlerError> {
    let id = req.param("id").unwrap_or("unknown").to_owned();
    res.headers_mut().insert("content-type", http::HeaderValue::from_static("application/json"));
    res.write(format!(r#"{{"id":"{id}","name":"alice"}}"#).as_bytes())?;
    Ok(())
}

// POST /users
//
// An empty body is the client's mistake: logged at info, answered with 400.
async fn create_user(req: &mut Request, res: &mut ResponseRecorder) -> Result<(), HandlerError> {
    let body = req.bytes().await?;
    if body.is_empty() {
        return Err(HandlerError::info("empty body").with_field("path", req.path()));
    }

    res.headers_mut().insert("location", http::HeaderValue::from_static("/users/99"));
    res.write_status(StatusCode::CREATED);
    res.write(br#"{"id":"99","name":"new_user"}"#)?;
    Ok(())
}

// DELETE /users/{id} → 204 No Content
async fn delete_user(_req: &mut Request, res: &mut ResponseRecorder) {
    res.write_status(StatusCode::NO_CONTENT);
}

// GET /flaky → 503, logged at error with context
async fn flaky(_req: &mut Request, _res: &mut ResponseRecorder) -> Result<(), HandlerError> {
    Err(HandlerError::new("db unavailable")
        .with_status(StatusCode::SERVICE_UNAVAILABLE)
        .with_field("pool", "primary"))
}
