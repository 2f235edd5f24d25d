//! HTTP server and graceful shutdown.
//!
//! [`Server`] is the thinnest possible host for a [`Mux`]: it accepts TCP
//! connections, speaks HTTP/1.1 or HTTP/2 through hyper, hands every request
//! and its peer address to the mux, and drains in-flight connections on
//! shutdown.
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. stops calling `listener.accept()`,
//! 2. lets every in-flight connection task run to completion,
//! 3. returns from [`Server::serve`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Error;
use crate::mux::Mux;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use reclog::Server;
    /// assert!(Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse().map_err(|_| Error::InvalidAddr(addr.to_owned()))?;
        Ok(Self { addr })
    }

    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Serves `mux` until SIGTERM or Ctrl-C, then drains in-flight connections.
    ///
    /// Pass an `Arc<Mux>` and keep a clone to swap the template or logger
    /// while serving.
    pub async fn serve(self, mux: impl Into<Arc<Mux>>) -> Result<(), Error> {
        self.serve_with_shutdown(mux, shutdown_signal()).await
    }

    /// Serves `mux` until `shutdown` resolves, then drains in-flight connections.
    pub async fn serve_with_shutdown(
        self,
        mux: impl Into<Arc<Mux>>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| Error::Bind { addr: self.addr, source })?;
        let local_addr = listener.local_addr()?;

        let mux: Arc<Mux> = mux.into();

        info!(addr = %local_addr, "reclog listening");

        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let mux = Arc::clone(&mux);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let mux = Arc::clone(&mux);
                            async move { dispatch(mux, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("reclog stopped");
        Ok(())
    }
}

/// Failures are answered with a status inside the mux, so hyper never sees an error.
async fn dispatch(
    mux: Arc<Mux>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    Ok(mux.call(req, Some(remote_addr)).await)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT. On Windows only Ctrl-C is available.
///
/// A signal that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    use super::*;
    use crate::{Config, Request, ResponseRecorder, ResponseWriter, Router};

    async fn pong(_req: &mut Request, res: &mut ResponseRecorder) -> Result<(), crate::HandlerError> {
        res.write(b"pong")?;
        Ok(())
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let mux = Mux::new(Router::new(), Config::default());
        let err = Server::bind(&addr).unwrap()
            .serve_with_shutdown(mux, std::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        // Reserve a free port, then release it for the server.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let mux = Mux::new(Router::new().on(http::Method::GET, "/ping", pong), Config::default());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = Server::bind(&addr.to_string()).unwrap();
        assert_eq!(server.addr(), addr);
        let server = tokio::spawn(
            server.serve_with_shutdown(mux, async {
                let _ = stop_rx.await;
            }),
        );

        let mut stream = loop {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("pong"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
