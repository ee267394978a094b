//! HTTP/1 accept loop on hyper.
//!
//! Request bodies are collected before dispatch so endpoint stacks see a
//! complete, replayable body. On shutdown each open connection finishes
//! its in-flight request and closes; the server then waits up to the
//! shutdown timeout for connections to drain.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use portico_config::GatewayConfig;
use portico_core::{full_body, BoxError, RequestBody};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{ServerError, ServerResult};
use crate::http_router::HttpRouter;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Serves an [`HttpRouter`] over HTTP/1.1.
#[derive(Debug, Clone)]
pub struct HttpServer {
    router: Arc<HttpRouter>,
    shutdown_timeout: Duration,
}

impl HttpServer {
    /// Creates a server with a 30 second drain budget.
    #[must_use]
    pub fn new(router: HttpRouter) -> Self {
        Self {
            router: Arc::new(router),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Creates a server using the `shutdown` section.
    #[must_use]
    pub fn from_config(router: HttpRouter, config: &GatewayConfig) -> Self {
        Self::new(router).with_shutdown_timeout(config.shutdown_timeout())
    }

    /// Sets the drain budget.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Returns the router.
    #[must_use]
    pub fn router(&self) -> &HttpRouter {
        &self.router
    }

    /// Binds `addr` and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is invalid or cannot be bound.
    pub async fn run_with_shutdown(&self, addr: &str, shutdown: ShutdownSignal) -> ServerResult<()> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| ServerError::InvalidAddress(addr.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` fires.
    pub async fn serve(&self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local = listener.local_addr()?;
        tracing::info!("HTTP server listening on {}", local);

        let tracker = ConnectionTracker::new();
        let mut stop = shutdown.recv();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let server = self.clone();
                            let token = tracker.acquire();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                server.serve_connection(stream, remote_addr, shutdown).await;
                                drop(token);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                () = &mut stop => {
                    tracing::info!("Shutdown signal received, stopping HTTP server");
                    break;
                }
            }
        }

        drop(listener);
        tracing::info!(
            "Waiting up to {:?} for {} connections to close",
            self.shutdown_timeout,
            tracker.active_connections()
        );
        tokio::select! {
            () = tracker.wait_idle() => {
                tracing::info!("All HTTP connections closed");
            }
            () = tokio::time::sleep(self.shutdown_timeout) => {
                tracing::warn!(
                    "Shutdown timeout reached, {} connections still active",
                    tracker.active_connections()
                );
            }
        }
        Ok(())
    }

    async fn serve_connection(&self, stream: TcpStream, remote_addr: SocketAddr, shutdown: ShutdownSignal) {
        let io = TokioIo::new(stream);
        let router = Arc::clone(&self.router);

        let service = service_fn(move |req: Request<Incoming>| {
            let router = Arc::clone(&router);
            async move {
                let (mut parts, body) = req.into_parts();
                parts.extensions.insert(remote_addr);
                let body = collect_body(body).await;
                Ok::<_, Infallible>(router.dispatch(Request::from_parts(parts, body)).await)
            }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);
        let mut stop = shutdown.recv();

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = &mut stop => {
                tracing::debug!("Draining connection from {} for shutdown", remote_addr);
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            tracing::debug!("Connection error from {}: {}", remote_addr, e);
        }
    }
}

/// Collects the request body. A transport failure is replayed to the
/// endpoint as a body that errors on first read.
async fn collect_body(body: Incoming) -> RequestBody {
    match body.collect().await {
        Ok(collected) => full_body(collected.to_bytes()),
        Err(e) => {
            let err: BoxError = Box::new(e);
            let frames = futures_util::stream::iter([Err::<Frame<Bytes>, BoxError>(err)]);
            StreamBody::new(frames).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Health;
    use http_body_util::Empty;

    #[tokio::test]
    async fn test_run_invalid_address() {
        let server = HttpServer::new(HttpRouter::default());
        let err = server
            .run_with_shutdown("not-an-address", ShutdownSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let server = HttpServer::new(HttpRouter::default()).with_shutdown_timeout(Duration::from_millis(100));
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.run_with_shutdown("127.0.0.1:0", shutdown),
        )
        .await;
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_health_over_a_socket() {
        let health = Health::new("portico-test");
        let router = HttpRouter::from_config(&GatewayConfig::default(), &health).unwrap();
        let server = HttpServer::new(router).with_shutdown_timeout(Duration::from_secs(1));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { server.serve(listener, shutdown).await }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        let conn_task = tokio::spawn(conn);

        let request = Request::get("/health")
            .header("host", addr.to_string())
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            body,
            Bytes::from_static(br#"{"ok":true,"message":"Healthy, from portico-test"}"#)
        );

        drop(sender);
        let _ = conn_task.await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
