//! HTTP server hosting a rate limited router.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::HttpLimiter;
use crate::error::Result;

/// HTTP server that puts an [`HttpLimiter`] in front of a router.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The wrapped application
    router: Router,
}

impl HttpServer {
    /// Create a new server for `router`, limited by `limiter`.
    pub fn new(addr: SocketAddr, limiter: HttpLimiter, router: Router) -> Self {
        Self {
            addr,
            router: limiter.handle(router),
        }
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending::<()>()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            "Starting rate limited HTTP server"
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
