//! Diagnostics HTTP listener.
//!
//! Serves `/metrics` for Prometheus scraping. Its address comes from
//! `debug.diagnostics_listener`; the rehash coordinator starts, stops or
//! moves it so that at most one runs at a time.

use axum::{Router, routing::get};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// A running diagnostics listener.
#[derive(Debug)]
pub struct DiagnosticsServer {
    addr: String,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl DiagnosticsServer {
    /// Bind `addr` and start serving. Binding happens synchronously so that
    /// errors reach the caller.
    pub fn start(addr: &str) -> std::io::Result<Self> {
        let socket: SocketAddr = addr
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let std_listener = std::net::TcpListener::bind(socket)?;
        std_listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(address = %local_addr, "Diagnostics HTTP server listening");
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router()).await {
                tracing::error!("Diagnostics HTTP server error: {}", e);
            }
        });

        Ok(Self {
            addr: addr.to_string(),
            local_addr,
            task,
        })
    }

    /// The configured address this server was started for.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        tracing::info!(address = %self.addr, "Stopping diagnostics HTTP server");
        self.task.abort();
    }
}

impl Drop for DiagnosticsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn serves_metrics() {
        crate::metrics::init();
        let server = DiagnosticsServer::start("127.0.0.1:0").unwrap();
        let mut stream = tokio::net::TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("irc_connected_sessions"));
        server.stop();
    }

    #[test]
    fn rejects_bad_address() {
        assert!(DiagnosticsServer::start("not-an-address").is_err());
    }
}
