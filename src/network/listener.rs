//! Network listeners.
//!
//! One listener per configured address. The rehash coordinator keeps the
//! set in step with the config: listeners still configured are reloaded in
//! place, the rest are stopped, and new addresses get a fresh listener
//! from the [`ListenerFactory`].

use crate::config::ListenerConfig;
use crate::network::connection;
use crate::network::tls::{self, TlsError};
use crate::server::Server;
use arc_swap::ArcSwap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listen address {0}")]
    Address(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error("{0}")]
    Other(String),
}

/// A running listener.
pub trait IrcListener: Send + Sync {
    /// The configured address, as written in the config.
    fn address(&self) -> &str;
    /// Apply new settings (for example fresh TLS material) in place.
    fn reload(&self, config: &ListenerConfig) -> Result<(), ListenerError>;
    /// Stop accepting. Existing connections are unaffected.
    fn stop(&self);
}

/// Creates listeners for newly configured addresses.
pub trait ListenerFactory: Send + Sync {
    fn create(
        &self,
        address: &str,
        config: &ListenerConfig,
        server: Weak<Server>,
    ) -> Result<Box<dyn IrcListener>, ListenerError>;
}

/// Per-listener settings handed to each accepted connection.
#[derive(Clone)]
pub struct ListenerSettings {
    pub tls: Option<TlsAcceptor>,
    pub tor: bool,
    pub sts_only: bool,
}

impl ListenerSettings {
    pub fn from_config(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let tls = config.tls.as_ref().map(tls::load_acceptor).transpose()?;
        Ok(Self {
            tls,
            tor: config.tor,
            sts_only: config.sts_only,
        })
    }
}

/// Resolve a config address. `":6667"` means every interface.
pub fn parse_address(address: &str) -> Result<SocketAddr, ListenerError> {
    let full = if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    };
    full.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ListenerError::Address(address.to_string()))
}

/// TCP listener, with optional TLS.
pub struct TcpIrcListener {
    address: String,
    local_addr: SocketAddr,
    settings: Arc<ArcSwap<ListenerSettings>>,
    shutdown: CancellationToken,
}

impl TcpIrcListener {
    pub fn bind(
        address: &str,
        config: &ListenerConfig,
        server: Weak<Server>,
    ) -> Result<Self, ListenerError> {
        let settings = Arc::new(ArcSwap::from_pointee(ListenerSettings::from_config(config)?));
        let bind_err = |source| ListenerError::Bind {
            addr: address.to_string(),
            source,
        };
        let std_listener = std::net::TcpListener::bind(parse_address(address)?).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let shutdown = CancellationToken::new();
        tokio::spawn(accept_loop(
            listener,
            address.to_string(),
            Arc::clone(&settings),
            server,
            shutdown.clone(),
        ));
        info!(address = %address, %local_addr, tls = config.is_tls(), "Listener bound");

        Ok(Self {
            address: address.to_string(),
            local_addr,
            settings,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl IrcListener for TcpIrcListener {
    fn address(&self) -> &str {
        &self.address
    }

    fn reload(&self, config: &ListenerConfig) -> Result<(), ListenerError> {
        self.settings
            .store(Arc::new(ListenerSettings::from_config(config)?));
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.cancel();
        info!(address = %self.address, "Listener stopped");
    }
}

impl Drop for TcpIrcListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    address: String,
    settings: Arc<ArcSwap<ListenerSettings>>,
    server: Weak<Server>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let Some(server) = server.upgrade() else {
                    break;
                };
                let settings = settings.load_full();
                let address = address.clone();
                tokio::spawn(async move {
                    connection::accept(server, stream, peer, address, settings).await;
                });
            }
            Err(e) => warn!(address = %address, error = %e, "Failed to accept connection"),
        }
    }
}

/// Binds real TCP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpListenerFactory;

impl ListenerFactory for TcpListenerFactory {
    fn create(
        &self,
        address: &str,
        config: &ListenerConfig,
        server: Weak<Server>,
    ) -> Result<Box<dyn IrcListener>, ListenerError> {
        Ok(Box::new(TcpIrcListener::bind(address, config, server)?))
    }
}
