//! Network layer: listeners, connections, TLS and hostname lookups.

pub mod connection;
pub mod dns;
pub mod listener;
pub mod tls;

pub use dns::{DnsResolver, HostnameResolver};
pub use listener::{
    IrcListener, ListenerError, ListenerFactory, ListenerSettings, TcpIrcListener,
    TcpListenerFactory,
};
