//! Hostname lookups for registering clients.
//!
//! Reverse lookup followed by a forward confirmation: a PTR name is only
//! trusted if it resolves back to the connecting address.

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// A confirmed hostname for `ip`, or `None`.
    async fn lookup(&self, ip: IpAddr) -> Option<String>;
}

/// Resolver backed by the system DNS configuration.
#[derive(Clone)]
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    pub fn new() -> Self {
        // Try system config, fall back to defaults
        let resolver = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });
        Self { resolver }
    }

    async fn reverse_confirmed(&self, ip: IpAddr) -> Option<String> {
        let lookup = self.resolver.reverse_lookup(ip).await.ok()?;
        let name = lookup.iter().next()?.to_string();
        let forward = self.resolver.lookup_ip(name.as_str()).await.ok()?;
        if !forward.iter().any(|addr| addr == ip) {
            debug!(%ip, name = %name, "Reverse name does not resolve back");
            return None;
        }
        Some(name.trim_end_matches('.').to_string())
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostnameResolver for DnsResolver {
    async fn lookup(&self, ip: IpAddr) -> Option<String> {
        tokio::time::timeout(LOOKUP_TIMEOUT, self.reverse_confirmed(ip))
            .await
            .ok()
            .flatten()
    }
}
