//! Network listener configuration.

use serde::Deserialize;
use std::time::Duration;

/// One entry of `[server.listeners]`, keyed by its bind address.
///
/// A key beginning with `:` (for example `":6667"`) binds every interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListenerConfig {
    /// Serve TLS on this listener.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Connections arrive through a local Tor hidden service.
    #[serde(default)]
    pub tor: bool,
    /// Plaintext listener that only serves the STS upgrade burst.
    #[serde(default)]
    pub sts_only: bool,
}

impl ListenerConfig {
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// Certificate material for a TLS listener. Reloaded on rehash.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate chain (PEM format).
    pub cert: String,
    /// Path to private key (PEM format).
    pub key: String,
    /// CA bundle used to request client certificates. Certificates are
    /// optional; a verified one supplies the session's fingerprint.
    #[serde(default)]
    pub client_ca: Option<String>,
}

/// Strict Transport Security policy advertised through the `sts` capability.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// TLS port clients should upgrade to.
    #[serde(default = "default_sts_port")]
    pub port: u16,
    #[serde(default = "default_sts_duration", deserialize_with = "super::duration::deserialize")]
    pub duration: Duration,
    #[serde(default)]
    pub preload: bool,
    /// Text shown to clients on STS-only listeners, one NOTICE per line.
    #[serde(default)]
    pub banner: String,
}

impl Default for StsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_sts_port(),
            duration: default_sts_duration(),
            preload: false,
            banner: String::new(),
        }
    }
}

impl StsConfig {
    /// Capability value, e.g. `port=6697,duration=2592000`.
    pub fn value(&self) -> String {
        let mut value = format!("port={},duration={}", self.port, self.duration.as_secs());
        if self.preload {
            value.push_str(",preload");
        }
        value
    }
}

fn default_sts_port() -> u16 {
    6697
}

fn default_sts_duration() -> Duration {
    Duration::from_secs(2_592_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sts_value_includes_preload() {
        let mut sts = StsConfig {
            enabled: true,
            ..Default::default()
        };
        assert_eq!(sts.value(), "port=6697,duration=2592000");
        sts.preload = true;
        assert_eq!(sts.value(), "port=6697,duration=2592000,preload");
    }

    #[test]
    fn listener_defaults_to_plaintext() {
        let listener: ListenerConfig = toml::from_str("").unwrap();
        assert!(!listener.is_tls());
        assert!(!listener.tor);
        assert!(!listener.sts_only);
    }
}
