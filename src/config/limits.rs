//! Connection limits, throttling and protocol length limits.

use ipnet::IpNet;
use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Per-network connection limits (`[server.ip_limits]`).
///
/// Clients are grouped into networks by masking their address to
/// `cidr_len_ipv4` / `cidr_len_ipv6` bits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IpLimitsConfig {
    /// Enforce `max_concurrent_connections`.
    #[serde(default = "default_true")]
    pub count: bool,
    /// Enforce the connection throttle.
    #[serde(default = "default_true")]
    pub throttle: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_connections: u32,
    /// Window over which `max_connections_per_window` attempts are allowed.
    #[serde(default = "default_window", deserialize_with = "duration::deserialize")]
    pub window: Duration,
    #[serde(default = "default_max_per_window")]
    pub max_connections_per_window: u32,
    /// How long an automatic throttle D-line lasts. Zero disables auto-banning.
    #[serde(default = "default_ban_duration", deserialize_with = "duration::deserialize")]
    pub throttle_ban_duration: Duration,
    #[serde(default = "default_cidr_v4")]
    pub cidr_len_ipv4: u8,
    #[serde(default = "default_cidr_v6")]
    pub cidr_len_ipv6: u8,
    /// Networks exempt from both limits.
    #[serde(default = "default_exempted")]
    pub exempted: Vec<IpNet>,
}

impl Default for IpLimitsConfig {
    fn default() -> Self {
        Self {
            count: true,
            throttle: true,
            max_concurrent_connections: default_max_concurrent(),
            window: default_window(),
            max_connections_per_window: default_max_per_window(),
            throttle_ban_duration: default_ban_duration(),
            cidr_len_ipv4: default_cidr_v4(),
            cidr_len_ipv6: default_cidr_v6(),
            exempted: default_exempted(),
        }
    }
}

/// Limits applied to the Tor network as a whole (`[server.tor_listeners]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TorListenersConfig {
    /// Tor users must authenticate with SASL before registering.
    #[serde(default)]
    pub require_sasl: bool,
    /// Hostname assigned to Tor users.
    #[serde(default = "default_tor_vhost")]
    pub vhost: String,
    /// Zero means unlimited.
    #[serde(default)]
    pub max_connections: u32,
    #[serde(default = "default_window", deserialize_with = "duration::deserialize")]
    pub throttle_duration: Duration,
    /// Zero disables the throttle.
    #[serde(default)]
    pub max_connections_per_duration: u32,
}

impl Default for TorListenersConfig {
    fn default() -> Self {
        Self {
            require_sasl: false,
            vhost: default_tor_vhost(),
            max_connections: 0,
            throttle_duration: default_window(),
            max_connections_per_duration: 0,
        }
    }
}

/// Protocol length limits advertised in ISUPPORT.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_nicklen")]
    pub nicklen: usize,
    #[serde(default = "default_channellen")]
    pub channellen: usize,
    #[serde(default = "default_awaylen")]
    pub awaylen: usize,
    #[serde(default = "default_kicklen")]
    pub kicklen: usize,
    #[serde(default = "default_topiclen")]
    pub topiclen: usize,
    #[serde(default = "default_chan_limit")]
    pub chan_limit: usize,
    #[serde(default = "default_monitor_entries")]
    pub monitor_entries: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            nicklen: default_nicklen(),
            channellen: default_channellen(),
            awaylen: default_awaylen(),
            kicklen: default_kicklen(),
            topiclen: default_topiclen(),
            chan_limit: default_chan_limit(),
            monitor_entries: default_monitor_entries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> u32 {
    16
}

fn default_window() -> Duration {
    Duration::from_secs(600)
}

fn default_max_per_window() -> u32 {
    32
}

fn default_ban_duration() -> Duration {
    Duration::from_secs(600)
}

fn default_cidr_v4() -> u8 {
    32
}

fn default_cidr_v6() -> u8 {
    64
}

fn default_exempted() -> Vec<IpNet> {
    ["127.0.0.0/8", "::1/128"]
        .iter()
        .filter_map(|net| net.parse().ok())
        .collect()
}

fn default_tor_vhost() -> String {
    "tor-network.onion".to_string()
}

fn default_nicklen() -> usize {
    32
}

fn default_channellen() -> usize {
    64
}

fn default_awaylen() -> usize {
    390
}

fn default_kicklen() -> usize {
    390
}

fn default_topiclen() -> usize {
    390
}

fn default_chan_limit() -> usize {
    100
}

fn default_monitor_entries() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_limit_defaults() {
        let config = IpLimitsConfig::default();
        assert!(config.count);
        assert!(config.throttle);
        assert_eq!(config.max_concurrent_connections, 16);
        assert_eq!(config.window, Duration::from_secs(600));
        assert_eq!(config.exempted.len(), 2);
    }

    #[test]
    fn ip_limits_parse_durations_and_nets() {
        let config: IpLimitsConfig = toml::from_str(
            r#"
max_concurrent_connections = 2
window = "1m"
max_connections_per_window = 3
throttle_ban_duration = "10m"
exempted = ["10.0.0.0/8"]
"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrent_connections, 2);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.throttle_ban_duration, Duration::from_secs(600));
        assert_eq!(config.exempted, vec!["10.0.0.0/8".parse::<IpNet>().unwrap()]);
    }

    #[test]
    fn tor_defaults_are_unlimited() {
        let tor = TorListenersConfig::default();
        assert_eq!(tor.max_connections, 0);
        assert_eq!(tor.max_connections_per_duration, 0);
        assert_eq!(tor.vhost, "tor-network.onion");
    }
}
