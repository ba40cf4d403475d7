//! Account and authentication configuration.

use ipnet::IpNet;
use serde::Deserialize;
use std::time::Duration;

use super::duration;
use super::multiclient::MulticlientConfig;

/// `[accounts]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountsConfig {
    /// Advertise SASL.
    #[serde(default)]
    pub authentication_enabled: bool,
    #[serde(default)]
    pub require_sasl: RequireSaslConfig,
    /// A SASL login satisfies the server password requirement.
    #[serde(default)]
    pub skip_server_password: bool,
    #[serde(default)]
    pub nick_reservation: NickReservationConfig,
    #[serde(default)]
    pub vhosts: VHostConfig,
    #[serde(default)]
    pub registration: AccountRegistrationConfig,
    /// Modes applied to every client on registration, e.g. `"+i"`.
    #[serde(default)]
    pub default_user_modes: Option<String>,
    #[serde(default)]
    pub multiclient: MulticlientConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequireSaslConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Networks allowed to register without SASL.
    #[serde(default)]
    pub exempted: Vec<IpNet>,
}

impl RequireSaslConfig {
    pub fn is_exempt(&self, ip: std::net::IpAddr) -> bool {
        self.exempted.iter().any(|net| net.contains(&ip))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NickReservationConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VHostConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountRegistrationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub throttling: ThrottleConfig,
}

/// Rate limit on account registration attempts, server wide.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_throttle_duration", deserialize_with = "duration::deserialize")]
    pub duration: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: default_throttle_duration(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_throttle_duration() -> Duration {
    Duration::from_secs(600)
}

fn default_max_attempts() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_sasl_exemptions() {
        let config = RequireSaslConfig {
            enabled: true,
            exempted: vec!["10.0.0.0/8".parse().unwrap()],
        };
        assert!(config.is_exempt("10.1.2.3".parse().unwrap()));
        assert!(!config.is_exempt("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn throttle_defaults() {
        let config: AccountsConfig = toml::from_str("[registration.throttling]\nenabled = true").unwrap();
        assert!(config.registration.throttling.enabled);
        assert_eq!(config.registration.throttling.max_attempts, 30);
        assert_eq!(config.registration.throttling.duration, Duration::from_secs(600));
    }
}
