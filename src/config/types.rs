//! Core configuration types and loading.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::accounts::AccountsConfig;
use super::duration;
use super::history::HistoryConfig;
use super::isupport::ISupportList;
use super::limits::{IpLimitsConfig, LimitsConfig, TorListenersConfig};
use super::listen::{ListenerConfig, StsConfig};
use super::oper::OperBlock;
use super::validation::{self, ValidationError};
use crate::caps::{CapSet, CapValues, Capability};
use crate::casemap::Casemapping;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A complete, immutable configuration snapshot.
///
/// Built by [`Config::load`] or [`Config::parse`], which also compute the
/// derived tables in [`Derived`]. The server swaps whole snapshots on
/// rehash; nothing mutates one after it is published.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Enabled help languages.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    pub server: ServerConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub opers: Vec<OperBlock>,
    #[serde(skip)]
    pub derived: Derived,
}

/// Tables computed from the raw config when a snapshot is built.
#[derive(Debug, Clone, Default)]
pub struct Derived {
    pub supported_caps: CapSet,
    pub cap_values: CapValues,
    pub isupport: ISupportList,
    pub motd_lines: Vec<String>,
    pub sts_banner_lines: Vec<String>,
    pub default_user_modes: Vec<char>,
}

impl Config {
    /// Load, validate and prepare a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse, validate and prepare configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        validation::validate(&config).map_err(ConfigError::Invalid)?;
        config.prepare();
        Ok(config)
    }

    fn prepare(&mut self) {
        let mut derived = Derived {
            motd_lines: self.server.motd.load_lines(),
            sts_banner_lines: self
                .server
                .sts
                .banner
                .lines()
                .map(str::to_string)
                .collect(),
            default_user_modes: validation::parse_default_user_modes(
                self.accounts.default_user_modes.as_deref(),
            )
            .unwrap_or_default(),
            ..Default::default()
        };

        for cap in Capability::ALL {
            match cap {
                Capability::Sasl => {
                    if self.accounts.authentication_enabled {
                        derived.supported_caps.add(*cap);
                        derived.cap_values.insert(*cap, "PLAIN,EXTERNAL".to_string());
                    }
                }
                Capability::Sts => {
                    if self.server.sts.enabled {
                        derived.supported_caps.add(*cap);
                        derived.cap_values.insert(*cap, self.server.sts.value());
                    }
                }
                Capability::Chathistory => {
                    if self.history.enabled {
                        derived.supported_caps.add(*cap);
                    }
                }
                _ => derived.supported_caps.add(*cap),
            }
        }

        derived.isupport = self.generate_isupport();
        self.derived = derived;
    }

    fn generate_isupport(&self) -> ISupportList {
        let limits = &self.limits;
        let mut isupport = ISupportList::new();
        isupport.add("AWAYLEN", limits.awaylen.to_string());
        isupport.add("CASEMAPPING", self.server.casemapping.isupport_name());
        isupport.add("CHANLIMIT", format!("#:{}", limits.chan_limit));
        isupport.add("CHANMODES", "beI,k,l,imnst");
        isupport.add("CHANNELLEN", limits.channellen.to_string());
        isupport.add("CHANTYPES", "#");
        if self.history.enabled {
            isupport.add("CHATHISTORY", self.history.persistent.max_results.to_string());
        }
        isupport.add("ELIST", "U");
        isupport.add_no_value("EXCEPTS");
        isupport.add_no_value("INVEX");
        isupport.add("KICKLEN", limits.kicklen.to_string());
        isupport.add("MONITOR", limits.monitor_entries.to_string());
        isupport.add("NETWORK", self.server.network.clone());
        isupport.add("NICKLEN", limits.nicklen.to_string());
        isupport.add("PREFIX", "(qaohv)~&@%+");
        isupport.add("STATUSMSG", "~&@%+");
        isupport.add("TOPICLEN", limits.topiclen.to_string());
        if self.server.enforce_utf8 {
            isupport.add_no_value("UTF8ONLY");
        }
        isupport.add_no_value("WHOX");
        isupport.regenerate_cached_reply();
        isupport
    }
}

/// Server identity and connection handling.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "irc.example.net"). Fixed after launch.
    pub name: String,
    #[serde(default = "default_network")]
    pub network: String,
    /// Fixed after launch.
    #[serde(default)]
    pub casemapping: Casemapping,
    /// Fixed after launch.
    #[serde(default)]
    pub enforce_utf8: bool,
    /// Bcrypt hash of the connection password.
    #[serde(default)]
    pub password: Option<String>,
    /// Listeners keyed by bind address.
    #[serde(default)]
    pub listeners: BTreeMap<String, ListenerConfig>,
    #[serde(default = "default_true")]
    pub lookup_hostnames: bool,
    #[serde(default)]
    pub motd: MotdConfig,
    #[serde(default)]
    pub sts: StsConfig,
    #[serde(default)]
    pub ip_limits: IpLimitsConfig,
    #[serde(default)]
    pub tor_listeners: TorListenersConfig,
    #[serde(default)]
    pub idle_timeouts: IdleTimeoutsConfig,
}

/// Idle timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdleTimeoutsConfig {
    /// Time allowed for the registration handshake before disconnect.
    #[serde(default = "default_registration_timeout", deserialize_with = "duration::deserialize")]
    pub registration: Duration,
}

impl Default for IdleTimeoutsConfig {
    fn default() -> Self {
        Self {
            registration: default_registration_timeout(),
        }
    }
}

/// Message of the Day (MOTD) configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MotdConfig {
    /// Path to MOTD file (one line per MOTD line).
    pub file: Option<String>,
    /// Inline MOTD lines (used when `file` is not set or unreadable).
    #[serde(default)]
    pub lines: Vec<String>,
}

impl MotdConfig {
    /// Load MOTD lines from file, falling back to the inline lines.
    pub fn load_lines(&self) -> Vec<String> {
        if let Some(ref path) = self.file {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    return content.lines().map(|s| s.to_string()).collect();
                }
                Err(e) => {
                    tracing::warn!("Failed to read MOTD file {}: {}", path, e);
                }
            }
        }
        self.lines.clone()
    }
}

/// Path of the SQLite datastore. Fixed after launch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default = "default_datastore_path")]
    pub path: String,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            path: default_datastore_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub registration: ChannelRegistrationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChannelRegistrationConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// `[logging]` section, applied live on rehash.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"lattice_ircd=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log every line sent and received.
    #[serde(default)]
    pub raw_io: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            raw_io: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DebugConfig {
    /// Address for the HTTP diagnostics endpoint (`/metrics`).
    #[serde(default)]
    pub diagnostics_listener: Option<String>,
}

pub(super) fn default_true() -> bool {
    true
}

fn default_network() -> String {
    "LatticeNet".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_registration_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_datastore_path() -> String {
    "ircd.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
