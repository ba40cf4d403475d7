//! History storage configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// `[history]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Capacity of each channel's in-memory buffer.
    #[serde(default = "default_channel_length")]
    pub channel_length: usize,
    /// Capacity of each client's in-memory direct message buffer.
    #[serde(default = "default_client_length")]
    pub client_length: usize,
    #[serde(default)]
    pub restrictions: HistoryRestrictions,
    #[serde(default)]
    pub persistent: PersistentHistoryConfig,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_length: default_channel_length(),
            client_length: default_client_length(),
            restrictions: HistoryRestrictions::default(),
            persistent: PersistentHistoryConfig::default(),
        }
    }
}

/// Bounds on how far back history queries may reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryRestrictions {
    /// Items older than this are never returned. Zero disables the bound.
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub expire_time: Duration,
    /// Never return channel items from before the requester's account
    /// registration (or connection time, when not logged in).
    #[serde(default)]
    pub enforce_registration_date: bool,
    /// Slack subtracted from the channel cutoff.
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub grace_period: Duration,
}

/// Retention policy for the persistent store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistentPolicy {
    #[default]
    Disabled,
    OptIn,
    OptOut,
    Mandatory,
}

/// `[history.persistent]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistentHistoryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Path to the persistent history database.
    #[serde(default = "default_path")]
    pub path: String,
    /// Store history for channels that are not registered.
    #[serde(default)]
    pub unregistered_channels: bool,
    #[serde(default)]
    pub registered_channels: PersistentPolicy,
    #[serde(default)]
    pub direct_messages: PersistentPolicy,
    /// Upper bound on items returned by a single query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for PersistentHistoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_path(),
            unregistered_channels: false,
            registered_channels: PersistentPolicy::default(),
            direct_messages: PersistentPolicy::default(),
            max_results: default_max_results(),
        }
    }
}

impl PersistentHistoryConfig {
    /// Every category of history is stored persistently with no opt-outs.
    pub fn is_fully_mandatory(&self) -> bool {
        self.enabled
            && self.unregistered_channels
            && self.registered_channels == PersistentPolicy::Mandatory
            && self.direct_messages == PersistentPolicy::Mandatory
    }
}

fn default_channel_length() -> usize {
    2048
}

fn default_client_length() -> usize {
    256
}

fn default_path() -> String {
    "history.redb".to_string()
}

fn default_max_results() -> usize {
    1000
}
