//! Message history.
//!
//! Every channel and client owns an in-memory [`Buffer`]. When persistent
//! history is enabled, items for targets whose [`HistoryStatus`] is
//! `Persistent` go to a [`PersistentHistory`] store instead. Readers get a
//! [`Sequence`] bound to one target, one correspondent and one cutoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::casemap::CasefoldError;
use crate::config::{HistoryConfig, PersistentHistoryConfig, PersistentPolicy};

pub mod buffer;
pub mod noop;
pub mod persistent;

pub use buffer::Buffer;
pub use noop::NoopHistory;
pub use persistent::RedbHistory;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("insufficient privileges to read this history")]
    InsufficientPrivileges,
    #[error("invalid correspondent: {0}")]
    Casefold(#[from] CasefoldError),
    #[error("history store error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Privmsg,
    Notice,
    Join,
    Part,
    Quit,
}

impl ItemKind {
    pub fn command(self) -> &'static str {
        match self {
            Self::Privmsg => "PRIVMSG",
            Self::Notice => "NOTICE",
            Self::Join => "JOIN",
            Self::Part => "PART",
            Self::Quit => "QUIT",
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub msgid: String,
    pub time: DateTime<Utc>,
    pub kind: ItemKind,
    /// `nick!user@host` of the author.
    pub nickmask: String,
    /// Author's account, `*` if not logged in.
    pub account_name: String,
    /// Channel name or recipient nick as sent on the wire.
    pub target: String,
    /// Casefolded name of the other party in a conversation. Empty for
    /// channel items.
    pub correspondent: String,
    pub text: String,
}

/// Where a target's history lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Disabled,
    Ephemeral,
    Persistent,
}

impl HistoryStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disabled" => Some(Self::Disabled),
            "ephemeral" => Some(Self::Ephemeral),
            "persistent" => Some(Self::Persistent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Ephemeral => "ephemeral",
            Self::Persistent => "persistent",
        }
    }
}

/// Combine the server policy for a category with the target's own setting.
pub fn apply_policy(policy: PersistentPolicy, local: Option<HistoryStatus>) -> HistoryStatus {
    match policy {
        PersistentPolicy::Mandatory => HistoryStatus::Persistent,
        PersistentPolicy::OptOut => local.unwrap_or(HistoryStatus::Persistent),
        PersistentPolicy::OptIn => match local {
            Some(HistoryStatus::Persistent) => HistoryStatus::Persistent,
            Some(HistoryStatus::Disabled) => HistoryStatus::Disabled,
            _ => HistoryStatus::Ephemeral,
        },
        PersistentPolicy::Disabled => match local {
            Some(HistoryStatus::Disabled) => HistoryStatus::Disabled,
            _ => HistoryStatus::Ephemeral,
        },
    }
}

/// Status of a channel's history.
pub fn channel_status(
    config: &HistoryConfig,
    registered: bool,
    local: Option<HistoryStatus>,
) -> HistoryStatus {
    if !config.enabled {
        return HistoryStatus::Disabled;
    }
    if !config.persistent.enabled {
        return HistoryStatus::Ephemeral;
    }
    if registered {
        apply_policy(config.persistent.registered_channels, local)
    } else if config.persistent.unregistered_channels {
        HistoryStatus::Persistent
    } else {
        HistoryStatus::Ephemeral
    }
}

/// Status of a client's direct message history. Clients without an
/// account never get persistent history.
pub fn client_status(
    config: &HistoryConfig,
    logged_in: bool,
    local: Option<HistoryStatus>,
) -> HistoryStatus {
    if !config.enabled {
        return HistoryStatus::Disabled;
    }
    if !config.persistent.enabled || !logged_in {
        return HistoryStatus::Ephemeral;
    }
    apply_policy(config.persistent.direct_messages, local)
}

/// A view over one target's history.
///
/// Results are in chronological order. With only `after` set, the
/// earliest matching items are returned; otherwise the latest items
/// before `before`.
#[async_trait]
pub trait Sequence: Send + Sync {
    async fn between(
        &self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Item>, HistoryError>;

    async fn latest(&self, limit: usize) -> Result<Vec<Item>, HistoryError> {
        self.between(None, None, limit).await
    }

    /// Items at or before this instant are never returned.
    fn cutoff(&self) -> Option<DateTime<Utc>>;
}

/// Durable history, keyed by target (casefolded channel or account name)
/// and correspondent.
#[async_trait]
pub trait PersistentHistory: Send + Sync {
    fn make_sequence(
        self: Arc<Self>,
        target: &str,
        correspondent: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Box<dyn Sequence>;

    async fn store(&self, target: &str, item: &Item) -> Result<(), HistoryError>;

    /// Remove every item authored by `account` (casefolded).
    async fn forget(&self, account: &str) -> Result<usize, HistoryError>;

    /// Delete one message. Unless `account` is `*`, it must match the
    /// recorded author. Returns whether anything was deleted.
    async fn delete_msgid(&self, msgid: &str, account: &str) -> Result<bool, HistoryError>;

    /// Apply live parameters from a rehash.
    fn set_config(&self, config: &PersistentHistoryConfig);
}

/// Keep items strictly newer than `cutoff`, inside the bounds, then trim
/// to `limit` from the appropriate end.
pub(crate) fn window<I>(
    items: I,
    cutoff: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
    limit: usize,
) -> Vec<Item>
where
    I: IntoIterator<Item = Item>,
{
    let mut selected: Vec<Item> = items
        .into_iter()
        .filter(|item| cutoff.is_none_or(|c| item.time > c))
        .filter(|item| after.is_none_or(|a| item.time > a))
        .filter(|item| before.is_none_or(|b| item.time < b))
        .collect();
    if selected.len() > limit {
        if after.is_some() && before.is_none() {
            selected.truncate(limit);
        } else {
            selected.drain(..selected.len() - limit);
        }
    }
    selected
}

#[cfg(test)]
pub(crate) fn test_item(msgid: &str, secs: i64, account: &str, correspondent: &str) -> Item {
    Item {
        msgid: msgid.to_string(),
        time: DateTime::from_timestamp(secs, 0).unwrap_or_default(),
        kind: ItemKind::Privmsg,
        nickmask: format!("{account}!u@h"),
        account_name: account.to_string(),
        target: "#test".to_string(),
        correspondent: correspondent.to_string(),
        text: format!("message {msgid}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(persistent: bool) -> HistoryConfig {
        let mut config = HistoryConfig {
            enabled: true,
            ..Default::default()
        };
        config.persistent.enabled = persistent;
        config
    }

    #[test]
    fn policy_table() {
        use HistoryStatus::*;
        use PersistentPolicy as P;
        assert_eq!(apply_policy(P::Mandatory, Some(Disabled)), Persistent);
        assert_eq!(apply_policy(P::OptOut, None), Persistent);
        assert_eq!(apply_policy(P::OptOut, Some(Ephemeral)), Ephemeral);
        assert_eq!(apply_policy(P::OptIn, None), Ephemeral);
        assert_eq!(apply_policy(P::OptIn, Some(Persistent)), Persistent);
        assert_eq!(apply_policy(P::OptIn, Some(Disabled)), Disabled);
        assert_eq!(apply_policy(P::Disabled, Some(Persistent)), Ephemeral);
        assert_eq!(apply_policy(P::Disabled, Some(Disabled)), Disabled);
    }

    #[test]
    fn disabled_history_wins() {
        let config = HistoryConfig::default();
        assert_eq!(channel_status(&config, true, None), HistoryStatus::Disabled);
        assert_eq!(client_status(&config, true, None), HistoryStatus::Disabled);
    }

    #[test]
    fn channel_status_by_registration() {
        let mut config = config(true);
        config.persistent.registered_channels = PersistentPolicy::Mandatory;
        assert_eq!(channel_status(&config, true, None), HistoryStatus::Persistent);
        assert_eq!(channel_status(&config, false, None), HistoryStatus::Ephemeral);
        config.persistent.unregistered_channels = true;
        assert_eq!(channel_status(&config, false, None), HistoryStatus::Persistent);
    }

    #[test]
    fn anonymous_clients_are_ephemeral() {
        let mut config = config(true);
        config.persistent.direct_messages = PersistentPolicy::Mandatory;
        assert_eq!(client_status(&config, false, None), HistoryStatus::Ephemeral);
        assert_eq!(client_status(&config, true, None), HistoryStatus::Persistent);
    }

    #[test]
    fn window_respects_cutoff_and_direction() {
        let items: Vec<Item> = (1..=5)
            .map(|i| test_item(&format!("m{i}"), i * 10, "alice", ""))
            .collect();
        let cutoff = DateTime::from_timestamp(10, 0);

        let latest = window(items.clone(), cutoff, None, None, 2);
        let ids: Vec<_> = latest.iter().map(|i| i.msgid.as_str()).collect();
        assert_eq!(ids, ["m4", "m5"]);

        let after = window(items.clone(), cutoff, DateTime::from_timestamp(20, 0), None, 2);
        let ids: Vec<_> = after.iter().map(|i| i.msgid.as_str()).collect();
        assert_eq!(ids, ["m3", "m4"]);

        let all = window(items, cutoff, None, None, 100);
        assert_eq!(all.len(), 4);
    }
}
