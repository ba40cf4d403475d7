//! Channel state.
//!
//! Only what the core needs from a channel: membership (for history
//! access checks and LUSERS/LIST), registration status and the channel's
//! history buffer.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::client::Client;
use crate::config::Config;
use crate::history::{self, Buffer, HistoryStatus};

/// Registration data loaded from the datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredChannel {
    pub name: String,
    pub registered_at: DateTime<Utc>,
    pub history: Option<HistoryStatus>,
}

#[derive(Debug, Default)]
struct ChannelMeta {
    registered_at: Option<DateTime<Utc>>,
    history: Option<HistoryStatus>,
}

#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub name_casefolded: String,
    pub created_at: DateTime<Utc>,
    meta: RwLock<ChannelMeta>,
    members: RwLock<HashMap<u64, Weak<Client>>>,
    history: Arc<Buffer>,
}

impl Channel {
    pub fn new(name: &str, name_casefolded: &str, history_length: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            name_casefolded: name_casefolded.to_string(),
            created_at: Utc::now(),
            meta: RwLock::new(ChannelMeta::default()),
            members: RwLock::new(HashMap::new()),
            history: Arc::new(Buffer::new(history_length)),
        })
    }

    pub fn apply_registration(&self, registration: &RegisteredChannel) {
        let mut meta = self.meta.write();
        meta.registered_at = Some(registration.registered_at);
        meta.history = registration.history;
    }

    pub fn is_registered(&self) -> bool {
        self.meta.read().registered_at.is_some()
    }

    /// Where this channel's history is kept, and the persistent target key.
    pub fn history_status(&self, config: &Config) -> (HistoryStatus, String) {
        let meta = self.meta.read();
        let status =
            history::channel_status(&config.history, meta.registered_at.is_some(), meta.history);
        (status, self.name_casefolded.clone())
    }

    pub fn history(&self) -> &Arc<Buffer> {
        &self.history
    }

    /// Returns false if the client was already a member.
    pub fn add_member(&self, client: &Arc<Client>) -> bool {
        self.members
            .write()
            .insert(client.id, Arc::downgrade(client))
            .is_none()
    }

    pub fn remove_member(&self, client_id: u64) -> bool {
        self.members.write().remove(&client_id).is_some()
    }

    pub fn has_client(&self, client: &Client) -> bool {
        self.members.read().contains_key(&client.id)
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub fn members(&self) -> Vec<Arc<Client>> {
        self.members
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// ELIST `U` filters for LIST: `>n` and `<n` on member count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElistMatcher {
    /// Inclusive lower bound.
    pub min_clients: Option<usize>,
    /// Inclusive upper bound.
    pub max_clients: Option<usize>,
}

impl ElistMatcher {
    /// Parse one comma-separated LIST parameter. Returns `None` if it
    /// holds no member-count condition.
    pub fn parse(param: &str) -> Option<Self> {
        let mut matcher = Self::default();
        let mut any = false;
        for cond in param.split(',') {
            if let Some(n) = cond.strip_prefix('>').and_then(|n| n.parse::<usize>().ok()) {
                matcher.min_clients = Some(n.saturating_add(1));
                any = true;
            } else if let Some(n) = cond.strip_prefix('<').and_then(|n| n.parse::<usize>().ok()) {
                matcher.max_clients = Some(n.saturating_sub(1));
                any = true;
            }
        }
        any.then_some(matcher)
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        self.matches_count(channel.member_count())
    }

    pub fn matches_count(&self, count: usize) -> bool {
        self.min_clients.is_none_or(|min| count >= min)
            && self.max_clients.is_none_or(|max| count <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::client::ClientIdentity;

    #[test]
    fn membership() {
        let channel = Channel::new("#Test", "#test", 8);
        let client = Client::new(ClientIdentity::default(), "192.0.2.1".parse().unwrap(), 8);
        assert!(!channel.has_client(&client));
        assert!(channel.add_member(&client));
        assert!(!channel.add_member(&client));
        assert!(channel.has_client(&client));
        assert_eq!(channel.members().len(), 1);
        assert!(channel.remove_member(client.id));
        assert_eq!(channel.member_count(), 0);
    }

    #[test]
    fn elist_bounds() {
        let m = ElistMatcher::parse(">2,<5").unwrap();
        assert_eq!(m.min_clients, Some(3));
        assert_eq!(m.max_clients, Some(4));
        assert!(!m.matches_count(2));
        assert!(m.matches_count(3));
        assert!(m.matches_count(4));
        assert!(!m.matches_count(5));
        assert!(ElistMatcher::parse("#chan*").is_none());
    }

    #[test]
    fn max_only_applies_upper_bound() {
        let m = ElistMatcher::parse("<3").unwrap();
        assert!(m.matches_count(0));
        assert!(m.matches_count(2));
        assert!(!m.matches_count(3));
    }
}
