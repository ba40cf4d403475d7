//! Channel management state.
//!
//! This module contains the `ChannelManager` struct, which tracks every
//! live channel by casefolded name. Registered channels are created from
//! the datastore and survive becoming empty.

use crate::casemap::{self, CasefoldError, Casemapping};
use crate::state::channel::{Channel, ElistMatcher, RegisteredChannel};
use crate::state::client::Client;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ChannelManager {
    /// All channels, indexed by casefolded name.
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, mapping: Casemapping) -> Option<Arc<Channel>> {
        let cf = casemap::casefold_channel(name, mapping).ok()?;
        self.channels.get(&cf).map(|c| Arc::clone(c.value()))
    }

    /// Add `client` to `name`, creating the channel if needed. Returns the
    /// channel and whether the client was newly added.
    pub fn join(
        &self,
        client: &Arc<Client>,
        name: &str,
        mapping: Casemapping,
        history_length: usize,
    ) -> Result<(Arc<Channel>, bool), CasefoldError> {
        let cf = casemap::casefold_channel(name, mapping)?;
        let channel = self
            .channels
            .entry(cf.clone())
            .or_insert_with(|| Channel::new(name, &cf, history_length))
            .clone();
        let added = channel.add_member(client);
        Ok((channel, added))
    }

    /// Remove `client` from `name`. Empty unregistered channels go away.
    pub fn part(&self, client: &Client, name: &str, mapping: Casemapping) -> bool {
        let Ok(cf) = casemap::casefold_channel(name, mapping) else {
            return false;
        };
        let Some(channel) = self.channels.get(&cf).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        let removed = channel.remove_member(client.id);
        self.drop_if_empty(&channel);
        removed
    }

    /// Remove `client` from every channel. Returns the channels it left.
    pub fn remove_client(&self, client: &Client) -> Vec<Arc<Channel>> {
        let mut left = Vec::new();
        for channel in self.all() {
            if channel.remove_member(client.id) {
                self.drop_if_empty(&channel);
                left.push(channel);
            }
        }
        left
    }

    fn drop_if_empty(&self, channel: &Channel) {
        if !channel.is_registered() {
            self.channels
                .remove_if(&channel.name_casefolded, |_, c| c.member_count() == 0 && !c.is_registered());
        }
    }

    /// Materialize registered channels loaded from the datastore.
    pub fn load_registered(
        &self,
        registered: &[RegisteredChannel],
        mapping: Casemapping,
        history_length: usize,
    ) -> usize {
        let mut loaded = 0;
        for record in registered {
            let Ok(cf) = casemap::casefold_channel(&record.name, mapping) else {
                tracing::warn!(channel = %record.name, "Skipping registered channel with invalid name");
                continue;
            };
            let channel = self
                .channels
                .entry(cf.clone())
                .or_insert_with(|| Channel::new(&record.name, &cf, history_length))
                .clone();
            channel.apply_registration(record);
            loaded += 1;
        }
        loaded
    }

    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|c| Arc::clone(c.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channels passing the LIST filter, sorted by name.
    pub fn list(&self, matcher: Option<&ElistMatcher>) -> Vec<Arc<Channel>> {
        let mut channels: Vec<_> = self
            .all()
            .into_iter()
            .filter(|c| matcher.is_none_or(|m| m.matches(c)))
            .collect();
        channels.sort_by(|a, b| a.name_casefolded.cmp(&b.name_casefolded));
        channels
    }

    pub fn resize_history(&self, length: usize) {
        for channel in self.channels.iter() {
            channel.history().resize(length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::client::ClientIdentity;
    use chrono::Utc;

    fn client() -> Arc<Client> {
        Client::new(ClientIdentity::default(), "192.0.2.1".parse().unwrap(), 8)
    }

    #[test]
    fn join_part_lifecycle() {
        let manager = ChannelManager::new();
        let alice = client();
        let (channel, added) = manager.join(&alice, "#Rust", Casemapping::Ascii, 16).unwrap();
        assert!(added);
        assert_eq!(channel.name_casefolded, "#rust");
        assert!(manager.get("#RUST", Casemapping::Ascii).is_some());

        assert!(manager.part(&alice, "#rust", Casemapping::Ascii));
        assert!(manager.get("#rust", Casemapping::Ascii).is_none());
        assert!(manager.join(&alice, "rust", Casemapping::Ascii, 16).is_err());
    }

    #[test]
    fn registered_channels_persist_when_empty() {
        let manager = ChannelManager::new();
        let loaded = manager.load_registered(
            &[RegisteredChannel {
                name: "#home".into(),
                registered_at: Utc::now(),
                history: None,
            }],
            Casemapping::Ascii,
            16,
        );
        assert_eq!(loaded, 1);
        let alice = client();
        manager.join(&alice, "#home", Casemapping::Ascii, 16).unwrap();
        assert_eq!(manager.remove_client(&alice).len(), 1);
        let channel = manager.get("#home", Casemapping::Ascii).unwrap();
        assert!(channel.is_registered());
    }

    #[test]
    fn list_and_resize() {
        let manager = ChannelManager::new();
        let (a, b) = (client(), client());
        manager.join(&a, "#big", Casemapping::Ascii, 16).unwrap();
        manager.join(&b, "#big", Casemapping::Ascii, 16).unwrap();
        manager.join(&a, "#small", Casemapping::Ascii, 16).unwrap();

        let matcher = ElistMatcher::parse(">1").unwrap();
        let names: Vec<_> = manager
            .list(Some(&matcher))
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, ["#big"]);
        assert_eq!(manager.list(None).len(), 2);

        manager.resize_history(4);
        assert!(manager.all().iter().all(|c| c.history().capacity() == 4));
    }
}
