//! Monitor management state.
//!
//! This module contains the `MonitorManager` struct, which isolates all
//! MONITOR-related state.

use crate::proto::{Message, numeric};
use crate::state::client::Client;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

/// Monitor management state.
///
/// The MonitorManager holds all MONITOR-related state, including:
/// - Forward mapping: client ids to monitored nicknames
/// - Reverse mapping: nicknames to monitoring clients
#[derive(Debug, Default)]
pub struct MonitorManager {
    /// Casefolded nicknames watched by each client.
    monitors: DashMap<u64, BTreeSet<String>>,
    /// Who is watching each casefolded nickname.
    watching: DashMap<String, HashMap<u64, Weak<Client>>>,
}

impl MonitorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `nick_cf`. Fails if `client` is at `limit` entries.
    pub fn add(&self, client: &Arc<Client>, nick_cf: &str, limit: usize) -> bool {
        let mut list = self.monitors.entry(client.id).or_default();
        if !list.contains(nick_cf) && list.len() >= limit {
            return false;
        }
        list.insert(nick_cf.to_string());
        drop(list);
        self.watching
            .entry(nick_cf.to_string())
            .or_default()
            .insert(client.id, Arc::downgrade(client));
        true
    }

    pub fn remove(&self, client_id: u64, nick_cf: &str) {
        if let Some(mut list) = self.monitors.get_mut(&client_id) {
            list.remove(nick_cf);
        }
        self.unwatch(client_id, nick_cf);
    }

    /// Drop every entry for a departing client.
    pub fn clear(&self, client_id: u64) {
        if let Some((_, list)) = self.monitors.remove(&client_id) {
            for nick in list {
                self.unwatch(client_id, &nick);
            }
        }
    }

    fn unwatch(&self, client_id: u64, nick_cf: &str) {
        if let Some(mut watchers) = self.watching.get_mut(nick_cf) {
            watchers.remove(&client_id);
        }
        self.watching.remove_if(nick_cf, |_, w| w.is_empty());
    }

    pub fn list(&self, client_id: u64) -> Vec<String> {
        self.monitors
            .get(&client_id)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tell everyone watching `nick_cf` that `display` came online (730
    /// with the full nickmask) or went offline (731 with the nick).
    pub fn alert_about(&self, server_name: &str, nick_cf: &str, display: &str, online: bool) {
        let watchers: Vec<Arc<Client>> = match self.watching.get(nick_cf) {
            Some(w) => w.values().filter_map(Weak::upgrade).collect(),
            None => return,
        };
        let numeric = if online {
            numeric::RPL_MONONLINE
        } else {
            numeric::RPL_MONOFFLINE
        };
        for watcher in watchers {
            watcher.send(&Message::new(
                Some(server_name),
                numeric,
                [watcher.nick(), display.to_string()],
            ));
        }
    }
}
