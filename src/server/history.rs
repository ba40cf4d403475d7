//! History target resolution, forgetting and single-message deletion.
//!
//! A history request names a channel, a conversation partner, or `*` for
//! every conversation. Resolution picks the backing store (the owner's
//! in-memory buffer or the persistent store) and the cutoff before which
//! the requester may not read.

use super::Server;
use crate::casemap;
use crate::config::{Config, HistoryRestrictions};
use crate::history::{Buffer, HistoryError, HistoryStatus, Item, Sequence};
use crate::state::{Channel, Client};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a resolved query reads from. Never both.
#[derive(Debug, Clone)]
pub enum HistoryStore {
    Ephemeral(Arc<Buffer>),
    /// Persistent target key.
    Persistent(String),
}

#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub store: HistoryStore,
    /// Casefolded conversation partner; empty selects everything.
    pub correspondent: String,
    pub cutoff: Option<DateTime<Utc>>,
}

/// Kind of target a message deletion names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryTarget {
    Channel,
    Client,
}

impl HistoryTarget {
    pub fn of(target: &str) -> Self {
        if target.starts_with('#') {
            Self::Channel
        } else {
            Self::Client
        }
    }
}

/// Result of deleting one message by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(usize),
    /// Nothing matched.
    Noop,
}

/// Earliest instant readable under `restrictions`.
///
/// Conversations always enforce the registration date and never get the
/// grace period.
pub fn history_cutoff(
    restrictions: &HistoryRestrictions,
    is_channel: bool,
    registration_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut cutoff = None;
    if !restrictions.expire_time.is_zero()
        && let Ok(expire) = chrono::Duration::from_std(restrictions.expire_time)
    {
        cutoff = Some(now - expire);
    }
    if restrictions.enforce_registration_date || !is_channel {
        cutoff = Some(cutoff.map_or(registration_cutoff, |c| c.max(registration_cutoff)));
    }
    if is_channel
        && let Some(c) = cutoff
        && let Ok(grace) = chrono::Duration::from_std(restrictions.grace_period)
    {
        cutoff = Some(c - grace);
    }
    cutoff
}

impl Server {
    /// Resolve a history request to a store and cutoff.
    ///
    /// `Ok((_, None))` means there is nothing to read: the channel does
    /// not exist or history is disabled for the target.
    pub fn resolve_history(
        &self,
        provided: Option<Arc<Channel>>,
        client: &Client,
        query: &str,
    ) -> Result<(Option<Arc<Channel>>, Option<HistoryQuery>), HistoryError> {
        let config = self.config();
        let mapping = config.server.casemapping;

        let channel = match provided {
            Some(channel) => Some(channel),
            None if query.starts_with('#') => match self.channels.get(query, mapping) {
                Some(channel) => Some(channel),
                None => return Ok((None, None)),
            },
            None => None,
        };

        let (status, target, correspondent) = match &channel {
            Some(channel) => {
                if !channel.has_client(client) {
                    return Err(HistoryError::InsufficientPrivileges);
                }
                let (status, target) = channel.history_status(&config);
                (status, target, String::new())
            }
            None => {
                let (status, target) = client.history_status(&config);
                let correspondent = if query == "*" {
                    String::new()
                } else {
                    casemap::casefold_name(query, mapping)?
                };
                (status, target, correspondent)
            }
        };

        let store = match status {
            HistoryStatus::Disabled => return Ok((channel, None)),
            HistoryStatus::Ephemeral => HistoryStore::Ephemeral(match &channel {
                Some(channel) => Arc::clone(channel.history()),
                None => Arc::clone(client.history()),
            }),
            HistoryStatus::Persistent if target.is_empty() => return Ok((channel, None)),
            HistoryStatus::Persistent => HistoryStore::Persistent(target),
        };

        let cutoff = history_cutoff(
            &config.history.restrictions,
            channel.is_some(),
            client.history_cutoff(),
            Utc::now(),
        );
        Ok((
            channel,
            Some(HistoryQuery {
                store,
                correspondent,
                cutoff,
            }),
        ))
    }

    /// Resolve a history request and open a sequence over it.
    pub fn get_history_sequence(
        &self,
        provided: Option<Arc<Channel>>,
        client: &Client,
        query: &str,
    ) -> Result<(Option<Arc<Channel>>, Option<Box<dyn Sequence>>), HistoryError> {
        let (channel, resolved) = self.resolve_history(provided, client, query)?;
        let sequence = resolved.map(|q| match q.store {
            HistoryStore::Ephemeral(buffer) => buffer.make_sequence(&q.correspondent, q.cutoff),
            HistoryStore::Persistent(target) => {
                self.history_db()
                    .make_sequence(&target, &q.correspondent, q.cutoff)
            }
        });
        Ok((channel, sequence))
    }

    /// Remove everything `account` wrote, from the persistent store and
    /// from every in-memory buffer. Returns the number of buffered items
    /// removed.
    pub async fn forget_history(&self, account: &str) -> Result<usize, HistoryError> {
        if account == "*" {
            return Ok(0);
        }
        let config = self.config();
        if !config.history.enabled {
            return Ok(0);
        }

        let stored = match casemap::casefold_name(account, config.server.casemapping) {
            Ok(cf) => self.history_db().forget(&cf).await.map(|forgotten| {
                debug!(account, forgotten, "Forgot persistent history");
            }),
            Err(e) => {
                warn!(account, error = %e, "Cannot casefold account for forget");
                Ok(())
            }
        };

        // Buffers are purged even when the store fails.
        let mut removed = 0;
        if !config.history.persistent.is_fully_mandatory() {
            let by_account = |item: &Item| item.account_name == account;
            for channel in self.channels.all() {
                removed += channel.history().delete(by_account);
            }
            for client in self.clients.all_clients() {
                removed += client.history().delete(by_account);
            }
        }

        if let Err(e) = stored {
            warn!(account, error = %e, removed, "Persistent forget failed");
            return Err(e);
        }
        Ok(removed)
    }

    /// Delete one message by id from `target`'s buffer, or from the
    /// persistent store when the target keeps no in-memory history.
    /// `account` of `*` matches any author.
    pub async fn delete_message(
        &self,
        target: &str,
        msgid: &str,
        account: &str,
    ) -> Result<DeleteOutcome, HistoryError> {
        let config = self.config();
        let buffer = self.ephemeral_buffer(&config, target);

        let deleted = match buffer {
            Some(buffer) => buffer.delete(|item| {
                item.msgid == msgid && (account == "*" || item.account_name == account)
            }),
            None => usize::from(self.history_db().delete_msgid(msgid, account).await?),
        };
        Ok(if deleted == 0 {
            DeleteOutcome::Noop
        } else {
            DeleteOutcome::Deleted(deleted)
        })
    }

    fn ephemeral_buffer(&self, config: &Config, target: &str) -> Option<Arc<Buffer>> {
        if target.is_empty() {
            return None;
        }
        let mapping = config.server.casemapping;
        match HistoryTarget::of(target) {
            HistoryTarget::Channel => {
                let channel = self.channels.get(target, mapping)?;
                (channel.history_status(config).0 == HistoryStatus::Ephemeral)
                    .then(|| Arc::clone(channel.history()))
            }
            HistoryTarget::Client => {
                let client = self.clients.get(target, config)?;
                (client.history_status(config).0 == HistoryStatus::Ephemeral)
                    .then(|| Arc::clone(client.history()))
            }
        }
    }
}
