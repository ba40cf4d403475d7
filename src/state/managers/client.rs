//! Client and session registry.
//!
//! The ClientManager handles:
//! - Nickname ownership (casefolded nick to client), assigned atomically
//! - Multiclient reattachment of a new session to an existing client
//! - The set of live sessions, registered or not, used for rehash fan-out
//!
//! # Thread Safety
//!
//! All operations are thread-safe via DashMap. The lock order is: DashMap
//! shard lock, then client lock, then session lock.

use crate::casemap::{self, CasefoldError};
use crate::config::Config;
use crate::state::client::Client;
use crate::state::session::{Session, SessionId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NickError {
    #[error("Nickname is already in use")]
    InUse,
    #[error("Erroneous nickname")]
    Erroneous,
    #[error("Nickname is reserved by a different account")]
    Reserved,
    #[error("You can't mix secure and insecure connections to this account")]
    InsecureReattach,
}

impl From<CasefoldError> for NickError {
    fn from(_: CasefoldError) -> Self {
        Self::Erroneous
    }
}

/// Successful nick assignment.
#[derive(Debug)]
pub enum NickAssignment {
    /// The nick now belongs to the requesting client.
    Assigned,
    /// The session joined an existing client that already owned the nick.
    Reattached(Arc<Client>),
}

#[derive(Debug, Default)]
pub struct ClientManager {
    /// Clients by casefolded nick.
    by_nick: DashMap<String, Arc<Client>>,
    /// Every open session.
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `nick` to `client`, or reattach `session` to the client that
    /// already holds it when both are logged into the same account and
    /// multiclient is allowed. `reserved_by` is the casefolded account
    /// that owns the nick under nick reservation, if any.
    pub fn assign_nick(
        &self,
        client: &Arc<Client>,
        session: &Arc<Session>,
        nick: &str,
        reserved_by: Option<&str>,
        config: &Config,
    ) -> Result<NickAssignment, NickError> {
        if nick.len() > config.limits.nicklen {
            return Err(NickError::Erroneous);
        }
        let cf = casemap::casefold_name(nick, config.server.casemapping)?;
        let account = client.account();

        if let Some(owner) = reserved_by
            && account.as_ref().is_none_or(|a| a.name_casefolded != owner)
        {
            return Err(NickError::Reserved);
        }

        match self.by_nick.entry(cf.clone()) {
            Entry::Vacant(slot) => {
                let old = client.nick_casefolded();
                client.set_nick(nick, &cf);
                // Drop the shard guard before touching the old nick's shard.
                drop(slot.insert(Arc::clone(client)));
                if !old.is_empty() && old != cf {
                    self.by_nick.remove_if(&old, |_, c| c.id == client.id);
                }
                Ok(NickAssignment::Assigned)
            }
            Entry::Occupied(slot) => {
                let existing = slot.get();
                if existing.id == client.id {
                    client.set_nick(nick, &cf);
                    return Ok(NickAssignment::Assigned);
                }
                let Some(account) = account else {
                    return Err(NickError::InUse);
                };
                let same_account = existing
                    .account()
                    .is_some_and(|a| a.name_casefolded == account.name_casefolded);
                let multiclient = config
                    .accounts
                    .multiclient
                    .is_multiclient_enabled(account.multiclient);
                if !same_account || !multiclient || !existing.is_registered() {
                    return Err(NickError::InUse);
                }
                if account.require_secure && !session.is_tls {
                    return Err(NickError::InsecureReattach);
                }
                existing.add_session(Arc::clone(session));
                Ok(NickAssignment::Reattached(Arc::clone(existing)))
            }
        }
    }

    /// Nick change for a registered client. Unlike [`assign_nick`], a nick
    /// held by another client is always in use.
    ///
    /// [`assign_nick`]: Self::assign_nick
    pub fn change_nick(
        &self,
        client: &Arc<Client>,
        nick: &str,
        reserved_by: Option<&str>,
        config: &Config,
    ) -> Result<(), NickError> {
        if nick.len() > config.limits.nicklen {
            return Err(NickError::Erroneous);
        }
        let cf = casemap::casefold_name(nick, config.server.casemapping)?;
        if let Some(owner) = reserved_by
            && client.account().is_none_or(|a| a.name_casefolded != owner)
        {
            return Err(NickError::Reserved);
        }
        match self.by_nick.entry(cf.clone()) {
            Entry::Vacant(slot) => {
                let old = client.nick_casefolded();
                client.set_nick(nick, &cf);
                drop(slot.insert(Arc::clone(client)));
                if old != cf {
                    self.by_nick.remove_if(&old, |_, c| c.id == client.id);
                }
                Ok(())
            }
            Entry::Occupied(slot) if slot.get().id == client.id => {
                client.set_nick(nick, &cf);
                Ok(())
            }
            Entry::Occupied(_) => Err(NickError::InUse),
        }
    }

    /// Insert a client restored from the datastore under its stored nick.
    /// Fails if the nick is already taken.
    pub fn insert_restored(&self, client: &Arc<Client>) -> bool {
        match self.by_nick.entry(client.nick_casefolded()) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(client));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Release the nick held by `client`.
    pub fn remove(&self, client: &Client) -> bool {
        let cf = client.nick_casefolded();
        self.by_nick.remove_if(&cf, |_, c| c.id == client.id).is_some()
    }

    pub fn get(&self, nick: &str, config: &Config) -> Option<Arc<Client>> {
        let cf = casemap::casefold_name(nick, config.server.casemapping).ok()?;
        self.by_nick.get(&cf).map(|c| Arc::clone(c.value()))
    }

    pub fn all_clients(&self) -> Vec<Arc<Client>> {
        self.by_nick.iter().map(|c| Arc::clone(c.value())).collect()
    }

    /// Registered clients only.
    pub fn registered_clients(&self) -> Vec<Arc<Client>> {
        self.all_clients()
            .into_iter()
            .filter(|c| c.is_registered())
            .collect()
    }

    pub fn add_session(&self, session: Arc<Session>) {
        self.sessions.insert(session.id, session);
    }

    pub fn remove_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    /// A point-in-time copy of every open session.
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| Arc::clone(s.value())).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn resize_history(&self, length: usize) {
        for client in self.all_clients() {
            client.history().resize(length);
        }
    }
}
