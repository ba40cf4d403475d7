//! Client state.
//!
//! A [`Client`] is a registered (or registering) identity. It owns one or
//! more [`Session`]s under multiclient, and its own direct-message history
//! buffer. All mutable fields sit behind one client-tier lock; a thread
//! holding it may still take a session lock, never the reverse.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::lock_order::{LockTier, TieredMutex};
use super::session::{Session, SessionId};
use crate::config::Config;
use crate::history::{self, Buffer, HistoryStatus};
use crate::proto::Message;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// The logged-in account of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub name: String,
    pub name_casefolded: String,
    pub registered_at: DateTime<Utc>,
    /// Reattaching to this account needs TLS.
    pub require_secure: bool,
    pub history: Option<HistoryStatus>,
    pub always_on: Option<bool>,
    pub multiclient: Option<bool>,
}

/// Identity fields fixed at registration.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub nick: String,
    pub nick_casefolded: String,
    pub username: String,
    pub realname: String,
    pub hostname: String,
}

#[derive(Debug, Default)]
struct ClientDetails {
    identity: ClientIdentity,
    account: Option<AccountInfo>,
    modes: BTreeSet<char>,
    registered: bool,
    oper: Option<String>,
    always_on: bool,
    sessions: Vec<Arc<Session>>,
}

#[derive(Debug)]
pub struct Client {
    pub id: u64,
    pub ip: IpAddr,
    pub ctime: DateTime<Utc>,
    details: TieredMutex<ClientDetails>,
    history: Arc<Buffer>,
}

impl Client {
    pub fn new(identity: ClientIdentity, ip: IpAddr, history_length: usize) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            ip,
            ctime: Utc::now(),
            details: TieredMutex::new(
                LockTier::Client,
                ClientDetails {
                    identity,
                    ..Default::default()
                },
            ),
            history: Arc::new(Buffer::new(history_length)),
        })
    }

    pub fn nick(&self) -> String {
        self.details.lock().identity.nick.clone()
    }

    pub fn nick_casefolded(&self) -> String {
        self.details.lock().identity.nick_casefolded.clone()
    }

    pub fn identity(&self) -> ClientIdentity {
        self.details.lock().identity.clone()
    }

    pub fn set_nick(&self, nick: &str, nick_casefolded: &str) {
        let mut details = self.details.lock();
        details.identity.nick = nick.to_string();
        details.identity.nick_casefolded = nick_casefolded.to_string();
    }

    /// `nick!user@host`.
    pub fn nickmask(&self) -> String {
        let details = self.details.lock();
        let id = &details.identity;
        format!("{}!{}@{}", id.nick, id.username, id.hostname)
    }

    /// Every mask a K-line may match: by hostname and by IP.
    pub fn nickmasks(&self) -> Vec<String> {
        let details = self.details.lock();
        let id = &details.identity;
        let mut masks = vec![format!("{}!{}@{}", id.nick, id.username, id.hostname)];
        let ip = self.ip.to_string();
        if ip != id.hostname {
            masks.push(format!("{}!{}@{}", id.nick, id.username, ip));
        }
        masks
    }

    pub fn account(&self) -> Option<AccountInfo> {
        self.details.lock().account.clone()
    }

    /// Account name, or `*` when not logged in.
    pub fn account_name(&self) -> String {
        self.details
            .lock()
            .account
            .as_ref()
            .map_or_else(|| "*".to_string(), |a| a.name.clone())
    }

    pub fn set_account(&self, account: Option<AccountInfo>) {
        self.details.lock().account = account;
    }

    /// Earliest instant this client may read history from: its account
    /// registration, or its connection time when not logged in.
    pub fn history_cutoff(&self) -> DateTime<Utc> {
        self.details
            .lock()
            .account
            .as_ref()
            .map_or(self.ctime, |a| a.registered_at)
    }

    /// Where this client's direct messages are kept, and the persistent
    /// target key.
    pub fn history_status(&self, config: &Config) -> (HistoryStatus, String) {
        let details = self.details.lock();
        match &details.account {
            Some(account) => (
                history::client_status(&config.history, true, account.history),
                account.name_casefolded.clone(),
            ),
            None => (history::client_status(&config.history, false, None), String::new()),
        }
    }

    pub fn history(&self) -> &Arc<Buffer> {
        &self.history
    }

    pub fn has_mode(&self, mode: char) -> bool {
        self.details.lock().modes.contains(&mode)
    }

    /// Returns whether the mode changed.
    pub fn set_mode(&self, mode: char, on: bool) -> bool {
        let mut details = self.details.lock();
        if on {
            details.modes.insert(mode)
        } else {
            details.modes.remove(&mode)
        }
    }

    /// `+` followed by the mode letters, e.g. `+iw`.
    pub fn mode_string(&self) -> String {
        let details = self.details.lock();
        let mut s = String::with_capacity(details.modes.len() + 1);
        s.push('+');
        s.extend(details.modes.iter());
        s
    }

    pub fn is_registered(&self) -> bool {
        self.details.lock().registered
    }

    pub fn set_registered(&self) {
        self.details.lock().registered = true;
    }

    pub fn oper(&self) -> Option<String> {
        self.details.lock().oper.clone()
    }

    pub fn set_oper(&self, name: Option<String>) {
        let mut details = self.details.lock();
        if name.is_some() {
            details.modes.insert('o');
        } else {
            details.modes.remove(&'o');
        }
        details.oper = name;
    }

    pub fn is_always_on(&self) -> bool {
        self.details.lock().always_on
    }

    pub fn set_always_on(&self, always_on: bool) {
        self.details.lock().always_on = always_on;
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.details.lock().sessions.clone()
    }

    pub fn add_session(&self, session: Arc<Session>) {
        let mut details = self.details.lock();
        if !details.sessions.iter().any(|s| s.id == session.id) {
            details.sessions.push(session);
        }
    }

    /// Detach a session. Returns whether it was attached and how many
    /// remain.
    pub fn remove_session(&self, id: SessionId) -> (bool, usize) {
        let mut details = self.details.lock();
        let before = details.sessions.len();
        details.sessions.retain(|s| s.id != id);
        (details.sessions.len() != before, details.sessions.len())
    }

    /// Send to every attached session.
    pub fn send(&self, message: &Message) {
        for session in self.sessions() {
            session.send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::SessionInfo;

    fn client() -> Arc<Client> {
        Client::new(
            ClientIdentity {
                nick: "Alice".into(),
                nick_casefolded: "alice".into(),
                username: "al".into(),
                realname: "Alice".into(),
                hostname: "host.example".into(),
            },
            "192.0.2.1".parse().unwrap(),
            16,
        )
    }

    #[test]
    fn nickmasks_cover_host_and_ip() {
        let c = client();
        assert_eq!(
            c.nickmasks(),
            vec!["Alice!al@host.example", "Alice!al@192.0.2.1"]
        );
        assert_eq!(c.nickmask(), "Alice!al@host.example");
    }

    #[test]
    fn history_cutoff_prefers_account_registration() {
        let c = client();
        assert_eq!(c.history_cutoff(), c.ctime);
        let registered_at = DateTime::from_timestamp(1_000, 0).unwrap();
        c.set_account(Some(AccountInfo {
            name: "Alice".into(),
            name_casefolded: "alice".into(),
            registered_at,
            require_secure: false,
            history: None,
            always_on: None,
            multiclient: None,
        }));
        assert_eq!(c.history_cutoff(), registered_at);
        assert_eq!(c.account_name(), "Alice");
    }

    #[test]
    fn mode_string_and_oper() {
        let c = client();
        assert_eq!(c.mode_string(), "+");
        assert!(c.set_mode('i', true));
        assert!(!c.set_mode('i', true));
        c.set_oper(Some("admin".into()));
        assert_eq!(c.mode_string(), "+io");
        c.set_oper(None);
        assert_eq!(c.mode_string(), "+i");
    }

    #[test]
    fn session_attachment() {
        let c = client();
        let (s1, _r1) = Session::detached(SessionInfo::default());
        let (s2, _r2) = Session::detached(SessionInfo::default());
        c.add_session(s1.clone());
        c.add_session(s1.clone());
        c.add_session(s2.clone());
        assert_eq!(c.sessions().len(), 2);
        assert_eq!(c.remove_session(s1.id), (true, 1));
        assert_eq!(c.remove_session(s1.id), (false, 1));
    }
}
