//! Account management state.
//!
//! Holds the registered accounts loaded from the datastore plus the
//! indices that only exist while their feature is enabled: the nick
//! reservation index, the vhost request queue and the account
//! registration throttle.

use crate::casemap::{self, Casemapping};
use crate::config::ThrottleConfig;
use crate::history::HistoryStatus;
use crate::security::limiter::quota_for;
use crate::state::client::AccountInfo;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, RateLimiter};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// A registered account as stored in the datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub name: String,
    pub registered_at: DateTime<Utc>,
    /// Bcrypt hash for SASL PLAIN.
    pub password_hash: Option<String>,
    /// Certificate fingerprint for SASL EXTERNAL.
    pub certfp: Option<String>,
    pub vhost: Option<String>,
    pub vhost_requested: Option<String>,
    pub require_secure: bool,
    pub always_on: Option<bool>,
    pub multiclient: Option<bool>,
    pub history: Option<HistoryStatus>,
}

impl AccountRecord {
    pub fn info(&self, mapping: Casemapping) -> AccountInfo {
        AccountInfo {
            name: self.name.clone(),
            name_casefolded: casemap::fold(&self.name, mapping),
            registered_at: self.registered_at,
            require_secure: self.require_secure,
            history: self.history,
            always_on: self.always_on,
            multiclient: self.multiclient,
        }
    }
}

#[derive(Debug, Default)]
pub struct AccountManager {
    /// Accounts by casefolded name.
    accounts: DashMap<String, AccountRecord>,
    /// Reserved casefolded nick to owning casefolded account. `None` while
    /// nick reservation is off.
    nick_index: RwLock<Option<HashMap<String, String>>>,
    /// Accounts with a pending vhost request, oldest first. `None` while
    /// vhosts are off.
    vhost_queue: Mutex<Option<VecDeque<String>>>,
    register_throttle: Mutex<Option<DefaultDirectRateLimiter>>,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the in-memory account table.
    pub fn load(&self, records: Vec<AccountRecord>, mapping: Casemapping) {
        self.accounts.clear();
        for record in records {
            self.accounts
                .insert(casemap::fold(&record.name, mapping), record);
        }
    }

    pub fn get(&self, name: &str, mapping: Casemapping) -> Option<AccountRecord> {
        self.accounts
            .get(&casemap::fold(name, mapping))
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Build the nick reservation index from the account table. Each
    /// account reserves its own name.
    pub fn build_nick_index(&self) {
        let index: HashMap<String, String> = self
            .accounts
            .iter()
            .map(|r| (r.key().clone(), r.key().clone()))
            .collect();
        debug!(entries = index.len(), "Built nick reservation index");
        *self.nick_index.write() = Some(index);
    }

    pub fn clear_nick_index(&self) {
        *self.nick_index.write() = None;
    }

    /// The account that reserves `nick_cf`, if reservation is active.
    pub fn reserved_by(&self, nick_cf: &str) -> Option<String> {
        self.nick_index.read().as_ref()?.get(nick_cf).cloned()
    }

    pub fn has_nick_index(&self) -> bool {
        self.nick_index.read().is_some()
    }

    /// Collect pending vhost requests from the account table.
    pub fn init_vhost_queue(&self) {
        let mut pending: Vec<(DateTime<Utc>, String)> = self
            .accounts
            .iter()
            .filter(|r| r.vhost_requested.is_some())
            .map(|r| (r.registered_at, r.key().clone()))
            .collect();
        pending.sort();
        debug!(pending = pending.len(), "Initialized vhost request queue");
        *self.vhost_queue.lock() = Some(pending.into_iter().map(|(_, name)| name).collect());
    }

    /// Pending vhost requests, or `None` if the queue was never built.
    pub fn vhost_queue(&self) -> Option<Vec<String>> {
        self.vhost_queue
            .lock()
            .as_ref()
            .map(|q| q.iter().cloned().collect())
    }

    /// Replace the registration throttle. Any recorded attempts are lost.
    pub fn reset_register_throttle(&self, config: &ThrottleConfig) {
        let limiter = config
            .enabled
            .then(|| quota_for(config.duration, config.max_attempts))
            .flatten()
            .map(RateLimiter::direct);
        *self.register_throttle.lock() = limiter;
    }

    /// Record an account registration attempt. False when throttled.
    pub fn register_attempt_allowed(&self) -> bool {
        match self.register_throttle.lock().as_ref() {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Verify SASL PLAIN credentials.
    pub fn authenticate_plain(
        &self,
        name: &str,
        password: &str,
        mapping: Casemapping,
    ) -> Option<AccountInfo> {
        let record = self.get(name, mapping)?;
        let hash = record.password_hash.as_deref()?;
        match bcrypt::verify(password, hash) {
            Ok(true) => Some(record.info(mapping)),
            Ok(false) => None,
            Err(e) => {
                debug!(account = %name, error = %e, "Stored password hash is invalid");
                None
            }
        }
    }

    /// Find the account bound to a client certificate.
    pub fn authenticate_certfp(&self, certfp: &str, mapping: Casemapping) -> Option<AccountInfo> {
        self.accounts
            .iter()
            .find(|r| {
                r.certfp
                    .as_deref()
                    .is_some_and(|fp| !fp.is_empty() && fp.eq_ignore_ascii_case(certfp))
            })
            .map(|r| r.info(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(name: &str, secs: i64) -> AccountRecord {
        AccountRecord {
            name: name.into(),
            registered_at: DateTime::from_timestamp(secs, 0).unwrap(),
            password_hash: None,
            certfp: None,
            vhost: None,
            vhost_requested: None,
            require_secure: false,
            always_on: None,
            multiclient: None,
            history: None,
        }
    }

    #[test]
    fn nick_index_only_when_built() {
        let accounts = AccountManager::new();
        accounts.load(vec![record("Alice", 1)], Casemapping::Ascii);
        assert_eq!(accounts.reserved_by("alice"), None);
        accounts.build_nick_index();
        assert_eq!(accounts.reserved_by("alice").as_deref(), Some("alice"));
        accounts.clear_nick_index();
        assert!(!accounts.has_nick_index());
    }

    #[test]
    fn vhost_queue_orders_by_registration() {
        let accounts = AccountManager::new();
        let mut late = record("late", 20);
        late.vhost_requested = Some("late.example".into());
        let mut early = record("early", 10);
        early.vhost_requested = Some("early.example".into());
        accounts.load(vec![late, early, record("none", 5)], Casemapping::Ascii);
        assert_eq!(accounts.vhost_queue(), None);
        accounts.init_vhost_queue();
        assert_eq!(accounts.vhost_queue().unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn register_throttle_resets() {
        let accounts = AccountManager::new();
        let config = ThrottleConfig {
            enabled: true,
            duration: Duration::from_secs(600),
            max_attempts: 1,
        };
        accounts.reset_register_throttle(&config);
        assert!(accounts.register_attempt_allowed());
        assert!(!accounts.register_attempt_allowed());
        accounts.reset_register_throttle(&config);
        assert!(accounts.register_attempt_allowed());
        accounts.reset_register_throttle(&ThrottleConfig {
            enabled: false,
            ..config
        });
        assert!(accounts.register_attempt_allowed());
        assert!(accounts.register_attempt_allowed());
    }

    #[test]
    fn plain_and_external() {
        let accounts = AccountManager::new();
        let mut alice = record("Alice", 1);
        alice.password_hash = Some(bcrypt::hash("hunter2", 4).unwrap());
        alice.certfp = Some("ABCDEF".into());
        accounts.load(vec![alice], Casemapping::Ascii);

        let info = accounts
            .authenticate_plain("alice", "hunter2", Casemapping::Ascii)
            .unwrap();
        assert_eq!(info.name, "Alice");
        assert_eq!(info.name_casefolded, "alice");
        assert!(accounts
            .authenticate_plain("alice", "wrong", Casemapping::Ascii)
            .is_none());
        assert!(accounts
            .authenticate_certfp("abcdef", Casemapping::Ascii)
            .is_some());
        assert!(accounts.authenticate_certfp("", Casemapping::Ascii).is_none());
    }
}
