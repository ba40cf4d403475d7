//! Live configuration rehash.
//!
//! ```text
//!  load ─▶ immutable check ─▶ logging, limits, help ─▶ feature toggles,
//!  history sizes, throttle ─▶ datastore / history store ─▶ SWAP
//!                                                            │
//!      diagnostics ◀── ISUPPORT push ◀── listeners ◀── CAP DEL/NEW
//! ```
//!
//! Everything before the swap aborts the rehash on error and leaves the
//! previous snapshot in force. Everything after it is best effort:
//! listener failures are collected and reported, never rolled back.
//!
//! The rehash lock serializes callers and ranks above every tiered lock.

use super::Server;
use crate::caps::{CapValues, CapVersion, Capability, CapabilityDiff};
use crate::casemap;
use crate::config::{
    Config, ConfigError, ImmutableField, ValidationError, check_immutable,
};
use crate::db::{Datastore, DbError};
use crate::handlers::burst::RAW_IO_NOTICE;
use crate::history::{HistoryError, NoopHistory, PersistentHistory, RedbHistory};
use crate::http::DiagnosticsServer;
use crate::logging::LogError;
use crate::metrics;
use crate::network::ListenerError;
use crate::proto::{Message, numeric};
use crate::state::lock_order;
use crate::state::{Client, ClientIdentity, Session};
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RehashError {
    #[error("no configuration file to reload")]
    NoConfigPath,
    #[error("{0}")]
    Load(ConfigError),
    #[error("invalid config: {}", join(.0))]
    Validation(Vec<ValidationError>),
    #[error("{0}")]
    Immutable(#[from] ImmutableField),
    #[error("logging: {0}")]
    Logging(#[from] LogError),
    #[error("datastore: {0}")]
    Datastore(#[from] DbError),
    #[error("history store: {0}")]
    History(#[from] HistoryError),
    #[error("failed to start listeners: {}", join_listeners(.0))]
    Listeners(Vec<(String, ListenerError)>),
}

impl From<ConfigError> for RehashError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(errors) => Self::Validation(errors),
            other => Self::Load(other),
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_listeners(failures: &[(String, ListenerError)]) -> String {
    failures
        .iter()
        .map(|(addr, e)| format!("{addr}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Server {
    /// Reload the config file and apply it.
    pub async fn rehash(self: &Arc<Self>) -> Result<(), RehashError> {
        lock_order::assert_none_held();
        let _guard = self.rehash_lock.lock().await;
        info!("Rehashing");
        let result = match &self.config_path {
            Some(path) => match Config::load(path) {
                Ok(config) => self.apply_config_locked(config, false).await,
                Err(e) => Err(e.into()),
            },
            None => Err(RehashError::NoConfigPath),
        };
        finish(&result);
        result
    }

    /// Apply an already loaded snapshot exactly as a rehash would.
    pub async fn apply_config(self: &Arc<Self>, config: Config) -> Result<(), RehashError> {
        lock_order::assert_none_held();
        let _guard = self.rehash_lock.lock().await;
        let result = self.apply_config_locked(config, false).await;
        finish(&result);
        result
    }

    pub(super) async fn apply_initial_config(self: &Arc<Self>, config: Config) -> Result<(), RehashError> {
        let _guard = self.rehash_lock.lock().await;
        self.apply_config_locked(config, true).await
    }

    async fn apply_config_locked(self: &Arc<Self>, new: Config, initial: bool) -> Result<(), RehashError> {
        let old = (!initial).then(|| self.config());
        if let Some(old) = &old {
            check_immutable(old, &new)?;
        }

        let was_raw = self.logging.is_logging_raw_io();
        self.logging.apply_config(&new.logging)?;
        let now_raw = self.logging.is_logging_raw_io();

        self.admission
            .apply_config(&new.server.ip_limits, &new.server.tor_listeners);
        self.help.generate_indices(&new.languages);

        match &old {
            Some(old) => {
                self.apply_feature_toggles(old, &new).await?;
                self.update_history_store(old, &new)?;
            }
            None => self.load_datastore(&new).await?,
        }

        self.config.store(Arc::new(new));
        let new = self.config();
        info!(server = %new.server.name, initial, "Configuration applied");

        if let Some(old) = &old {
            self.broadcast_cap_diff(old, &new);
        }
        let failures = self.reconcile_listeners(&new);
        if let Some(old) = &old {
            self.push_isupport_diff(old, &new);
            if !was_raw && now_raw {
                self.notify_raw_io(&new);
            }
        }
        self.reconcile_diagnostics(&new);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RehashError::Listeners(failures))
        }
    }

    /// Build what newly enabled features need and resize history buffers.
    async fn apply_feature_toggles(&self, old: &Config, new: &Config) -> Result<(), RehashError> {
        match (
            old.accounts.nick_reservation.enabled,
            new.accounts.nick_reservation.enabled,
        ) {
            (false, true) => self.accounts.build_nick_index(),
            (true, false) => self.accounts.clear_nick_index(),
            _ => {}
        }
        if !old.accounts.vhosts.enabled && new.accounts.vhosts.enabled {
            self.accounts.init_vhost_queue();
        }
        if !old.channels.registration.enabled
            && new.channels.registration.enabled
            && let Some(store) = self.datastore.get()
        {
            let registered = store.load_channels().await?;
            let loaded = self.channels.load_registered(
                &registered,
                new.server.casemapping,
                new.history.channel_length,
            );
            info!(count = loaded, "Loaded registered channels");
        }

        if old.history.channel_length != new.history.channel_length {
            self.channels.resize_history(new.history.channel_length);
        }
        if old.history.client_length != new.history.client_length {
            self.clients.resize_history(new.history.client_length);
        }
        if old.accounts.registration.throttling != new.accounts.registration.throttling {
            self.accounts
                .reset_register_throttle(&new.accounts.registration.throttling);
        }
        Ok(())
    }

    /// First application only: open the datastore and load what it holds.
    async fn load_datastore(&self, config: &Config) -> Result<(), RehashError> {
        let mapping = config.server.casemapping;
        let store = Datastore::open(&config.datastore.path).await?;

        let bans = store.load_bans().await?;
        info!(count = bans.len(), "Loaded bans");
        self.bans.load(bans);
        self.bans.set_persistence(store.spawn_ban_writer());

        let accounts = store.load_accounts().await?;
        info!(count = accounts.len(), "Loaded accounts");
        self.accounts.load(accounts, mapping);
        if config.accounts.nick_reservation.enabled {
            self.accounts.build_nick_index();
        }
        if config.accounts.vhosts.enabled {
            self.accounts.init_vhost_queue();
        }
        self.accounts
            .reset_register_throttle(&config.accounts.registration.throttling);

        if config.channels.registration.enabled {
            let registered = store.load_channels().await?;
            let loaded =
                self.channels
                    .load_registered(&registered, mapping, config.history.channel_length);
            info!(count = loaded, "Loaded registered channels");
        }

        self.restore_always_on(&store, config).await?;

        let history: Arc<dyn PersistentHistory> = if config.history.persistent.enabled {
            Arc::new(RedbHistory::open(
                &config.history.persistent.path,
                &config.history.persistent,
            )?)
        } else {
            Arc::new(NoopHistory)
        };
        *self.history_db.write() = history;

        if self.datastore.set(store).is_err() {
            warn!("Datastore was already open");
        }
        Ok(())
    }

    async fn restore_always_on(&self, store: &Datastore, config: &Config) -> Result<(), RehashError> {
        let mapping = config.server.casemapping;
        let mut restored = 0;
        for record in store.load_always_on().await? {
            let Some(account) = self.accounts.get(&record.account, mapping) else {
                warn!(account = %record.account, "Always-on client for unknown account");
                continue;
            };
            let info = account.info(mapping);
            if !config.accounts.multiclient.is_always_on_enabled(info.always_on) {
                continue;
            }
            let Ok(nick_casefolded) = casemap::casefold_name(&record.nick, mapping) else {
                warn!(nick = %record.nick, "Always-on client with invalid nick");
                continue;
            };
            let client = Client::new(
                ClientIdentity {
                    nick: record.nick.clone(),
                    nick_casefolded,
                    username: record.username,
                    realname: record.realname,
                    hostname: record.hostname,
                },
                Ipv4Addr::UNSPECIFIED.into(),
                config.history.client_length,
            );
            client.set_account(Some(info));
            // Operator status is not persisted.
            for mode in record.modes.chars().filter(|m| !matches!(m, '+' | 'o')) {
                client.set_mode(mode, true);
            }
            client.set_always_on(true);
            client.set_registered();
            if !self.clients.insert_restored(&client) {
                warn!(nick = %record.nick, "Nick already taken, always-on client dropped");
                continue;
            }
            self.stats.add();
            self.stats.register(client.has_mode('i'));
            restored += 1;
        }
        if restored > 0 {
            info!(count = restored, "Restored always-on clients");
        }
        Ok(())
    }

    fn update_history_store(&self, old: &Config, new: &Config) -> Result<(), RehashError> {
        let (before, after) = (&old.history.persistent, &new.history.persistent);
        if before == after {
            return Ok(());
        }
        if !after.enabled {
            *self.history_db.write() = Arc::new(NoopHistory);
            info!("Persistent history disabled");
        } else if !before.enabled || before.path != after.path {
            let store = RedbHistory::open(&after.path, after)?;
            *self.history_db.write() = Arc::new(store);
            info!(path = %after.path, "Persistent history opened");
        } else {
            self.history_db().set_config(after);
        }
        Ok(())
    }

    /// CAP DEL then CAP NEW to every session subscribed to cap-notify, in
    /// the syntax of its own negotiation version.
    fn broadcast_cap_diff(&self, old: &Config, new: &Config) {
        let diff = CapabilityDiff::between(
            &old.derived.supported_caps,
            &old.derived.cap_values,
            &new.derived.supported_caps,
            &new.derived.cap_values,
        );
        if diff.is_empty() {
            return;
        }

        let subscribers: Vec<Arc<Session>> = self
            .clients
            .all_sessions()
            .into_iter()
            .filter(|s| !s.sts_only && s.has_cap(Capability::CapNotify))
            .collect();
        let no_values = CapValues::new();
        for version in [CapVersion::Cap301, CapVersion::Cap302] {
            let removed = diff.removed.strings(version, &no_values).join(" ");
            let added = diff.added.strings(version, &new.derived.cap_values).join(" ");
            for session in subscribers.iter().filter(|s| s.cap_version() == version) {
                let nick = session.nick_or_star();
                if !removed.is_empty() {
                    session.send(Message::new(
                        Some(&new.server.name),
                        "CAP",
                        [nick.as_str(), "DEL", removed.as_str()],
                    ));
                }
                if !added.is_empty() {
                    session.send(Message::new(
                        Some(&new.server.name),
                        "CAP",
                        [nick.as_str(), "NEW", added.as_str()],
                    ));
                }
            }
        }
        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            subscribers = subscribers.len(),
            "Announced capability changes"
        );
    }

    /// Bring the listener table in line with the config. Returns the
    /// addresses that could not be started.
    fn reconcile_listeners(self: &Arc<Self>, config: &Config) -> Vec<(String, ListenerError)> {
        let mut failures = Vec::new();
        let mut listeners = self.listeners.lock();

        let active: Vec<String> = listeners.keys().cloned().collect();
        for address in active {
            let keep = match (config.server.listeners.get(&address), listeners.get(&address)) {
                (Some(listener_config), Some(listener)) => match listener.reload(listener_config) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(address = %address, error = %e, "Listener reload failed, recreating");
                        false
                    }
                },
                _ => false,
            };
            if !keep && let Some(listener) = listeners.remove(&address) {
                listener.stop();
            }
        }

        for (address, listener_config) in &config.server.listeners {
            if listeners.contains_key(address) {
                continue;
            }
            match self
                .listener_factory
                .create(address, listener_config, Arc::downgrade(self))
            {
                Ok(listener) => {
                    info!(address = %address, tls = listener_config.is_tls(), "Listener started");
                    listeners.insert(address.clone(), listener);
                }
                Err(e) => {
                    error!(address = %address, error = %e, "Failed to start listener");
                    failures.push((address.clone(), e));
                    continue;
                }
            }
            if address.starts_with(':')
                && !listener_config.tor
                && !listener_config.sts_only
                && !listener_config.is_tls()
            {
                warn!(
                    address = %address,
                    "Public plaintext listener; consider TLS or an STS-only listener"
                );
            }
        }
        failures
    }

    fn push_isupport_diff(&self, old: &Config, new: &Config) {
        let lines = old.derived.isupport.difference(&new.derived.isupport);
        if lines.is_empty() {
            return;
        }
        for client in self.clients.registered_clients() {
            let nick = client.nick();
            for tokens in &lines {
                let mut params = Vec::with_capacity(tokens.len() + 2);
                params.push(nick.clone());
                params.extend(tokens.iter().cloned());
                params.push("are supported by this server".to_string());
                client.send(&Message::new(
                    Some(&new.server.name),
                    numeric::RPL_ISUPPORT,
                    params,
                ));
            }
        }
    }

    fn notify_raw_io(&self, config: &Config) {
        for client in self.clients.registered_clients() {
            client.send(&Message::new(
                Some(&config.server.name),
                "NOTICE",
                [client.nick(), RAW_IO_NOTICE.to_string()],
            ));
        }
    }

    /// At most one diagnostics listener, on the configured address.
    fn reconcile_diagnostics(&self, config: &Config) {
        let wanted = config.debug.diagnostics_listener.as_deref();
        let mut current = self.diagnostics.lock();
        if let Some(running) = current.as_ref()
            && wanted != Some(running.addr())
        {
            running.stop();
            *current = None;
        }
        if current.is_none()
            && let Some(addr) = wanted
        {
            match DiagnosticsServer::start(addr) {
                Ok(server) => *current = Some(server),
                Err(e) => error!(address = %addr, error = %e, "Failed to start diagnostics listener"),
            }
        }
    }
}

fn finish(result: &Result<(), RehashError>) {
    metrics::record_rehash(result.is_ok());
    match result {
        Ok(()) => info!("Rehash completed successfully"),
        Err(e) => error!(error = %e, "Rehash failed"),
    }
}
