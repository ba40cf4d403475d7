//! The central server object.
//!
//! [`Server`] owns the current config snapshot, the listener table, the
//! ban store and admission control, the client/channel/account managers,
//! the datastore and the persistent history store. Connection tasks reach
//! everything through an `Arc<Server>`.
//!
//! Configuration is read through an [`ArcSwap`], so readers never lock;
//! the rehash coordinator in [`rehash`] is the only writer.

mod history;
mod rehash;

pub use history::{DeleteOutcome, HistoryQuery, HistoryStore, HistoryTarget};
pub use rehash::RehashError;

use crate::config::Config;
use crate::db::{Datastore, StoredClient};
use crate::handlers::{Context, Registry};
use crate::history::{NoopHistory, PersistentHistory};
use crate::http::DiagnosticsServer;
use crate::logging::LogManager;
use crate::metrics;
use crate::network::{DnsResolver, HostnameResolver, IrcListener, ListenerFactory, TcpListenerFactory};
use crate::proto::Message;
use crate::security::{AdmissionControl, AdmissionDecision, BanStore};
use crate::state::lock_order::{LockTier, TieredMutex};
use crate::state::managers::{
    AccountManager, ChannelManager, ClientManager, HelpIndexManager, MonitorManager,
    ResumeManager, StatsManager,
};
use crate::state::{Client, Session};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

pub struct Server {
    config: ArcSwap<Config>,
    config_path: Option<PathBuf>,
    /// Process start, reported in RPL_CREATED.
    pub created: DateTime<Utc>,
    /// Serializes rehashes. Ranks above every [`TieredMutex`].
    rehash_lock: tokio::sync::Mutex<()>,
    listeners: TieredMutex<BTreeMap<String, Box<dyn IrcListener>>>,
    diagnostics: Mutex<Option<DiagnosticsServer>>,
    pub bans: Arc<BanStore>,
    pub admission: AdmissionControl,
    pub clients: ClientManager,
    pub channels: ChannelManager,
    pub accounts: AccountManager,
    pub monitor: MonitorManager,
    pub stats: StatsManager,
    pub help: HelpIndexManager,
    pub resume: ResumeManager,
    logging: LogManager,
    datastore: OnceLock<Datastore>,
    history_db: RwLock<Arc<dyn PersistentHistory>>,
    resolver: Arc<dyn HostnameResolver>,
    listener_factory: Arc<dyn ListenerFactory>,
    registry: Registry,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.config.load().server.name)
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: Config,
    config_path: Option<PathBuf>,
    listener_factory: Option<Arc<dyn ListenerFactory>>,
    resolver: Option<Arc<dyn HostnameResolver>>,
    logging: Option<LogManager>,
    history_store: Option<Arc<dyn PersistentHistory>>,
}

impl ServerBuilder {
    /// File re-read by [`Server::rehash`].
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn listener_factory(mut self, factory: Arc<dyn ListenerFactory>) -> Self {
        self.listener_factory = Some(factory);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn HostnameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn logging(mut self, logging: LogManager) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Durable history store used in place of the configured redb file.
    pub fn history_store(mut self, store: Arc<dyn PersistentHistory>) -> Self {
        self.history_store = Some(store);
        self
    }

    /// Create the server and apply its first configuration: open the
    /// datastore, load persisted state and bind listeners.
    pub async fn build(self) -> Result<Arc<Server>, RehashError> {
        let bans = Arc::new(BanStore::new());
        let server = Arc::new(Server {
            config: ArcSwap::from_pointee(self.config.clone()),
            config_path: self.config_path,
            created: Utc::now(),
            rehash_lock: tokio::sync::Mutex::new(()),
            listeners: TieredMutex::new(LockTier::ListenerTable, BTreeMap::new()),
            diagnostics: Mutex::new(None),
            admission: AdmissionControl::new(Arc::clone(&bans)),
            bans,
            clients: ClientManager::new(),
            channels: ChannelManager::new(),
            accounts: AccountManager::new(),
            monitor: MonitorManager::new(),
            stats: StatsManager::new(),
            help: HelpIndexManager::new(),
            resume: ResumeManager::new(),
            logging: self.logging.unwrap_or_else(LogManager::detached),
            datastore: OnceLock::new(),
            history_db: RwLock::new(Arc::new(NoopHistory)),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(DnsResolver::new())),
            listener_factory: self
                .listener_factory
                .unwrap_or_else(|| Arc::new(TcpListenerFactory)),
            registry: Registry::new(),
            shutdown: CancellationToken::new(),
        });
        server.apply_initial_config(self.config).await?;
        if let Some(store) = self.history_store {
            *server.history_db.write() = store;
        }
        Ok(server)
    }
}

impl Server {
    pub fn builder(config: Config) -> ServerBuilder {
        ServerBuilder {
            config,
            config_path: None,
            listener_factory: None,
            resolver: None,
            logging: None,
            history_store: None,
        }
    }

    /// The current config snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn config_path(&self) -> Option<&std::path::Path> {
        self.config_path.as_deref()
    }

    pub fn logging(&self) -> &LogManager {
        &self.logging
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn resolver(&self) -> &Arc<dyn HostnameResolver> {
        &self.resolver
    }

    pub fn datastore(&self) -> Option<&Datastore> {
        self.datastore.get()
    }

    pub fn history_db(&self) -> Arc<dyn PersistentHistory> {
        self.history_db.read().clone()
    }

    /// Addresses of the running listeners.
    pub fn listener_addresses(&self) -> Vec<String> {
        self.listeners.lock().keys().cloned().collect()
    }

    /// The configured address of the running diagnostics listener.
    pub fn diagnostics_address(&self) -> Option<String> {
        self.diagnostics
            .lock()
            .as_ref()
            .map(|d| d.addr().to_string())
    }

    /// Admission control for a freshly accepted socket.
    pub fn admit(&self, ip: IpAddr, is_tor: bool) -> AdmissionDecision {
        let decision = if is_tor {
            self.admission.check_tor_connection()
        } else {
            self.admission.check_connection(ip)
        };
        if !decision.is_rejected() {
            metrics::record_accept();
        }
        decision
    }

    /// Drop lapsed bans and idle throttle windows.
    pub fn prune_expired(&self) {
        let (bans, throttles) = self.admission.prune();
        if bans > 0 || throttles > 0 {
            info!(bans, throttles, "Expired admission state pruned");
        }
    }

    /// Periodic pruning until shutdown.
    fn spawn_maintenance(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => server.prune_expired(),
                    _ = server.shutdown.cancelled() => break,
                }
            }
        });
    }

    /// A session passed admission and its transport is up.
    pub fn session_opened(&self, session: &Arc<Session>) {
        self.clients.add_session(Arc::clone(session));
        self.stats.add();
        metrics::session_opened();
        debug!(session = session.id, ip = %session.ip, listener = %session.listener, "Session opened");
    }

    /// Dispatch one inbound message. Returns the quit reason when the
    /// session must end.
    pub async fn handle_message(self: &Arc<Self>, session: &Arc<Session>, message: &Message) -> Option<String> {
        let ctx = Context::new(self, session);
        match self.registry.dispatch(&ctx, message).await {
            Ok(()) => None,
            Err(crate::error::HandlerError::Quit(reason)) => {
                let reason = reason.map_or_else(|| "Quit".to_string(), |r| format!("Quit: {r}"));
                session.quit(&reason);
                Some(reason)
            }
            Err(crate::error::HandlerError::Exited(reason)) => Some(reason),
            Err(e) => {
                if let Some(reply) =
                    e.to_irc_reply(&ctx.config.server.name, &session.nick_or_star(), &message.command)
                {
                    session.send(reply);
                }
                None
            }
        }
    }

    /// Tear down a closed session. Idempotent.
    ///
    /// The client goes away with its last session unless it is always-on.
    pub fn disconnect(&self, session: &Arc<Session>, reason: &str) {
        if self.clients.remove_session(session.id).is_none() {
            return;
        }
        self.admission.release(session.ip, session.is_tor);
        metrics::session_closed();

        let Some(client) = session.client() else {
            self.stats.remove(false, false, false);
            debug!(session = session.id, %reason, "Unregistered session closed");
            return;
        };
        let (_, remaining) = client.remove_session(session.id);
        if !client.is_registered() {
            self.clients.remove(&client);
            self.stats.remove(false, false, false);
            return;
        }
        if remaining > 0 || client.is_always_on() {
            debug!(session = session.id, nick = %client.nick(), remaining, "Session detached");
            return;
        }
        self.destroy_client(&client, reason);
    }

    fn destroy_client(&self, client: &Arc<Client>, reason: &str) {
        let config = self.config();
        self.clients.remove(client);

        let quit = Message::new(Some(&client.nickmask()), "QUIT", [reason]);
        let mut notified = HashSet::new();
        for channel in self.channels.remove_client(client) {
            for member in channel.members() {
                if notified.insert(member.id) {
                    member.send(&quit);
                }
            }
        }

        self.monitor.clear(client.id);
        self.monitor
            .alert_about(&config.server.name, &client.nick_casefolded(), &client.nick(), false);
        self.resume.forget(client.id);
        self.stats
            .remove(true, client.has_mode('i'), client.oper().is_some());
        info!(nick = %client.nick(), %reason, "Client quit");
    }

    /// Always-on clients in the form the datastore keeps them.
    fn always_on_clients(&self) -> Vec<StoredClient> {
        let now = Utc::now();
        self.clients
            .all_clients()
            .into_iter()
            .filter(|c| c.is_always_on())
            .filter_map(|client| {
                let account = client.account()?;
                let identity = client.identity();
                Some(StoredClient {
                    account: account.name,
                    nick: identity.nick,
                    username: identity.username,
                    realname: identity.realname,
                    hostname: identity.hostname,
                    modes: client.mode_string(),
                    last_seen: now,
                })
            })
            .collect()
    }

    /// Notify clients, stop accepting, persist always-on clients and close
    /// the datastore.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        let config = self.config();
        for session in self.clients.all_sessions() {
            session.send(Message::new(
                Some(&config.server.name),
                "NOTICE",
                [session.nick_or_star(), "Server is shutting down".to_string()],
            ));
        }
        self.shutdown.cancel();

        {
            let mut listeners = self.listeners.lock();
            for listener in listeners.values() {
                listener.stop();
            }
            listeners.clear();
        }
        if let Some(diagnostics) = self.diagnostics.lock().take() {
            diagnostics.stop();
        }

        if let Some(store) = self.datastore.get() {
            let stored = self.always_on_clients();
            match store.save_always_on(&stored).await {
                Ok(()) => info!(count = stored.len(), "Saved always-on clients"),
                Err(e) => error!(error = %e, "Failed to save always-on clients"),
            }
            store.close().await;
        }
    }

    /// Serve until SIGINT or SIGTERM. SIGHUP triggers a rehash.
    pub async fn run(self: &Arc<Self>) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        self.spawn_maintenance();

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!("SIGHUP received, rehashing");
                    let server = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(e) = server.rehash().await {
                            warn!(error = %e, "Rehash failed");
                        }
                    });
                }
                _ = terminate.recv() => break,
                _ = interrupt.recv() => break,
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.shutdown().await;
        Ok(())
    }
}
