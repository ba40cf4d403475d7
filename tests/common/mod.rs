//! Shared harness for in-process server tests.
//!
//! Servers are built with a recording listener factory and a resolver
//! that never answers, so nothing touches the network. Sessions are
//! detached: their outbound lines land in a channel the test drains.

#![allow(dead_code)]

use async_trait::async_trait;
use lattice_ircd::config::{Config, ListenerConfig};
use lattice_ircd::history::PersistentHistory;
use lattice_ircd::network::{HostnameResolver, IrcListener, ListenerError, ListenerFactory};
use lattice_ircd::proto::Message;
use lattice_ircd::server::Server;
use lattice_ircd::state::{Outbound, Session, SessionInfo};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Records every listener started and stopped.
#[derive(Default)]
pub struct RecordingFactory {
    pub started: Mutex<Vec<String>>,
    pub stopped: Arc<Mutex<Vec<String>>>,
    pub failing: Mutex<HashSet<String>>,
}

struct RecordedListener {
    address: String,
    stopped: Arc<Mutex<Vec<String>>>,
}

impl IrcListener for RecordedListener {
    fn address(&self) -> &str {
        &self.address
    }

    fn reload(&self, _config: &ListenerConfig) -> Result<(), ListenerError> {
        Ok(())
    }

    fn stop(&self) {
        self.stopped.lock().push(self.address.clone());
    }
}

impl ListenerFactory for RecordingFactory {
    fn create(
        &self,
        address: &str,
        _config: &ListenerConfig,
        _server: Weak<Server>,
    ) -> Result<Box<dyn IrcListener>, ListenerError> {
        if self.failing.lock().contains(address) {
            return Err(ListenerError::Other(format!("cannot bind {address}")));
        }
        self.started.lock().push(address.to_string());
        Ok(Box::new(RecordedListener {
            address: address.to_string(),
            stopped: Arc::clone(&self.stopped),
        }))
    }
}

/// Resolver with no answers.
pub struct NoDns;

#[async_trait]
impl HostnameResolver for NoDns {
    async fn lookup(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

pub struct TestServer {
    pub server: Arc<Server>,
    pub factory: Arc<RecordingFactory>,
    pub dir: TempDir,
}

/// Config text with the datastore inside `dir`, followed by `extra`.
pub fn config_text(dir: &TempDir, extra: &str) -> String {
    format!(
        "[server]\nname = \"irc.test\"\nnetwork = \"TestNet\"\nlookup_hostnames = false\n\
         [server.listeners.\":6667\"]\n\
         [datastore]\npath = \"{}\"\n{extra}",
        dir.path().join("ircd.db").display()
    )
}

impl TestServer {
    pub async fn start(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let text = config_text(&dir, extra);
        Self::from_text(dir, &text).await
    }

    /// Build from complete config text; `dir` is kept alive with the server.
    pub async fn from_text(dir: TempDir, text: &str) -> Self {
        Self::build(dir, text, None).await
    }

    /// Like [`Self::start`], with `store` as the durable history.
    pub async fn with_history_store(extra: &str, store: Arc<dyn PersistentHistory>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let text = config_text(&dir, extra);
        Self::build(dir, &text, Some(store)).await
    }

    async fn build(dir: TempDir, text: &str, store: Option<Arc<dyn PersistentHistory>>) -> Self {
        let config = Config::parse(text).unwrap();
        let factory = Arc::new(RecordingFactory::default());
        let mut builder = Server::builder(config)
            .listener_factory(Arc::clone(&factory) as Arc<dyn ListenerFactory>)
            .resolver(Arc::new(NoDns));
        if let Some(store) = store {
            builder = builder.history_store(store);
        }
        let server = builder.build().await.unwrap();
        Self {
            server,
            factory,
            dir,
        }
    }

    /// A config built the same way as the running one, with `extra`.
    pub fn config(&self, extra: &str) -> Config {
        Config::parse(&config_text(&self.dir, extra)).unwrap()
    }

    pub fn connect(&self, ip: &str) -> TestSession {
        self.connect_with(SessionInfo {
            ip: Some(ip.parse().unwrap()),
            listener: ":6667".into(),
            ..Default::default()
        })
    }

    pub fn connect_with(&self, info: SessionInfo) -> TestSession {
        let (session, rx) = Session::detached(info);
        self.server.session_opened(&session);
        TestSession {
            server: Arc::clone(&self.server),
            session,
            rx,
        }
    }

    /// Connect and register `nick`, discarding the welcome burst.
    pub async fn register(&self, ip: &str, nick: &str) -> TestSession {
        let mut s = self.connect(ip);
        s.send(&format!("NICK {nick}")).await;
        s.send(&format!("USER {nick} 0 * :{nick}")).await;
        let burst = s.drain();
        assert!(
            burst.iter().any(|m| m.command == "001"),
            "{nick} did not register: {burst:?}"
        );
        s
    }
}

pub struct TestSession {
    pub server: Arc<Server>,
    pub session: Arc<Session>,
    rx: UnboundedReceiver<Outbound>,
}

impl TestSession {
    /// Feed one line through the command dispatcher. Returns the quit
    /// reason if the server ended the session.
    pub async fn send(&mut self, line: &str) -> Option<String> {
        let message = Message::parse(line).unwrap();
        self.server.handle_message(&self.session, &message).await
    }

    /// Every line queued so far.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Outbound::Line(message) = item {
                out.push(message);
            }
        }
        out
    }

    /// Whether the session was told to close.
    pub fn closed(&mut self) -> bool {
        let mut closed = false;
        while let Ok(item) = self.rx.try_recv() {
            closed |= item == Outbound::Close;
        }
        closed
    }
}

pub fn commands(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.command.as_str()).collect()
}
