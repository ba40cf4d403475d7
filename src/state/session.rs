//! Per-connection session state.
//!
//! A [`Session`] is one transport connection. Until registration finishes
//! it carries the pending fields (nick, username, realname, PASS result,
//! resume token, capability negotiation); afterwards it is attached to
//! exactly one [`Client`].
//!
//! Outbound lines go through an unbounded channel drained by the
//! connection's writer task, so sending never blocks the caller.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::client::Client;
use super::lock_order::{LockTier, TieredGuard, TieredMutex};
use crate::caps::{CapSet, CapVersion, Capability};
use crate::handlers::registration::{Readiness, RegState};
use crate::proto::Message;

pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Items queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(Message),
    /// Flush everything queued so far, then close the socket.
    Close,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PassStatus {
    #[default]
    Unsent,
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapState {
    #[default]
    None,
    Negotiating,
    Negotiated,
}

/// SASL exchange in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SaslStep {
    #[default]
    Idle,
    Plain,
    External,
}

/// Transport facts known at accept time.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub ip: Option<IpAddr>,
    pub listener: String,
    pub is_tls: bool,
    pub is_tor: bool,
    pub sts_only: bool,
    /// Hex SHA-256 of the client certificate.
    pub certfp: Option<String>,
}

/// Mutable per-session state.
#[derive(Debug, Default)]
pub struct SessionState {
    pub nick: Option<String>,
    pub username: Option<String>,
    pub realname: Option<String>,
    pub pass: PassStatus,
    pub resume_token: Option<String>,
    /// Hostname supplied out of band or already resolved.
    pub hostname: Option<String>,
    /// Account authenticated over SASL before registration.
    pub sasl_account: Option<String>,
    pub sasl: SaslStep,
    pub sasl_buffer: String,
    pub cap_state: CapState,
    pub cap_version: CapVersion,
    pub capabilities: CapSet,
    pub registration: RegState,
    pub client: Option<Arc<Client>>,
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub ip: IpAddr,
    pub listener: String,
    pub is_tls: bool,
    pub is_tor: bool,
    pub sts_only: bool,
    pub certfp: Option<String>,
    pub ctime: DateTime<Utc>,
    tx: mpsc::UnboundedSender<Outbound>,
    state: TieredMutex<SessionState>,
}

impl Session {
    pub fn new(info: SessionInfo, tx: mpsc::UnboundedSender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            ip: info.ip.unwrap_or(IpAddr::from([127, 0, 0, 1])),
            listener: info.listener,
            is_tls: info.is_tls,
            is_tor: info.is_tor,
            sts_only: info.sts_only,
            certfp: info.certfp,
            ctime: Utc::now(),
            tx,
            state: TieredMutex::new(LockTier::Session, SessionState::default()),
        })
    }

    /// A session whose outbound queue is returned to the caller instead of
    /// a socket.
    pub fn detached(info: SessionInfo) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(info, tx), rx)
    }

    pub fn state(&self) -> TieredGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn send(&self, message: Message) {
        // The receiver is gone only once the connection is closing.
        let _ = self.tx.send(Outbound::Line(message));
    }

    /// Close after everything already queued has been written.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Send `ERROR :reason` and close.
    pub fn quit(&self, reason: &str) {
        self.send(Message::new(None, "ERROR", [reason]));
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn client(&self) -> Option<Arc<Client>> {
        self.state().client.clone()
    }

    pub fn set_client(&self, client: Option<Arc<Client>>) {
        self.state().client = client;
    }

    pub fn has_cap(&self, cap: Capability) -> bool {
        self.state().capabilities.has(cap)
    }

    pub fn cap_version(&self) -> CapVersion {
        self.state().cap_version
    }

    /// Nick to address numerics to: the client's nick, the pending nick,
    /// or `*`.
    pub fn nick_or_star(&self) -> String {
        let (client, pending) = {
            let state = self.state();
            (state.client.clone(), state.nick.clone())
        };
        if let Some(client) = client {
            let nick = client.nick();
            if !nick.is_empty() {
                return nick;
            }
        }
        pending.unwrap_or_else(|| "*".to_string())
    }

    pub fn registration_state(&self) -> RegState {
        self.state().registration
    }

    pub fn set_registration_state(&self, state: RegState) {
        self.state().registration = state;
    }

    pub fn readiness(&self) -> Readiness {
        let state = self.state();
        Readiness {
            resume_requested: state.resume_token.is_some(),
            fields_complete: state.nick.as_deref().is_some_and(|n| !n.is_empty())
                && state.username.as_deref().is_some_and(|u| !u.is_empty())
                && state.realname.as_deref().is_some_and(|r| !r.is_empty()),
            cap_negotiating: state.cap_state == CapState::Negotiating,
            sts_only: self.sts_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_all_fields_and_finished_cap() {
        let (session, _rx) = Session::detached(SessionInfo::default());
        assert!(!session.readiness().fields_complete);
        {
            let mut state = session.state();
            state.nick = Some("alice".into());
            state.username = Some("alice".into());
            state.realname = Some(String::new());
        }
        assert!(!session.readiness().fields_complete);
        {
            let mut state = session.state();
            state.realname = Some("Alice".into());
            state.cap_state = CapState::Negotiating;
        }
        let readiness = session.readiness();
        assert!(readiness.fields_complete);
        assert!(readiness.cap_negotiating);
    }

    #[test]
    fn quit_sends_error_then_close() {
        let (session, mut rx) = Session::detached(SessionInfo::default());
        session.quit("Bad password");
        match rx.try_recv().unwrap() {
            Outbound::Line(message) => assert_eq!(message.to_string(), "ERROR :Bad password"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn session_ids_are_unique() {
        let (a, _ra) = Session::detached(SessionInfo::default());
        let (b, _rb) = Session::detached(SessionInfo::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn nick_or_star_prefers_pending_nick() {
        let (session, _rx) = Session::detached(SessionInfo::default());
        assert_eq!(session.nick_or_star(), "*");
        session.state().nick = Some("bob".into());
        assert_eq!(session.nick_or_star(), "bob");
    }
}
