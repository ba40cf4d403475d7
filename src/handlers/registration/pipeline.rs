//! The registration pipeline.
//!
//! Re-entered whenever a registration-relevant command arrives. Each pass
//! feeds the current [`RegState`] and the result of the last step to
//! [`step`] and performs the returned action, until the machine waits,
//! exits, hands the session off or completes registration.
//!
//! The pending [`Client`] is created at nick assignment and only marked
//! registered in the final step; every exit before that detaches it again.

use super::auth;
use super::machine::{Action, AuthOutcome, HandoffKind, NickOutcome, RegEvent, step};
use crate::casemap;
use crate::error::{HandlerError, HandlerResult};
use crate::handlers::Context;
use crate::handlers::burst;
use crate::metrics;
use crate::proto::{Message, numeric};
use crate::security::BanRecord;
use crate::state::managers::{NickAssignment, NickError};
use crate::state::{Client, ClientIdentity};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BAN_TEMPLATE: &str = "You are banned from this server (%s)";
const SASL_REQUIRED: &str = "You must log in with SASL to join this server";
const STS_QUIT: &str = "Cannot register on an insecure connection; reconnect with TLS";

/// How a registration pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Waiting for more input; nothing user-visible happened, or a
    /// nickname error was reported.
    Incomplete,
    /// The session was told why and is closing.
    Exiting(String),
    Registered,
    /// The session joined an existing client of the same account.
    Reattached,
    /// The session took over a client with a resume token.
    Resumed,
}

/// Run the pipeline and translate an exit into a handler error.
pub async fn attempt(ctx: &Context<'_>) -> HandlerResult {
    match try_register(ctx).await {
        RegistrationOutcome::Exiting(reason) => Err(HandlerError::Exited(reason)),
        _ => Ok(()),
    }
}

/// Advance registration as far as the session's current state allows.
pub async fn try_register(ctx: &Context<'_>) -> RegistrationOutcome {
    let mut pipeline = Pipeline {
        ctx,
        pending: None,
        nick_error: None,
        handoff: None,
        ban: None,
    };
    pipeline.run().await
}

struct Pipeline<'c, 'a> {
    ctx: &'c Context<'a>,
    pending: Option<Arc<Client>>,
    nick_error: Option<NickError>,
    handoff: Option<Arc<Client>>,
    ban: Option<BanRecord>,
}

impl Pipeline<'_, '_> {
    async fn run(&mut self) -> RegistrationOutcome {
        let session = self.ctx.session;
        let mut event = RegEvent::Attempt(session.readiness());
        loop {
            let transition = step(session.registration_state(), event);
            session.set_registration_state(transition.state);
            debug!(session = session.id, state = ?transition.state, action = ?transition.action, "Registration step");

            event = match transition.action {
                Action::Wait | Action::Ignore => return RegistrationOutcome::Incomplete,
                Action::AttemptResume => RegEvent::ResumeFinished {
                    resumed: self.attempt_resume(),
                },
                Action::SendStsBurstAndExit => return self.sts_exit(),
                Action::CheckAuth => RegEvent::AuthChecked {
                    outcome: auth::check(&self.ctx.config, session),
                    hostname_known: self.hostname_known(),
                },
                Action::RejectAuth(outcome) => return self.reject_auth(outcome),
                Action::ResolveHostname => {
                    self.resolve_hostname().await;
                    RegEvent::HostnameResolved
                }
                Action::AssignNick => RegEvent::NickAssigned(self.assign_nick()),
                Action::ClearNickAndWait => {
                    self.clear_nick();
                    return RegistrationOutcome::Incomplete;
                }
                Action::RejectInsecureReattach => {
                    self.discard_pending();
                    return self.exit(NickError::InsecureReattach.to_string());
                }
                Action::Handoff(kind) => return self.handoff(kind),
                Action::CheckBans => RegEvent::BansChecked {
                    banned: self.check_bans(),
                },
                Action::RejectBanned => {
                    let message = self
                        .ban
                        .take()
                        .map_or_else(|| BAN_TEMPLATE.replacen("%s", "No reason given", 1), |b| {
                            b.ban_message(BAN_TEMPLATE)
                        });
                    self.discard_pending();
                    return self.exit(message);
                }
                Action::ApplyDefaultModes => {
                    if let Some(client) = &self.pending {
                        for &mode in &self.ctx.config.derived.default_user_modes {
                            client.set_mode(mode, true);
                        }
                    }
                    RegEvent::ModesApplied
                }
                Action::CompleteRegistration => return self.complete(),
            };
        }
    }

    fn hostname_known(&self) -> bool {
        self.ctx.session.state().hostname.is_some()
    }

    fn exit(&self, reason: String) -> RegistrationOutcome {
        self.ctx.session.quit(&reason);
        RegistrationOutcome::Exiting(reason)
    }

    fn attempt_resume(&mut self) -> bool {
        let ctx = self.ctx;
        let session = ctx.session;
        let Some(token) = session.state().resume_token.take() else {
            return false;
        };
        let Some(client) = ctx.server.resume.verify(&token).filter(|c| c.is_registered()) else {
            session.send(Message::new(
                Some(ctx.server_name()),
                "FAIL",
                ["RESUME", "INVALID_TOKEN", "Cannot resume connection, token is not valid"],
            ));
            return false;
        };
        self.handoff = Some(client);
        true
    }

    fn sts_exit(&self) -> RegistrationOutcome {
        let nick = self.ctx.nick();
        for message in burst::sts_burst(&self.ctx.config, &nick) {
            self.ctx.session.send(message);
        }
        self.exit(STS_QUIT.to_string())
    }

    fn reject_auth(&self, outcome: AuthOutcome) -> RegistrationOutcome {
        let ctx = self.ctx;
        match outcome {
            AuthOutcome::PasswordMismatch => {
                // No identity exists yet, so the numeric goes to `*`.
                ctx.session.send(Message::new(
                    Some(ctx.server_name()),
                    numeric::ERR_PASSWDMISMATCH,
                    ["*", "Password incorrect"],
                ));
                self.exit("Bad password".to_string())
            }
            AuthOutcome::SaslRequired | AuthOutcome::TorSaslRequired => {
                ctx.session.send(Message::new(
                    Some(ctx.server_name()),
                    "FAIL",
                    ["*", "ACCOUNT_REQUIRED", SASL_REQUIRED],
                ));
                self.exit(SASL_REQUIRED.to_string())
            }
            AuthOutcome::Success => RegistrationOutcome::Incomplete,
        }
    }

    async fn resolve_hostname(&self) {
        let ctx = self.ctx;
        let session = ctx.session;
        let hostname = if session.is_tor {
            ctx.config.server.tor_listeners.vhost.clone()
        } else if ctx.config.server.lookup_hostnames {
            match ctx.server.resolver().lookup(session.ip).await {
                Some(hostname) => hostname,
                None => ip_hostname(session.ip),
            }
        } else {
            ip_hostname(session.ip)
        };
        session.state().hostname = Some(hostname);
    }

    fn assign_nick(&mut self) -> NickOutcome {
        let ctx = self.ctx;
        let session = ctx.session;
        let config = &ctx.config;
        let mapping = config.server.casemapping;

        let (nick, identity, sasl_account) = {
            let state = session.state();
            (
                state.nick.clone().unwrap_or_default(),
                ClientIdentity {
                    username: state.username.clone().unwrap_or_default(),
                    realname: state.realname.clone().unwrap_or_default(),
                    hostname: state.hostname.clone().unwrap_or_else(|| ip_hostname(session.ip)),
                    ..Default::default()
                },
                state.sasl_account.clone(),
            )
        };

        let client = Client::new(identity, session.ip, config.history.client_length);
        let account = sasl_account
            .and_then(|name| ctx.server.accounts.get(&name, mapping))
            .map(|record| record.info(mapping));
        client.set_account(account);
        client.add_session(Arc::clone(session));
        session.set_client(Some(Arc::clone(&client)));

        let reserved_by = if config.accounts.nick_reservation.enabled {
            casemap::casefold_name(&nick, mapping)
                .ok()
                .and_then(|cf| ctx.server.accounts.reserved_by(&cf))
        } else {
            None
        };

        let result = ctx
            .server
            .clients
            .assign_nick(&client, session, &nick, reserved_by.as_deref(), config);
        self.pending = Some(client);
        match result {
            Ok(NickAssignment::Assigned) => NickOutcome::Assigned,
            Ok(NickAssignment::Reattached(existing)) => {
                self.handoff = Some(existing);
                NickOutcome::Reattached
            }
            Err(NickError::InsecureReattach) => NickOutcome::InsecureReattach,
            Err(e) => {
                self.nick_error = Some(e);
                NickOutcome::Rejected
            }
        }
    }

    fn clear_nick(&mut self) {
        let ctx = self.ctx;
        let nick = ctx.session.state().nick.take().unwrap_or_default();
        self.discard_pending();
        let (code, text) = match self.nick_error.take() {
            Some(NickError::Erroneous) => (numeric::ERR_ERRONEUSNICKNAME, "Erroneous nickname".to_string()),
            Some(e) => (numeric::ERR_NICKNAMEINUSE, e.to_string()),
            None => (numeric::ERR_NICKNAMEINUSE, NickError::InUse.to_string()),
        };
        ctx.session.send(Message::new(
            Some(ctx.server_name()),
            code,
            ["*".to_string(), nick, text],
        ));
    }

    /// Detach the pending client from the session and release its nick.
    fn discard_pending(&mut self) {
        if let Some(client) = self.pending.take() {
            self.ctx.server.clients.remove(&client);
            client.remove_session(self.ctx.session.id);
            self.ctx.session.set_client(None);
        }
    }

    fn check_bans(&mut self) -> bool {
        let Some(client) = &self.pending else {
            return false;
        };
        self.ban = self.ctx.server.bans.check_masks(&client.nickmasks());
        self.ban.is_some()
    }

    fn handoff(&mut self, kind: HandoffKind) -> RegistrationOutcome {
        let ctx = self.ctx;
        let session = ctx.session;
        let Some(target) = self.handoff.take() else {
            warn!(session = session.id, ?kind, "Handoff without a target client");
            return self.exit("Internal error during registration".to_string());
        };

        // The pending client never owned the nick; only the session link goes.
        if let Some(pending) = self.pending.take() {
            pending.remove_session(session.id);
        }

        match kind {
            HandoffKind::Resumed => {
                let replaced: Vec<_> = target
                    .sessions()
                    .into_iter()
                    .filter(|s| s.id != session.id)
                    .collect();
                target.add_session(Arc::clone(session));
                for old in replaced {
                    target.remove_session(old.id);
                    old.quit("Connection resumed elsewhere");
                }
            }
            HandoffKind::Reattached => target.add_session(Arc::clone(session)),
        }
        session.set_client(Some(Arc::clone(&target)));

        // The client is already counted; this connection no longer is.
        ctx.server.stats.remove(false, false, false);

        if kind == HandoffKind::Resumed {
            session.send(Message::new(
                Some(ctx.server_name()),
                "RESUME",
                ["SUCCESS".to_string(), target.nick()],
            ));
        }
        burst::send_registration_burst(ctx.server, &ctx.config, &target, session);
        info!(session = session.id, nick = %target.nick(), ?kind, "Session attached to existing client");

        match kind {
            HandoffKind::Resumed => RegistrationOutcome::Resumed,
            HandoffKind::Reattached => RegistrationOutcome::Reattached,
        }
    }

    fn complete(&mut self) -> RegistrationOutcome {
        let ctx = self.ctx;
        let Some(client) = self.pending.take() else {
            warn!(session = ctx.session.id, "Registration completed without a client");
            return self.exit("Internal error during registration".to_string());
        };
        let config = &ctx.config;

        client.set_registered();
        ctx.server.stats.register(client.has_mode('i'));
        if let Some(account) = client.account()
            && config.accounts.multiclient.is_always_on_enabled(account.always_on)
        {
            client.set_always_on(true);
        }
        metrics::record_registration();

        ctx.server.monitor.alert_about(
            &config.server.name,
            &client.nick_casefolded(),
            &client.nickmask(),
            true,
        );
        info!(
            session = ctx.session.id,
            nick = %client.nick(),
            ip = %client.ip,
            account = %client.account_name(),
            "Client registered"
        );
        burst::send_registration_burst(ctx.server, config, &client, ctx.session);
        RegistrationOutcome::Registered
    }
}

/// The hostname used when no lookup result is available. A leading `:`
/// would break the wire format, so IPv6 addresses like `::1` become
/// `0::1`.
pub fn ip_hostname(ip: IpAddr) -> String {
    let s = ip.to_string();
    if s.starts_with(':') { format!("0{s}") } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_hostname_never_starts_with_colon() {
        assert_eq!(ip_hostname("192.0.2.1".parse().unwrap()), "192.0.2.1");
        assert_eq!(ip_hostname("::1".parse().unwrap()), "0::1");
        assert_eq!(ip_hostname("2001:db8::1".parse().unwrap()), "2001:db8::1");
    }
}
