//! Connection and registration handlers.
//!
//! Handles PASS, NICK, USER, RESUME, PING, PONG and QUIT. Each command
//! that fills in a piece of the registration state re-runs the
//! registration pipeline, which does nothing until the session is ready.

use super::registration::{auth, pipeline};
use super::{Context, Handler};
use crate::casemap;
use crate::error::{HandlerError, HandlerResult};
use crate::proto::{Message, numeric};
use crate::state::managers::NickError;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info};

/// Handler for PASS command.
///
/// `PASS password`
pub struct PassHandler;

#[async_trait]
impl Handler for PassHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        if ctx.session.client().is_some_and(|c| c.is_registered()) {
            return Err(HandlerError::AlreadyRegistered);
        }
        let password = match msg.param(0) {
            Some(p) if !p.is_empty() => p,
            _ => return Err(HandlerError::NeedMoreParams),
        };

        let status = auth::verify_password(&ctx.config, password);
        ctx.session.state().pass = status;
        debug!(session = ctx.session.id, ?status, "PASS received");
        Ok(())
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

/// Handler for NICK command.
pub struct NickHandler;

#[async_trait]
impl Handler for NickHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let nick = match msg.param(0) {
            Some(n) if !n.is_empty() => n,
            _ => {
                ctx.reply(numeric::ERR_NONICKNAMEGIVEN, ["No nickname given"]);
                return Ok(());
            }
        };

        if ctx.registered_client().is_some() {
            return change_nick(ctx, nick);
        }

        ctx.session.state().nick = Some(nick.to_string());
        pipeline::attempt(ctx).await
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

/// Nick change for an already registered client.
fn change_nick(ctx: &Context<'_>, nick: &str) -> HandlerResult {
    let Some(client) = ctx.registered_client() else {
        return Err(HandlerError::NotRegistered);
    };
    let config = &ctx.config;
    let mapping = config.server.casemapping;

    let reserved_by = if config.accounts.nick_reservation.enabled {
        casemap::casefold_name(nick, mapping)
            .ok()
            .and_then(|cf| ctx.server.accounts.reserved_by(&cf))
    } else {
        None
    };

    let old_mask = client.nickmask();
    let old_cf = client.nick_casefolded();
    let old_nick = client.nick();

    match ctx
        .server
        .clients
        .change_nick(&client, nick, reserved_by.as_deref(), config)
    {
        Ok(()) => {}
        Err(NickError::Erroneous) => {
            ctx.reply(numeric::ERR_ERRONEUSNICKNAME, [nick, "Erroneous nickname"]);
            return Ok(());
        }
        Err(e) => {
            ctx.reply(numeric::ERR_NICKNAMEINUSE, [nick.to_string(), e.to_string()]);
            return Ok(());
        }
    }

    let announce = Message::new(Some(&old_mask), "NICK", [nick]);
    client.send(&announce);
    let mut notified = HashSet::from([client.id]);
    for channel in ctx.server.channels.all() {
        if !channel.has_client(&client) {
            continue;
        }
        for member in channel.members() {
            if notified.insert(member.id) {
                member.send(&announce);
            }
        }
    }

    let new_cf = client.nick_casefolded();
    if new_cf != old_cf {
        ctx.server
            .monitor
            .alert_about(&config.server.name, &old_cf, &old_nick, false);
        ctx.server
            .monitor
            .alert_about(&config.server.name, &new_cf, &client.nickmask(), true);
    }
    info!(old = %old_nick, new = %nick, "Nick change");
    Ok(())
}

/// Handler for USER command.
///
/// `USER username mode unused :realname`
pub struct UserHandler;

#[async_trait]
impl Handler for UserHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        if ctx.session.client().is_some_and(|c| c.is_registered()) {
            return Err(HandlerError::AlreadyRegistered);
        }
        if msg.params.len() < 4 {
            return Err(HandlerError::NeedMoreParams);
        }
        let (username, realname) = (msg.params[0].trim_start_matches('~'), &msg.params[3]);
        if username.is_empty() || realname.is_empty() {
            return Err(HandlerError::NeedMoreParams);
        }

        {
            let mut state = ctx.session.state();
            if state.username.is_some() {
                return Ok(());
            }
            state.username = Some(format!("~{username}"));
            state.realname = Some(realname.clone());
        }
        pipeline::attempt(ctx).await
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

/// Handler for RESUME command.
///
/// `RESUME token`
pub struct ResumeHandler;

#[async_trait]
impl Handler for ResumeHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        if ctx.session.client().is_some_and(|c| c.is_registered()) {
            return Err(HandlerError::AlreadyRegistered);
        }
        let Some(token) = msg.param(0).filter(|t| !t.is_empty()) else {
            return Err(HandlerError::NeedMoreParams);
        };
        ctx.session.state().resume_token = Some(token.to_string());
        pipeline::attempt(ctx).await
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

/// Handler for PING command.
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        // PING <token>
        let Some(token) = msg.param(0) else {
            return Err(HandlerError::NeedMoreParams);
        };
        let name = ctx.server_name();
        ctx.session
            .send(Message::new(Some(name), "PONG", [name, token]));
        Ok(())
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

/// Handler for PONG command.
pub struct PongHandler;

#[async_trait]
impl Handler for PongHandler {
    async fn handle(&self, _ctx: &Context<'_>, _msg: &Message) -> HandlerResult {
        // Idle tracking happens in the connection loop.
        Ok(())
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

/// Handler for QUIT command.
pub struct QuitHandler;

#[async_trait]
impl Handler for QuitHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let quit_msg = msg.param(0).map(str::to_string);
        debug!(session = ctx.session.id, nick = %ctx.nick(), message = ?quit_msg, "Client quit");
        Err(HandlerError::Quit(quit_msg))
    }

    fn requires_registration(&self) -> bool {
        false
    }
}
