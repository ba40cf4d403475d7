//! IRCv3 capability negotiation and SASL.
//!
//! CAP LS, LIST, REQ and END, plus AUTHENTICATE with the PLAIN and
//! EXTERNAL mechanisms. Both may be used before registration; CAP LS and
//! REQ hold registration open until CAP END.

use super::helpers::join_lines;
use super::registration::pipeline;
use super::{Context, Handler};
use crate::caps::{CapSet, CapVersion, Capability};
use crate::error::{HandlerError, HandlerResult};
use crate::proto::{Message, numeric};
use crate::state::session::{CapState, SaslStep};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info};

/// Room left for capability tokens in one CAP line.
const CAP_LINE_LEN: usize = 400;

/// AUTHENTICATE payloads arrive in chunks of this size; a shorter chunk
/// ends the payload.
const SASL_CHUNK_LEN: usize = 400;

const SASL_MAX_PAYLOAD: usize = 8192;

/// Handler for CAP command.
pub struct CapHandler;

#[async_trait]
impl Handler for CapHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let Some(subcommand) = msg.param(0) else {
            return Err(HandlerError::NeedMoreParams);
        };
        let subcommand = subcommand.to_ascii_uppercase();
        let registered = ctx.session.client().is_some_and(|c| c.is_registered());

        match subcommand.as_str() {
            "LS" => {
                cap_ls(ctx, msg.param(1), registered);
                Ok(())
            }
            "LIST" => {
                cap_list(ctx);
                Ok(())
            }
            "REQ" => {
                cap_req(ctx, msg.param(1).unwrap_or(""), registered);
                Ok(())
            }
            "END" => {
                if registered {
                    return Ok(());
                }
                ctx.session.state().cap_state = CapState::Negotiated;
                pipeline::attempt(ctx).await
            }
            _ => {
                ctx.reply(numeric::ERR_INVALIDCAPCMD, [subcommand.as_str(), "Invalid CAP command"]);
                Ok(())
            }
        }
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

/// Capabilities this session may request.
fn offered(ctx: &Context<'_>) -> CapSet {
    if ctx.session.sts_only {
        Capability::STS_ONLY
            .iter()
            .copied()
            .filter(|cap| *cap != Capability::Sts || ctx.config.derived.supported_caps.has(*cap))
            .collect()
    } else {
        ctx.config.derived.supported_caps.clone()
    }
}

fn cap_ls(ctx: &Context<'_>, version: Option<&str>, registered: bool) {
    let requested = match version.and_then(|v| v.parse::<u32>().ok()) {
        Some(v) if v >= 302 => CapVersion::Cap302,
        _ => CapVersion::Cap301,
    };

    let version = {
        let mut state = ctx.session.state();
        if !registered {
            state.cap_state = CapState::Negotiating;
        }
        if requested > state.cap_version {
            state.cap_version = requested;
        }
        // 302 implies cap-notify.
        if state.cap_version == CapVersion::Cap302 {
            state.capabilities.add(Capability::CapNotify);
        }
        state.cap_version
    };

    let tokens = offered(ctx).strings(version, &ctx.config.derived.cap_values);
    let lines = join_lines(&tokens, CAP_LINE_LEN);
    let nick = ctx.nick();
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.into_iter().enumerate() {
        let params = if i < last && version == CapVersion::Cap302 {
            vec![nick.clone(), "LS".to_string(), "*".to_string(), line]
        } else {
            vec![nick.clone(), "LS".to_string(), line]
        };
        ctx.session
            .send(Message::new(Some(ctx.server_name()), "CAP", params));
    }
}

fn cap_list(ctx: &Context<'_>) {
    let enabled = ctx.session.state().capabilities.clone();
    let tokens = enabled.strings(CapVersion::Cap301, &ctx.config.derived.cap_values);
    ctx.session.send(Message::new(
        Some(ctx.server_name()),
        "CAP",
        [ctx.nick(), "LIST".to_string(), tokens.join(" ")],
    ));
}

/// Apply a REQ all-or-nothing.
fn cap_req(ctx: &Context<'_>, request: &str, registered: bool) {
    let offered = offered(ctx);
    let mut add = Vec::new();
    let mut remove = Vec::new();
    let mut valid = !request.trim().is_empty();

    for token in request.split_whitespace() {
        let (removing, name) = match token.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, token),
        };
        match Capability::from_name(name) {
            Some(cap) if removing => remove.push(cap),
            Some(cap) if offered.has(cap) => add.push(cap),
            _ => {
                valid = false;
                break;
            }
        }
    }

    let nick = ctx.nick();
    if !valid {
        ctx.session.send(Message::new(
            Some(ctx.server_name()),
            "CAP",
            [nick, "NAK".to_string(), request.to_string()],
        ));
        return;
    }

    {
        let mut state = ctx.session.state();
        if !registered {
            state.cap_state = CapState::Negotiating;
        }
        for cap in add {
            state.capabilities.add(cap);
        }
        for cap in remove {
            state.capabilities.remove(cap);
        }
    }
    debug!(session = ctx.session.id, request = %request, "CAP REQ acknowledged");
    ctx.session.send(Message::new(
        Some(ctx.server_name()),
        "CAP",
        [nick, "ACK".to_string(), request.to_string()],
    ));
}

/// Handler for AUTHENTICATE command.
pub struct AuthenticateHandler;

#[async_trait]
impl Handler for AuthenticateHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let Some(data) = msg.param(0) else {
            return Err(HandlerError::NeedMoreParams);
        };

        if !ctx.config.derived.supported_caps.has(Capability::Sasl) {
            sasl_fail(ctx);
            return Ok(());
        }
        let registered = ctx.session.client().is_some_and(|c| c.is_registered());
        if registered || ctx.session.state().sasl_account.is_some() {
            ctx.reply(
                numeric::ERR_SASLALREADY,
                ["You have already authenticated using SASL"],
            );
            return Ok(());
        }

        if data == "*" {
            reset_sasl(ctx);
            ctx.reply(numeric::ERR_SASLABORTED, ["SASL authentication aborted"]);
            return Ok(());
        }

        let step = ctx.session.state().sasl.clone();
        match step {
            SaslStep::Idle => start_mechanism(ctx, data),
            SaslStep::Plain | SaslStep::External => continue_exchange(ctx, step, data),
        }
        Ok(())
    }

    fn requires_registration(&self) -> bool {
        false
    }
}

fn start_mechanism(ctx: &Context<'_>, mechanism: &str) {
    let step = match mechanism.to_ascii_uppercase().as_str() {
        "PLAIN" => SaslStep::Plain,
        "EXTERNAL" if ctx.session.certfp.is_some() => SaslStep::External,
        _ => {
            sasl_fail(ctx);
            return;
        }
    };
    {
        let mut state = ctx.session.state();
        state.sasl = step;
        state.sasl_buffer.clear();
    }
    ctx.session
        .send(Message::new(None::<&str>, "AUTHENTICATE", ["+"]));
}

fn continue_exchange(ctx: &Context<'_>, step: SaslStep, chunk: &str) {
    let payload = {
        let mut state = ctx.session.state();
        if chunk != "+" {
            state.sasl_buffer.push_str(chunk);
        }
        if state.sasl_buffer.len() > SASL_MAX_PAYLOAD {
            None
        } else if chunk.len() == SASL_CHUNK_LEN {
            return;
        } else {
            Some(std::mem::take(&mut state.sasl_buffer))
        }
    };
    let Some(payload) = payload else {
        reset_sasl(ctx);
        sasl_fail(ctx);
        return;
    };

    let mapping = ctx.config.server.casemapping;
    let account = match step {
        SaslStep::Plain => BASE64
            .decode(payload.as_bytes())
            .ok()
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|decoded| {
                let mut parts = decoded.splitn(3, '\0');
                let authzid = parts.next()?.to_string();
                let authcid = parts.next()?.to_string();
                let password = parts.next()?.to_string();
                if !authzid.is_empty() && authzid != authcid {
                    return None;
                }
                ctx.server
                    .accounts
                    .authenticate_plain(&authcid, &password, mapping)
            }),
        SaslStep::External => ctx
            .session
            .certfp
            .as_deref()
            .and_then(|fp| ctx.server.accounts.authenticate_certfp(fp, mapping)),
        SaslStep::Idle => None,
    };

    reset_sasl(ctx);
    let Some(account) = account else {
        sasl_fail(ctx);
        return;
    };

    ctx.session.state().sasl_account = Some(account.name.clone());
    info!(session = ctx.session.id, account = %account.name, mechanism = ?step, "SASL login");
    let nick = ctx.nick();
    ctx.reply(
        numeric::RPL_LOGGEDIN,
        [
            format!("{nick}!*@*"),
            account.name.clone(),
            format!("You are now logged in as {}", account.name),
        ],
    );
    ctx.reply(numeric::RPL_SASLSUCCESS, ["SASL authentication successful"]);
}

fn reset_sasl(ctx: &Context<'_>) {
    let mut state = ctx.session.state();
    state.sasl = SaslStep::Idle;
    state.sasl_buffer.clear();
}

fn sasl_fail(ctx: &Context<'_>) {
    ctx.reply(numeric::ERR_SASLFAIL, ["SASL authentication failed"]);
}
