//! Welcome bursts.
//!
//! The full burst is sent once a client registers (or when another
//! session attaches to it): welcome numerics, ISUPPORT, LUSERS, MOTD, the
//! mode string, auto-oper and the raw I/O notice. STS-only listeners get a
//! placeholder burst and the STS banner instead, since nobody registers
//! there.

use crate::caps::Capability;
use crate::config::Config;
use crate::proto::{Message, numeric};
use crate::server::Server;
use crate::state::{Client, Session};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

pub const SERVER_VERSION: &str = concat!("lattice-", env!("CARGO_PKG_VERSION"));

pub const RAW_IO_NOTICE: &str = "This server is in debug mode and is logging all user I/O. If you do not wish for everything you send to be readable by the server owner(s), please disconnect.";

const USER_MODES: &str = "iow";
const CHANNEL_MODES: &str = "beIiklmnst";
const CHANNEL_MODES_WITH_PARAMS: &str = "beIkl";

fn reply(server_name: &str, code: &str, nick: &str, rest: &[String]) -> Message {
    let mut params = Vec::with_capacity(rest.len() + 1);
    params.push(nick.to_string());
    params.extend_from_slice(rest);
    Message::new(Some(server_name), code, params)
}

/// 001 through 004.
pub fn welcome(config: &Config, created: DateTime<Utc>, nick: &str) -> Vec<Message> {
    let name = &config.server.name;
    vec![
        reply(
            name,
            numeric::RPL_WELCOME,
            nick,
            &[format!("Welcome to the {} IRC Network {}", config.server.network, nick)],
        ),
        reply(
            name,
            numeric::RPL_YOURHOST,
            nick,
            &[format!("Your host is {name}, running version {SERVER_VERSION}")],
        ),
        reply(
            name,
            numeric::RPL_CREATED,
            nick,
            &[format!("This server was created {}", created.to_rfc2822())],
        ),
        reply(
            name,
            numeric::RPL_MYINFO,
            nick,
            &[
                name.clone(),
                SERVER_VERSION.to_string(),
                USER_MODES.to_string(),
                CHANNEL_MODES.to_string(),
                CHANNEL_MODES_WITH_PARAMS.to_string(),
            ],
        ),
    ]
}

/// RPL_ISUPPORT lines from the snapshot's cached token table.
pub fn isupport(config: &Config, nick: &str) -> Vec<Message> {
    isupport_lines(config, nick, config.derived.isupport.cached_reply())
}

/// RPL_ISUPPORT for an arbitrary set of token lines.
pub fn isupport_lines(config: &Config, nick: &str, lines: &[Vec<String>]) -> Vec<Message> {
    lines
        .iter()
        .map(|tokens| {
            let mut rest = tokens.clone();
            rest.push("are supported by this server".to_string());
            reply(&config.server.name, numeric::RPL_ISUPPORT, nick, &rest)
        })
        .collect()
}

/// LUSERS numerics from the live counters.
pub fn lusers(server: &Server, config: &Config, nick: &str) -> Vec<Message> {
    let name = &config.server.name;
    let stats = server.stats.snapshot();
    let registered = stats.registered();
    vec![
        reply(
            name,
            numeric::RPL_LUSERCLIENT,
            nick,
            &[format!(
                "There are {} users and {} invisible on 1 server(s)",
                stats.visible(),
                stats.invisible
            )],
        ),
        reply(
            name,
            numeric::RPL_LUSEROP,
            nick,
            &[stats.operators.to_string(), "IRC Operators online".to_string()],
        ),
        reply(
            name,
            numeric::RPL_LUSERUNKNOWN,
            nick,
            &[stats.unknown.to_string(), "unregistered connections".to_string()],
        ),
        reply(
            name,
            numeric::RPL_LUSERCHANNELS,
            nick,
            &[server.channels.len().to_string(), "channels formed".to_string()],
        ),
        reply(
            name,
            numeric::RPL_LUSERME,
            nick,
            &[format!("I have {registered} clients and 0 servers")],
        ),
        reply(
            name,
            numeric::RPL_LOCALUSERS,
            nick,
            &[
                registered.to_string(),
                stats.max.to_string(),
                format!("Current local users {registered}, max {}", stats.max),
            ],
        ),
        reply(
            name,
            numeric::RPL_GLOBALUSERS,
            nick,
            &[
                registered.to_string(),
                stats.max.to_string(),
                format!("Current global users {registered}, max {}", stats.max),
            ],
        ),
    ]
}

/// MOTD numerics, or 422 when there is none.
pub fn motd(config: &Config, nick: &str) -> Vec<Message> {
    let name = &config.server.name;
    let lines = &config.derived.motd_lines;
    if lines.is_empty() {
        return vec![reply(name, numeric::ERR_NOMOTD, nick, &["MOTD File is missing".to_string()])];
    }
    let mut out = Vec::with_capacity(lines.len() + 2);
    out.push(reply(
        name,
        numeric::RPL_MOTDSTART,
        nick,
        &[format!("- {name} Message of the day - ")],
    ));
    out.extend(
        lines
            .iter()
            .map(|line| reply(name, numeric::RPL_MOTD, nick, &[format!("- {line}")])),
    );
    out.push(reply(name, numeric::RPL_ENDOFMOTD, nick, &["End of MOTD command".to_string()]));
    out
}

/// Grant operator status if the session's certificate matches an
/// auto-oper block. Returns the block name.
fn try_auto_oper(server: &Server, config: &Config, client: &Client, session: &Session) -> Option<String> {
    let certfp = session.certfp.as_deref()?;
    if client.oper().is_some() {
        return None;
    }
    let block = config
        .opers
        .iter()
        .find(|block| block.auto && block.matches_certfp(certfp))?;
    client.set_oper(Some(block.name.clone()));
    server.stats.change_operators(1);
    info!(nick = %client.nick(), oper = %block.name, "Auto-oper by certificate fingerprint");
    Some(block.name.clone())
}

/// Everything a freshly registered (or newly attached) session receives.
pub fn send_registration_burst(server: &Server, config: &Config, client: &Arc<Client>, session: &Session) {
    let nick = client.nick();
    let name = &config.server.name;

    for message in welcome(config, server.created, &nick)
        .into_iter()
        .chain(isupport(config, &nick))
        .chain(lusers(server, config, &nick))
        .chain(motd(config, &nick))
    {
        session.send(message);
    }

    let modes = client.mode_string();
    if modes != "+" {
        session.send(reply(name, numeric::RPL_UMODEIS, &nick, &[modes]));
    }

    if try_auto_oper(server, config, client, session).is_some() {
        session.send(reply(
            name,
            numeric::RPL_YOUREOPER,
            &nick,
            &["You are now an IRC operator".to_string()],
        ));
        session.send(Message::new(Some(&nick), "MODE", [nick.as_str(), "+o"]));
    }

    if session.has_cap(Capability::Resume) {
        let token = server.resume.generate(client);
        session.send(Message::new(Some(name), "RESUME", ["TOKEN", token.as_str()]));
    }

    if server.logging().is_logging_raw_io() {
        session.send(Message::new(Some(name), "NOTICE", [nick.as_str(), RAW_IO_NOTICE]));
    }
}

/// The placeholder burst for STS-only listeners, ending with the STS
/// banner.
pub fn sts_burst(config: &Config, nick: &str) -> Vec<Message> {
    let name = &config.server.name;
    let mut out = vec![
        reply(
            name,
            numeric::RPL_WELCOME,
            nick,
            &[format!("Welcome to the Internet Relay Network {nick}")],
        ),
        reply(
            name,
            numeric::RPL_YOURHOST,
            nick,
            &[format!("Your host is {name}, running version lattice")],
        ),
        reply(
            name,
            numeric::RPL_CREATED,
            nick,
            &["This server was created Mon, 01 Jan 0001 00:00:00 UTC".to_string()],
        ),
        reply(
            name,
            numeric::RPL_MYINFO,
            nick,
            &[
                name.clone(),
                "lattice".to_string(),
                "o".to_string(),
                "o".to_string(),
                "o".to_string(),
            ],
        ),
        reply(
            name,
            numeric::RPL_ISUPPORT,
            nick,
            &["CASEMAPPING=ascii".to_string(), "are supported by this server".to_string()],
        ),
        reply(name, numeric::ERR_NOMOTD, nick, &["MOTD is unavailable".to_string()]),
    ];
    out.extend(
        config
            .derived
            .sts_banner_lines
            .iter()
            .map(|line| Message::new(Some(name), "NOTICE", [nick, line.as_str()])),
    );
    out
}
