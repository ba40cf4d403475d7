//! MONITOR command handler.
//!
//! `MONITOR + targets`, `MONITOR - targets`, `MONITOR C`, `MONITOR L`,
//! `MONITOR S`.

use super::{Context, Handler};
use crate::casemap;
use crate::error::{HandlerError, HandlerResult};
use crate::proto::{Message, numeric};
use crate::state::Client;
use async_trait::async_trait;
use std::sync::Arc;

/// Handler for MONITOR command.
pub struct MonitorHandler;

#[async_trait]
impl Handler for MonitorHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let Some(client) = ctx.registered_client() else {
            return Err(HandlerError::NotRegistered);
        };
        let Some(subcommand) = msg.param(0) else {
            return Err(HandlerError::NeedMoreParams);
        };
        let targets = msg.param(1).unwrap_or("");

        match subcommand {
            "+" => add(ctx, &client, targets),
            "-" => {
                let mapping = ctx.config.server.casemapping;
                for nick in targets.split(',').filter(|n| !n.is_empty()) {
                    if let Ok(cf) = casemap::casefold_name(nick, mapping) {
                        ctx.server.monitor.remove(client.id, &cf);
                    }
                }
            }
            "C" | "c" => ctx.server.monitor.clear(client.id),
            "L" | "l" => {
                let list = ctx.server.monitor.list(client.id);
                for chunk in list.chunks(10) {
                    ctx.reply(numeric::RPL_MONLIST, [chunk.join(",")]);
                }
                ctx.reply(numeric::RPL_ENDOFMONLIST, ["End of MONITOR list"]);
            }
            "S" | "s" => {
                let list = ctx.server.monitor.list(client.id);
                report_status(ctx, &list);
            }
            _ => return Err(HandlerError::NeedMoreParams),
        }
        Ok(())
    }
}

fn add(ctx: &Context<'_>, client: &Arc<Client>, targets: &str) {
    let limit = ctx.config.limits.monitor_entries;
    let mapping = ctx.config.server.casemapping;
    let mut added = Vec::new();

    let nicks: Vec<&str> = targets.split(',').filter(|n| !n.is_empty()).collect();
    for (i, nick) in nicks.iter().enumerate() {
        let Ok(cf) = casemap::casefold_name(nick, mapping) else {
            continue;
        };
        if !ctx.server.monitor.add(client, &cf, limit) {
            ctx.reply(
                numeric::ERR_MONLISTFULL,
                [limit.to_string(), nicks[i..].join(","), "Monitor list is full".to_string()],
            );
            break;
        }
        added.push(nick.to_string());
    }
    report_status(ctx, &added);
}

/// 730 for online nicks (as nickmasks), 731 for the rest.
fn report_status(ctx: &Context<'_>, nicks: &[String]) {
    let mut online = Vec::new();
    let mut offline = Vec::new();
    for nick in nicks {
        match ctx
            .server
            .clients
            .get(nick, &ctx.config)
            .filter(|c| c.is_registered())
        {
            Some(found) => online.push(found.nickmask()),
            None => offline.push(nick.clone()),
        }
    }
    if !online.is_empty() {
        ctx.reply(numeric::RPL_MONONLINE, [online.join(",")]);
    }
    if !offline.is_empty() {
        ctx.reply(numeric::RPL_MONOFFLINE, [offline.join(",")]);
    }
}
