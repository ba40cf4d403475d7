//! JOIN and PART.

use super::helpers::{history_item, record_channel_history};
use super::{Context, Handler};
use crate::error::{HandlerError, HandlerResult};
use crate::history::ItemKind;
use crate::proto::{Message, numeric};
use crate::state::Channel;
use async_trait::async_trait;
use tracing::debug;

fn broadcast(channel: &Channel, message: &Message) {
    for member in channel.members() {
        member.send(message);
    }
}

/// Handler for JOIN command.
///
/// `JOIN channel[,channel...]`
pub struct JoinHandler;

#[async_trait]
impl Handler for JoinHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let Some(client) = ctx.registered_client() else {
            return Err(HandlerError::NotRegistered);
        };
        let Some(targets) = msg.param(0).filter(|t| !t.is_empty()) else {
            return Err(HandlerError::NeedMoreParams);
        };
        let config = &ctx.config;

        for name in targets.split(',').filter(|n| !n.is_empty()) {
            let joined = ctx.server.channels.join(
                &client,
                name,
                config.server.casemapping,
                config.history.channel_length,
            );
            let (channel, added) = match joined {
                Ok(joined) => joined,
                Err(_) => {
                    ctx.reply(numeric::ERR_NOSUCHCHANNEL, [name, "No such channel"]);
                    continue;
                }
            };
            if !added {
                continue;
            }

            broadcast(&channel, &Message::new(Some(&client.nickmask()), "JOIN", [channel.name.as_str()]));

            let names: Vec<String> = channel.members().iter().map(|m| m.nick()).collect();
            ctx.reply(
                numeric::RPL_NAMREPLY,
                ["=".to_string(), channel.name.clone(), names.join(" ")],
            );
            ctx.reply(
                numeric::RPL_ENDOFNAMES,
                [channel.name.clone(), "End of /NAMES list".to_string()],
            );

            let item = history_item(&client, ItemKind::Join, &channel.name, "");
            record_channel_history(ctx.server, config, &channel, item).await;
            debug!(nick = %client.nick(), channel = %channel.name, "Joined channel");
        }
        Ok(())
    }
}

/// Handler for PART command.
///
/// `PART channel[,channel...] [reason]`
pub struct PartHandler;

#[async_trait]
impl Handler for PartHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let Some(client) = ctx.registered_client() else {
            return Err(HandlerError::NotRegistered);
        };
        let Some(targets) = msg.param(0).filter(|t| !t.is_empty()) else {
            return Err(HandlerError::NeedMoreParams);
        };
        let reason = msg.param(1).unwrap_or("");
        let config = &ctx.config;
        let mapping = config.server.casemapping;

        for name in targets.split(',').filter(|n| !n.is_empty()) {
            let Some(channel) = ctx.server.channels.get(name, mapping) else {
                ctx.reply(numeric::ERR_NOSUCHCHANNEL, [name, "No such channel"]);
                continue;
            };
            if !channel.has_client(&client) {
                ctx.reply(numeric::ERR_NOTONCHANNEL, [name, "You're not on that channel"]);
                continue;
            }

            let part = if reason.is_empty() {
                Message::new(Some(&client.nickmask()), "PART", [channel.name.as_str()])
            } else {
                Message::new(Some(&client.nickmask()), "PART", [channel.name.as_str(), reason])
            };
            broadcast(&channel, &part);
            ctx.server.channels.part(&client, name, mapping);

            let item = history_item(&client, ItemKind::Part, &channel.name, reason);
            record_channel_history(ctx.server, config, &channel, item).await;
        }
        Ok(())
    }
}
