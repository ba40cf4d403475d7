//! PRIVMSG and NOTICE.
//!
//! Delivery plus history: channel messages go to the channel's history,
//! direct messages to both participants' histories, each side keyed by
//! the other party's casefolded nick.

use super::helpers::{history_item, record_channel_history, record_client_history};
use super::{Context, Handler};
use crate::caps::Capability;
use crate::error::{HandlerError, HandlerResult};
use crate::history::ItemKind;
use crate::proto::{Message, numeric};
use async_trait::async_trait;

/// Handler for PRIVMSG command.
pub struct PrivmsgHandler;

#[async_trait]
impl Handler for PrivmsgHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        deliver(ctx, msg, ItemKind::Privmsg).await
    }
}

/// Handler for NOTICE command. Never produces error replies.
pub struct NoticeHandler;

#[async_trait]
impl Handler for NoticeHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        match deliver(ctx, msg, ItemKind::Notice).await {
            Err(HandlerError::NotRegistered) => Err(HandlerError::NotRegistered),
            _ => Ok(()),
        }
    }
}

async fn deliver(ctx: &Context<'_>, msg: &Message, kind: ItemKind) -> HandlerResult {
    let Some(client) = ctx.registered_client() else {
        return Err(HandlerError::NotRegistered);
    };
    let Some(targets) = msg.param(0).filter(|t| !t.is_empty()) else {
        return Err(HandlerError::NoRecipient);
    };
    let Some(text) = msg.param(1).filter(|t| !t.is_empty()) else {
        return Err(HandlerError::NoTextToSend);
    };
    let config = &ctx.config;
    let command = kind.command();
    let notice = kind == ItemKind::Notice;
    let echo = ctx.session.has_cap(Capability::EchoMessage);

    for target in targets.split(',').filter(|t| !t.is_empty()) {
        if target.starts_with('#') {
            let Some(channel) = ctx.server.channels.get(target, config.server.casemapping) else {
                if !notice {
                    ctx.reply(numeric::ERR_NOSUCHCHANNEL, [target, "No such channel"]);
                }
                continue;
            };
            if !channel.has_client(&client) {
                if !notice {
                    ctx.reply(numeric::ERR_CANNOTSENDTOCHAN, [target, "Cannot send to channel"]);
                }
                continue;
            }

            let item = history_item(&client, kind, &channel.name, text);
            let line = Message::new(Some(&item.nickmask), command, [channel.name.as_str(), text])
                .with_tag("msgid", Some(item.msgid.as_str()));
            for member in channel.members() {
                if member.id != client.id {
                    member.send(&line);
                }
            }
            if echo {
                ctx.session.send(line);
            }
            record_channel_history(ctx.server, config, &channel, item).await;
            continue;
        }

        let Some(recipient) = ctx
            .server
            .clients
            .get(target, config)
            .filter(|c| c.is_registered())
        else {
            if !notice {
                ctx.reply(numeric::ERR_NOSUCHNICK, [target, "No such nick/channel"]);
            }
            continue;
        };

        let mut item = history_item(&client, kind, &recipient.nick(), text);
        let line = Message::new(Some(&item.nickmask), command, [recipient.nick(), text.to_string()])
            .with_tag("msgid", Some(item.msgid.as_str()));
        recipient.send(&line);
        if echo {
            ctx.session.send(line);
        }

        let mut recipient_item = item.clone();
        recipient_item.correspondent = client.nick_casefolded();
        item.correspondent = recipient.nick_casefolded();
        record_client_history(ctx.server, config, &client, item).await;
        if recipient.id != client.id {
            record_client_history(ctx.server, config, &recipient, recipient_item).await;
        }
    }
    Ok(())
}
