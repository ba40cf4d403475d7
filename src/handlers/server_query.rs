//! Server query handlers: MOTD, LUSERS, VERSION, HELP and LIST.

use super::{Context, Handler, burst};
use crate::error::HandlerResult;
use crate::proto::{Message, numeric};
use crate::state::ElistMatcher;
use async_trait::async_trait;

fn send_all(ctx: &Context<'_>, messages: Vec<Message>) {
    for message in messages {
        ctx.session.send(message);
    }
}

/// Handler for MOTD command.
pub struct MotdHandler;

#[async_trait]
impl Handler for MotdHandler {
    async fn handle(&self, ctx: &Context<'_>, _msg: &Message) -> HandlerResult {
        send_all(ctx, burst::motd(&ctx.config, &ctx.nick()));
        Ok(())
    }
}

/// Handler for LUSERS command.
pub struct LusersHandler;

#[async_trait]
impl Handler for LusersHandler {
    async fn handle(&self, ctx: &Context<'_>, _msg: &Message) -> HandlerResult {
        send_all(ctx, burst::lusers(ctx.server, &ctx.config, &ctx.nick()));
        Ok(())
    }
}

/// Handler for VERSION command.
///
/// Replies with 351 followed by the ISUPPORT lines.
pub struct VersionHandler;

#[async_trait]
impl Handler for VersionHandler {
    async fn handle(&self, ctx: &Context<'_>, _msg: &Message) -> HandlerResult {
        ctx.reply(
            numeric::RPL_VERSION,
            [burst::SERVER_VERSION, ctx.server_name(), ""],
        );
        send_all(ctx, burst::isupport(&ctx.config, &ctx.nick()));
        Ok(())
    }
}

/// Handler for HELP command.
pub struct HelpHandler;

#[async_trait]
impl Handler for HelpHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let topic = msg.param(0).unwrap_or("index").to_ascii_uppercase();

        let lines = if topic == "INDEX" {
            Some(vec![
                "Available topics:".to_string(),
                ctx.server.help.topics().join(" "),
            ])
        } else {
            ctx.server.help.lookup("en", &topic)
        };

        let Some(lines) = lines else {
            ctx.reply(numeric::ERR_HELPNOTFOUND, [topic.as_str(), "No help available on this topic"]);
            return Ok(());
        };

        let mut lines = lines.into_iter();
        let first = lines.next().unwrap_or_default();
        ctx.reply(numeric::RPL_HELPSTART, [topic.clone(), first]);
        for line in lines {
            ctx.reply(numeric::RPL_HELPTXT, [topic.clone(), line]);
        }
        ctx.reply(numeric::RPL_ENDOFHELP, [topic, "End of /HELP".to_string()]);
        Ok(())
    }
}

/// Handler for LIST command.
///
/// `LIST [>n][,<n]` filters on member count.
pub struct ListHandler;

#[async_trait]
impl Handler for ListHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let matcher = msg.param(0).and_then(ElistMatcher::parse);
        for channel in ctx.server.channels.list(matcher.as_ref()) {
            ctx.reply(
                numeric::RPL_LIST,
                [channel.name.clone(), channel.member_count().to_string(), String::new()],
            );
        }
        ctx.reply(numeric::RPL_LISTEND, ["End of /LIST"]);
        Ok(())
    }
}
