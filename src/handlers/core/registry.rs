//! Command handler registry and dispatch.
//!
//! The `Registry` maps command names to handlers. Known commands are
//! counted in the `irc_commands_total` metric.

use super::context::{Context, Handler};
use crate::error::{HandlerError, HandlerResult};
use crate::handlers::{
    cap::{AuthenticateHandler, CapHandler},
    channel::{JoinHandler, PartHandler},
    chathistory::ChatHistoryHandler,
    connection::{NickHandler, PassHandler, PingHandler, PongHandler, QuitHandler, ResumeHandler, UserHandler},
    messaging::{NoticeHandler, PrivmsgHandler},
    monitor::MonitorHandler,
    oper::RehashHandler,
    server_query::{HelpHandler, ListHandler, LusersHandler, MotdHandler, VersionHandler},
};
use crate::metrics;
use crate::proto::Message;
use std::collections::HashMap;
use tracing::{Instrument, Level, debug, span};

/// Registry of command handlers.
pub struct Registry {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
}

impl Registry {
    /// Create a registry with every handler registered.
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn Handler>> = HashMap::new();

        // Connection/registration handlers
        handlers.insert("PASS", Box::new(PassHandler));
        handlers.insert("NICK", Box::new(NickHandler));
        handlers.insert("USER", Box::new(UserHandler));
        handlers.insert("RESUME", Box::new(ResumeHandler));
        handlers.insert("PING", Box::new(PingHandler));
        handlers.insert("PONG", Box::new(PongHandler));
        handlers.insert("QUIT", Box::new(QuitHandler));
        handlers.insert("CAP", Box::new(CapHandler));
        handlers.insert("AUTHENTICATE", Box::new(AuthenticateHandler));

        // Channel and messaging handlers
        handlers.insert("JOIN", Box::new(JoinHandler));
        handlers.insert("PART", Box::new(PartHandler));
        handlers.insert("PRIVMSG", Box::new(PrivmsgHandler));
        handlers.insert("NOTICE", Box::new(NoticeHandler));
        handlers.insert("CHATHISTORY", Box::new(ChatHistoryHandler));
        handlers.insert("MONITOR", Box::new(MonitorHandler));

        // Server query handlers
        handlers.insert("MOTD", Box::new(MotdHandler));
        handlers.insert("LUSERS", Box::new(LusersHandler));
        handlers.insert("VERSION", Box::new(VersionHandler));
        handlers.insert("HELP", Box::new(HelpHandler));
        handlers.insert("LIST", Box::new(ListHandler));

        // Operator handlers
        handlers.insert("REHASH", Box::new(RehashHandler));

        Self { handlers }
    }

    /// Dispatch a message to its handler.
    pub async fn dispatch(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let cmd_name = msg.command.to_ascii_uppercase();

        let Some((&name, handler)) = self.handlers.get_key_value(cmd_name.as_str()) else {
            return Err(HandlerError::UnknownCommand(cmd_name));
        };
        metrics::record_command(name);

        if handler.requires_registration() && ctx.registered_client().is_none() {
            return Err(HandlerError::NotRegistered);
        }

        let irc_span = span!(
            Level::DEBUG,
            "irc.command",
            command = %cmd_name,
            session = ctx.session.id,
            remote_addr = %ctx.session.ip,
        );
        let result = handler.handle(ctx, msg).instrument(irc_span).await;

        if let Err(ref e) = result {
            debug!(command = %cmd_name, error = %e, kind = e.error_code(), "Command error");
        }
        result
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
