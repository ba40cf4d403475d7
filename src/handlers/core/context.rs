//! Command handler context and the handler trait.

use crate::config::Config;
use crate::error::HandlerResult;
use crate::proto::Message;
use crate::server::Server;
use crate::state::{Client, Session};
use async_trait::async_trait;
use std::sync::Arc;

/// Handler context passed to each command handler.
///
/// Carries the config snapshot taken when the command arrived, so one
/// command never observes two different configurations.
pub struct Context<'a> {
    pub server: &'a Arc<Server>,
    pub session: &'a Arc<Session>,
    pub config: Arc<Config>,
}

impl<'a> Context<'a> {
    pub fn new(server: &'a Arc<Server>, session: &'a Arc<Session>) -> Self {
        Self {
            server,
            session,
            config: server.config(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.config.server.name
    }

    pub fn nick(&self) -> String {
        self.session.nick_or_star()
    }

    /// The session's client once registration has completed.
    pub fn registered_client(&self) -> Option<Arc<Client>> {
        self.session.client().filter(|c| c.is_registered())
    }

    /// Send a numeric addressed to this session's nick.
    pub fn reply<I, P>(&self, numeric: &str, params: I)
    where
        P: Into<String>,
        I: IntoIterator<Item = P>,
    {
        let mut all = vec![self.nick()];
        all.extend(params.into_iter().map(Into::into));
        self.session
            .send(Message::new(Some(self.server_name()), numeric, all));
    }
}

/// A command handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult;

    /// Commands that may only be used once registration has completed.
    fn requires_registration(&self) -> bool {
        true
    }
}
