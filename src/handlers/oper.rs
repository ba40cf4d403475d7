//! Operator commands.

use super::{Context, Handler, server_notice};
use crate::error::{HandlerError, HandlerResult};
use crate::proto::{Message, numeric};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Handler for REHASH command.
///
/// Runs the rehash on its own task; the result arrives as a NOTICE.
pub struct RehashHandler;

#[async_trait]
impl Handler for RehashHandler {
    async fn handle(&self, ctx: &Context<'_>, _msg: &Message) -> HandlerResult {
        let Some(client) = ctx.registered_client() else {
            return Err(HandlerError::NotRegistered);
        };
        let Some(oper) = client.oper() else {
            return Err(HandlerError::NoPrivileges);
        };

        let path = ctx
            .server
            .config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        ctx.reply(numeric::RPL_REHASHING, [path, "Rehashing".to_string()]);
        info!(nick = %client.nick(), %oper, "REHASH requested");

        let server = Arc::clone(ctx.server);
        tokio::spawn(async move {
            let text = match server.rehash().await {
                Ok(()) => "Rehash complete".to_string(),
                Err(e) => {
                    warn!(error = %e, "Operator rehash failed");
                    format!("Rehash failed: {e}")
                }
            };
            let config = server.config();
            client.send(&server_notice(&config.server.name, &client.nick(), &text));
        });
        Ok(())
    }
}
