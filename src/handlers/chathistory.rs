//! CHATHISTORY replay.
//!
//! `CHATHISTORY LATEST|BEFORE|AFTER <target> <timestamp=...|*> <limit>`

use super::{Context, Handler};
use crate::caps::Capability;
use crate::error::{HandlerError, HandlerResult};
use crate::history::{HistoryError, Item};
use crate::proto::Message;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Latest,
    Before,
    After,
}

/// Parse `timestamp=<rfc3339>`; `*` means no bound.
fn parse_bound(param: &str) -> Result<Option<DateTime<Utc>>, ()> {
    if param == "*" {
        return Ok(None);
    }
    let raw = param.strip_prefix("timestamp=").ok_or(())?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|_| ())
}

/// Handler for CHATHISTORY command.
pub struct ChatHistoryHandler;

#[async_trait]
impl Handler for ChatHistoryHandler {
    async fn handle(&self, ctx: &Context<'_>, msg: &Message) -> HandlerResult {
        let Some(client) = ctx.registered_client() else {
            return Err(HandlerError::NotRegistered);
        };
        if msg.params.len() < 4 {
            return Err(HandlerError::NeedMoreParams);
        }
        let direction = match msg.params[0].to_ascii_uppercase().as_str() {
            "LATEST" => Direction::Latest,
            "BEFORE" => Direction::Before,
            "AFTER" => Direction::After,
            other => {
                fail(ctx, "INVALID_PARAMS", other, "Unknown subcommand");
                return Ok(());
            }
        };
        let target = msg.params[1].as_str();
        let Ok(bound) = parse_bound(&msg.params[2]) else {
            fail(ctx, "INVALID_PARAMS", target, "Invalid timestamp");
            return Ok(());
        };
        let max = ctx.config.history.persistent.max_results.max(1);
        let limit = msg.params[3].parse::<usize>().unwrap_or(max).clamp(1, max);

        let sequence = match ctx.server.get_history_sequence(None, &client, target) {
            Ok((_, sequence)) => sequence,
            Err(HistoryError::InsufficientPrivileges) => {
                fail(ctx, "INVALID_TARGET", target, "Messages could not be retrieved");
                return Ok(());
            }
            Err(e) => {
                warn!(target, error = %e, "History lookup failed");
                fail(ctx, "MESSAGE_ERROR", target, "Messages could not be retrieved");
                return Ok(());
            }
        };

        let items = match sequence {
            None => Vec::new(),
            Some(sequence) => {
                let result = match direction {
                    Direction::Latest if bound.is_none() => sequence.latest(limit).await,
                    Direction::Latest | Direction::After => sequence.between(bound, None, limit).await,
                    Direction::Before => sequence.between(None, bound, limit).await,
                };
                match result {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(target, error = %e, "History read failed");
                        fail(ctx, "MESSAGE_ERROR", target, "Messages could not be retrieved");
                        return Ok(());
                    }
                }
            }
        };

        replay(ctx, target, &items);
        Ok(())
    }
}

fn fail(ctx: &Context<'_>, code: &str, context: &str, text: &str) {
    ctx.session.send(Message::new(
        Some(ctx.server_name()),
        "FAIL",
        ["CHATHISTORY", code, context, text],
    ));
}

fn replay(ctx: &Context<'_>, target: &str, items: &[Item]) {
    let batch = ctx
        .session
        .has_cap(Capability::Batch)
        .then(|| Uuid::new_v4().simple().to_string());

    if let Some(id) = &batch {
        ctx.session.send(Message::new(
            Some(ctx.server_name()),
            "BATCH",
            [format!("+{id}"), "chathistory".to_string(), target.to_string()],
        ));
    }
    for item in items {
        let params = if item.text.is_empty() {
            vec![item.target.clone()]
        } else {
            vec![item.target.clone(), item.text.clone()]
        };
        let mut line = Message::new(Some(&item.nickmask), item.kind.command(), params)
            .with_tag("time", Some(item.time.to_rfc3339_opts(SecondsFormat::Millis, true).as_str()))
            .with_tag("msgid", Some(item.msgid.as_str()));
        if let Some(id) = &batch {
            line = line.with_tag("batch", Some(id.as_str()));
        }
        ctx.session.send(line);
    }
    if let Some(id) = batch {
        ctx.session
            .send(Message::new(Some(ctx.server_name()), "BATCH", [format!("-{id}")]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        assert_eq!(parse_bound("*"), Ok(None));
        assert!(parse_bound("timestamp=2024-05-01T10:00:00.000Z").unwrap().is_some());
        assert!(parse_bound("msgid=abc").is_err());
        assert!(parse_bound("timestamp=yesterday").is_err());
    }
}
