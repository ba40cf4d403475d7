//! Reply builders and history recording shared across handlers.

use crate::config::Config;
use crate::history::{HistoryStatus, Item, ItemKind};
use crate::proto::Message;
use crate::server::Server;
use crate::state::{Channel, Client};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

/// A numeric or command from the server.
pub fn server_reply<I, P>(server_name: &str, command: &str, params: I) -> Message
where
    P: Into<String>,
    I: IntoIterator<Item = P>,
{
    Message::new(Some(server_name), command, params)
}

/// A server NOTICE to `target`.
pub fn server_notice(server_name: &str, target: &str, text: &str) -> Message {
    Message::new(Some(server_name), "NOTICE", [target, text])
}

/// Split `tokens` into space-joined lines no longer than `max_len` bytes.
/// A single oversized token gets a line of its own.
pub fn join_lines(tokens: &[String], max_len: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for token in tokens {
        if !current.is_empty() && current.len() + 1 + token.len() > max_len {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(token);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// A new history item authored by `author`.
pub fn history_item(author: &Client, kind: ItemKind, target: &str, text: &str) -> Item {
    Item {
        msgid: Uuid::new_v4().simple().to_string(),
        time: Utc::now(),
        kind,
        nickmask: author.nickmask(),
        account_name: author.account_name(),
        target: target.to_string(),
        correspondent: String::new(),
        text: text.to_string(),
    }
}

/// Record `item` wherever the channel keeps its history.
pub async fn record_channel_history(server: &Server, config: &Config, channel: &Channel, item: Item) {
    let (status, target) = channel.history_status(config);
    match status {
        HistoryStatus::Disabled => {}
        HistoryStatus::Ephemeral => channel.history().add(item),
        HistoryStatus::Persistent => {
            if let Err(e) = server.history_db().store(&target, &item).await {
                warn!(channel = %channel.name, error = %e, "Failed to store channel history");
            }
        }
    }
}

/// Record one side of a conversation in `owner`'s history.
pub async fn record_client_history(server: &Server, config: &Config, owner: &Client, item: Item) {
    let (status, target) = owner.history_status(config);
    match status {
        HistoryStatus::Disabled => {}
        HistoryStatus::Ephemeral => owner.history().add(item),
        HistoryStatus::Persistent => {
            if let Err(e) = server.history_db().store(&target, &item).await {
                warn!(nick = %owner.nick(), error = %e, "Failed to store conversation history");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_lines_respects_limit() {
        let tokens: Vec<String> = ["aaaa", "bbbb", "cccc"].iter().map(|s| s.to_string()).collect();
        assert_eq!(join_lines(&tokens, 9), ["aaaa bbbb", "cccc"]);
        assert_eq!(join_lines(&tokens, 100), ["aaaa bbbb cccc"]);
        assert_eq!(join_lines(&[], 10), [""]);
    }

    #[test]
    fn notice_has_trailing_text() {
        assert_eq!(
            server_notice("irc.test", "alice", "hello there").to_string(),
            ":irc.test NOTICE alice :hello there"
        );
    }
}
