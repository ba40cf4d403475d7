//! Unified error handling for lattice-ircd.
//!
//! Command handlers return [`HandlerError`]; the registry turns the
//! client-visible ones into numerics and the connection loop turns
//! `Quit`/`Exited` into a disconnect. Errors owned by a single concern
//! (config, datastore, history, listeners) live next to that concern.

use crate::proto::{Message, numeric};
use thiserror::Error;

// ============================================================================
// Handler Errors (command processing)
// ============================================================================

/// Errors that can occur during command handling.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not enough parameters")]
    NeedMoreParams,

    #[error("no text to send")]
    NoTextToSend,

    #[error("no recipient given")]
    NoRecipient,

    #[error("not registered")]
    NotRegistered,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("no such nick: {0}")]
    NoSuchNick(String),

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("not on channel: {0}")]
    NotOnChannel(String),

    #[error("permission denied")]
    NoPrivileges,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The client sent QUIT.
    #[error("client quit: {0:?}")]
    Quit(Option<String>),

    /// The server ended the session; the explanatory line was already sent.
    #[error("session exited: {0}")]
    Exited(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams => "need_more_params",
            Self::NoTextToSend => "no_text_to_send",
            Self::NoRecipient => "no_recipient",
            Self::NotRegistered => "not_registered",
            Self::AlreadyRegistered => "already_registered",
            Self::NoSuchNick(_) => "no_such_nick",
            Self::NoSuchChannel(_) => "no_such_channel",
            Self::NotOnChannel(_) => "not_on_channel",
            Self::NoPrivileges => "no_privileges",
            Self::UnknownCommand(_) => "unknown_command",
            Self::Quit(_) => "quit",
            Self::Exited(_) => "exited",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to an IRC error reply message.
    ///
    /// Returns `None` for errors that don't warrant a client-visible reply.
    pub fn to_irc_reply(&self, server_name: &str, nick: &str, cmd_name: &str) -> Option<Message> {
        let (code, params): (&str, Vec<String>) = match self {
            Self::NeedMoreParams => (
                numeric::ERR_NEEDMOREPARAMS,
                vec![cmd_name.to_string(), "Not enough parameters".to_string()],
            ),
            Self::NoTextToSend => (numeric::ERR_NOTEXTTOSEND, vec!["No text to send".to_string()]),
            Self::NoRecipient => (
                numeric::ERR_NORECIPIENT,
                vec![format!("No recipient given ({cmd_name})")],
            ),
            Self::NotRegistered => (
                numeric::ERR_NOTREGISTERED,
                vec!["You have not registered".to_string()],
            ),
            Self::AlreadyRegistered => (
                numeric::ERR_ALREADYREGISTRED,
                vec!["You may not reregister".to_string()],
            ),
            Self::NoSuchNick(target) => (
                numeric::ERR_NOSUCHNICK,
                vec![target.clone(), "No such nick/channel".to_string()],
            ),
            Self::NoSuchChannel(channel) => (
                numeric::ERR_NOSUCHCHANNEL,
                vec![channel.clone(), "No such channel".to_string()],
            ),
            Self::NotOnChannel(channel) => (
                numeric::ERR_NOTONCHANNEL,
                vec![channel.clone(), "You're not on that channel".to_string()],
            ),
            Self::NoPrivileges => (
                numeric::ERR_NOPRIVILEGES,
                vec!["Permission Denied - You're not an IRC operator".to_string()],
            ),
            Self::UnknownCommand(cmd) => (
                numeric::ERR_UNKNOWNCOMMAND,
                vec![cmd.clone(), "Unknown command".to_string()],
            ),

            // These errors don't get client-visible replies
            Self::Quit(_) | Self::Exited(_) | Self::Internal(_) => return None,
        };

        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(nick.to_string());
        all.extend(params);
        Some(Message::new(Some(server_name), code, all))
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;
