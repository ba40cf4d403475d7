//! Minimal IRC line model.
//!
//! Only what the session and control paths need: tags, an optional prefix,
//! a command and its parameters. Lines are parsed without their trailing
//! CRLF and serialized without one; the writer appends it.

use std::fmt;
use thiserror::Error;

/// Numeric replies used by the registration and control paths.
pub mod numeric {
    pub const RPL_WELCOME: &str = "001";
    pub const RPL_YOURHOST: &str = "002";
    pub const RPL_CREATED: &str = "003";
    pub const RPL_MYINFO: &str = "004";
    pub const RPL_ISUPPORT: &str = "005";
    pub const RPL_UMODEIS: &str = "221";
    pub const RPL_LUSERCLIENT: &str = "251";
    pub const RPL_LUSEROP: &str = "252";
    pub const RPL_LUSERUNKNOWN: &str = "253";
    pub const RPL_LUSERCHANNELS: &str = "254";
    pub const RPL_LUSERME: &str = "255";
    pub const RPL_LOCALUSERS: &str = "265";
    pub const RPL_GLOBALUSERS: &str = "266";
    pub const RPL_LIST: &str = "322";
    pub const RPL_LISTEND: &str = "323";
    pub const RPL_VERSION: &str = "351";
    pub const RPL_NAMREPLY: &str = "353";
    pub const RPL_ENDOFNAMES: &str = "366";
    pub const RPL_MOTD: &str = "372";
    pub const RPL_MOTDSTART: &str = "375";
    pub const RPL_ENDOFMOTD: &str = "376";
    pub const RPL_YOUREOPER: &str = "381";
    pub const RPL_REHASHING: &str = "382";
    pub const ERR_NOSUCHNICK: &str = "401";
    pub const ERR_NOSUCHCHANNEL: &str = "403";
    pub const ERR_CANNOTSENDTOCHAN: &str = "404";
    pub const ERR_NORECIPIENT: &str = "411";
    pub const ERR_NOTEXTTOSEND: &str = "412";
    pub const ERR_INPUTTOOLONG: &str = "417";
    pub const ERR_UNKNOWNCOMMAND: &str = "421";
    pub const ERR_NOMOTD: &str = "422";
    pub const ERR_NONICKNAMEGIVEN: &str = "431";
    pub const ERR_ERRONEUSNICKNAME: &str = "432";
    pub const ERR_NICKNAMEINUSE: &str = "433";
    pub const ERR_NOTONCHANNEL: &str = "442";
    pub const ERR_NOTREGISTERED: &str = "451";
    pub const ERR_NEEDMOREPARAMS: &str = "461";
    pub const ERR_ALREADYREGISTRED: &str = "462";
    pub const ERR_PASSWDMISMATCH: &str = "464";
    pub const ERR_YOUREBANNEDCREEP: &str = "465";
    pub const ERR_NOPRIVILEGES: &str = "481";
    pub const ERR_INVALIDCAPCMD: &str = "410";
    pub const RPL_HELPSTART: &str = "704";
    pub const RPL_HELPTXT: &str = "705";
    pub const RPL_ENDOFHELP: &str = "706";
    pub const ERR_HELPNOTFOUND: &str = "524";
    pub const RPL_MONONLINE: &str = "730";
    pub const RPL_MONOFFLINE: &str = "731";
    pub const RPL_MONLIST: &str = "732";
    pub const RPL_ENDOFMONLIST: &str = "733";
    pub const ERR_MONLISTFULL: &str = "734";
    pub const RPL_LOGGEDIN: &str = "900";
    pub const RPL_SASLSUCCESS: &str = "903";
    pub const ERR_SASLFAIL: &str = "904";
    pub const ERR_SASLABORTED: &str = "906";
    pub const ERR_SASLALREADY: &str = "907";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("missing command")]
    MissingCommand,
}

/// A single protocol line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub tags: Vec<(String, Option<String>)>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new<P, I>(prefix: Option<&str>, command: &str, params: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = P>,
    {
        Self {
            tags: Vec::new(),
            prefix: prefix.map(str::to_owned),
            command: command.to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: Option<&str>) -> Self {
        self.tags.push((key.to_owned(), value.map(str::to_owned)));
        self
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut tags = Vec::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
            for tag in raw.split(';').filter(|t| !t.is_empty()) {
                match tag.split_once('=') {
                    Some((k, v)) => tags.push((k.to_owned(), Some(v.to_owned()))),
                    None => tags.push((tag.to_owned(), None)),
                }
            }
            rest = remainder.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
            prefix = Some(p.to_owned());
            rest = remainder.trim_start_matches(' ');
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            let (param, remainder) = rest.split_once(' ').unwrap_or((rest, ""));
            params.push(param.to_owned());
            rest = remainder;
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            f.write_str("@")?;
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                match value {
                    Some(v) => write!(f, "{key}={v}")?,
                    None => f.write_str(key)?,
                }
            }
            f.write_str(" ")?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_command_and_trailing() {
        let msg = Message::parse(":nick!u@h privmsg #chan :hello world\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("nick!u@h"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "hello world"]);
    }

    #[test]
    fn parses_tags() {
        let msg = Message::parse("@label=abc;draft/flag CAP LS 302").unwrap();
        assert_eq!(msg.tags.len(), 2);
        assert_eq!(msg.tags[0], ("label".into(), Some("abc".into())));
        assert_eq!(msg.tags[1], ("draft/flag".into(), None));
        assert_eq!(msg.params, vec!["LS", "302"]);
    }

    #[test]
    fn rejects_empty_lines() {
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(Message::parse("@a=b "), Err(ParseError::MissingCommand));
    }

    #[test]
    fn serializes_trailing_only_when_needed() {
        let msg = Message::new(Some("irc.test"), "001", ["alice", "Welcome home"]);
        assert_eq!(msg.to_string(), ":irc.test 001 alice :Welcome home");

        let msg = Message::new(None::<&str>, "PONG", ["irc.test"]);
        assert_eq!(msg.to_string(), "PONG irc.test");

        let msg = Message::new(None::<&str>, "CAP", ["*", "LS", ""]);
        assert_eq!(msg.to_string(), "CAP * LS :");
    }
}
