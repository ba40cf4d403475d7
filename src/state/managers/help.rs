//! HELP topic indices.
//!
//! One index per enabled language, rebuilt on rehash. Only English text
//! ships with the server; other languages fall back to it.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

const DEFAULT_LANGUAGE: &str = "en";

/// Static help text for commands.
const HELP_TOPICS: &[(&str, &[&str])] = &[
    ("CAP", &["CAP LS|LIST|REQ|END [args]", "IRCv3 capability negotiation."]),
    (
        "CHATHISTORY",
        &["CHATHISTORY LATEST <target> * <limit>", "Replays recent history for a target."],
    ),
    ("HELP", &["HELP [command]", "Shows help for a command, or lists all commands."]),
    ("JOIN", &["JOIN <channel>[,channel...]", "Joins one or more channels."]),
    ("LIST", &["LIST [>n][,<n]", "Lists channels, optionally filtered by member count."]),
    ("LUSERS", &["LUSERS", "Returns user statistics."]),
    ("MONITOR", &["MONITOR +|-|C|L [nick[,nick...]]", "Online status notifications."]),
    ("MOTD", &["MOTD", "Returns the message of the day."]),
    ("NICK", &["NICK <nickname>", "Sets or changes your nickname."]),
    ("PART", &["PART <channel>[,channel...]", "Leaves one or more channels."]),
    ("PASS", &["PASS <password>", "Sets the connection password."]),
    ("PING", &["PING <token>", "Checks that the connection is alive."]),
    ("PRIVMSG", &["PRIVMSG <target> <text>", "Sends a message to a user or channel."]),
    ("QUIT", &["QUIT [reason]", "Disconnects from the server."]),
    ("REHASH", &["REHASH", "Reloads the configuration file (IRC operators only)."]),
    ("USER", &["USER <username> 0 * <realname>", "Sets your username and realname."]),
    ("VERSION", &["VERSION", "Returns the server version and ISUPPORT tokens."]),
];

type Index = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default)]
pub struct HelpIndexManager {
    indices: RwLock<HashMap<String, Index>>,
}

impl HelpIndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index for each enabled language.
    pub fn generate_indices(&self, languages: &[String]) {
        let english: Index = HELP_TOPICS
            .iter()
            .map(|(topic, lines)| {
                (topic.to_string(), lines.iter().map(|l| l.to_string()).collect())
            })
            .collect();
        let mut indices = HashMap::new();
        for language in languages {
            indices.insert(language.to_ascii_lowercase(), english.clone());
        }
        indices.insert(DEFAULT_LANGUAGE.to_string(), english);
        *self.indices.write() = indices;
    }

    /// Help text for `topic` in `language`, falling back to English.
    pub fn lookup(&self, language: &str, topic: &str) -> Option<Vec<String>> {
        let indices = self.indices.read();
        let topic = topic.to_ascii_uppercase();
        indices
            .get(&language.to_ascii_lowercase())
            .and_then(|index| index.get(&topic))
            .or_else(|| indices.get(DEFAULT_LANGUAGE)?.get(&topic))
            .cloned()
    }

    pub fn topics(&self) -> Vec<String> {
        self.indices
            .read()
            .get(DEFAULT_LANGUAGE)
            .map(|index| index.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<_> = self.indices.read().keys().cloned().collect();
        languages.sort();
        languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_english() {
        let help = HelpIndexManager::new();
        assert!(help.lookup("en", "nick").is_none());
        help.generate_indices(&["de".to_string()]);
        assert_eq!(help.languages(), vec!["de", "en"]);
        assert_eq!(help.lookup("fr", "nick").unwrap()[0], "NICK <nickname>");
        assert!(help.lookup("de", "nosuchtopic").is_none());
        assert!(help.topics().contains(&"REHASH".to_string()));
    }
}
