//! RPL_ISUPPORT token table.
//!
//! Built once per config snapshot. The cached reply is split into lines of
//! at most [`MAX_TOKENS_PER_LINE`] tokens, and [`ISupportList::difference`]
//! produces the lines pushed to clients after a rehash.

use std::collections::BTreeMap;

pub const MAX_TOKENS_PER_LINE: usize = 13;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ISupportList {
    tokens: BTreeMap<String, String>,
    cached_reply: Vec<Vec<String>>,
}

impl ISupportList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.tokens.insert(name.to_string(), value.into());
    }

    pub fn add_no_value(&mut self, name: &str) {
        self.tokens.insert(name.to_string(), String::new());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.tokens.get(name).map(String::as_str)
    }

    /// Rebuild the cached reply lines from the token table.
    pub fn regenerate_cached_reply(&mut self) {
        let tokens: Vec<String> = self
            .tokens
            .iter()
            .map(|(name, value)| format_token(name, value))
            .collect();
        self.cached_reply = chunk(tokens);
    }

    pub fn cached_reply(&self) -> &[Vec<String>] {
        &self.cached_reply
    }

    /// Lines announcing what changed from `self` to `newer`. Removed tokens
    /// are sent as `-NAME`.
    pub fn difference(&self, newer: &ISupportList) -> Vec<Vec<String>> {
        let mut changed = Vec::new();
        for (name, value) in &newer.tokens {
            if self.tokens.get(name) != Some(value) {
                changed.push(format_token(name, value));
            }
        }
        for name in self.tokens.keys() {
            if !newer.tokens.contains_key(name) {
                changed.push(format!("-{name}"));
            }
        }
        chunk(changed)
    }
}

fn format_token(name: &str, value: &str) -> String {
    if value.is_empty() {
        name.to_string()
    } else {
        format!("{name}={value}")
    }
}

fn chunk(tokens: Vec<String>) -> Vec<Vec<String>> {
    tokens
        .chunks(MAX_TOKENS_PER_LINE)
        .map(<[String]>::to_vec)
        .collect()
}
