//! Nickname, account and channel name casefolding.

use serde::Deserialize;
use thiserror::Error;

/// Server-wide case mapping. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Casemapping {
    #[default]
    Ascii,
    Rfc1459,
}

impl Casemapping {
    pub fn isupport_name(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Rfc1459 => "rfc1459",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CasefoldError {
    #[error("name is empty")]
    Empty,
    #[error("name contains forbidden character {0:?}")]
    ForbiddenChar(char),
    #[error("name may not begin with {0:?}")]
    ForbiddenLeading(char),
    #[error("non-ASCII names are not permitted with ascii casemapping")]
    NonAscii,
    #[error("channel names must begin with '#'")]
    NotAChannel,
}

const FORBIDDEN: &[char] = &[' ', ',', '*', '?', '!', '@', '.', ':', '\0', '\r', '\n'];
const FORBIDDEN_LEADING: &[char] = &['#', '&', '$', '~', '+', '%', '-'];

/// Lowercase without validation.
pub fn fold(name: &str, mapping: Casemapping) -> String {
    name.chars()
        .map(|c| match (mapping, c) {
            (Casemapping::Rfc1459, '[') => '{',
            (Casemapping::Rfc1459, ']') => '}',
            (Casemapping::Rfc1459, '\\') => '|',
            (Casemapping::Rfc1459, '~') => '^',
            _ => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Casefold a nickname or account name, rejecting names that cannot be
/// addressed unambiguously.
pub fn casefold_name(name: &str, mapping: Casemapping) -> Result<String, CasefoldError> {
    let first = name.chars().next().ok_or(CasefoldError::Empty)?;
    if FORBIDDEN_LEADING.contains(&first) {
        return Err(CasefoldError::ForbiddenLeading(first));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(CasefoldError::ForbiddenChar(c));
    }
    if mapping == Casemapping::Ascii && !name.is_ascii() {
        return Err(CasefoldError::NonAscii);
    }
    Ok(fold(name, mapping))
}

/// Casefold a channel name. Only `#` channels exist.
pub fn casefold_channel(name: &str, mapping: Casemapping) -> Result<String, CasefoldError> {
    if name.is_empty() {
        return Err(CasefoldError::Empty);
    }
    if !name.starts_with('#') {
        return Err(CasefoldError::NotAChannel);
    }
    if let Some(c) = name.chars().find(|c| matches!(c, ' ' | ',' | '\x07' | '\0' | '\r' | '\n')) {
        return Err(CasefoldError::ForbiddenChar(c));
    }
    if mapping == Casemapping::Ascii && !name.is_ascii() {
        return Err(CasefoldError::NonAscii);
    }
    Ok(fold(name, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_folding() {
        assert_eq!(casefold_name("Alice", Casemapping::Ascii).unwrap(), "alice");
        assert_eq!(casefold_name("[Bob]", Casemapping::Ascii).unwrap(), "[bob]");
    }

    #[test]
    fn rfc1459_folds_brackets() {
        assert_eq!(casefold_name("[Bob]", Casemapping::Rfc1459).unwrap(), "{bob}");
        assert_eq!(fold("A\\B~", Casemapping::Rfc1459), "a|b^");
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(casefold_name("", Casemapping::Ascii), Err(CasefoldError::Empty));
        assert_eq!(
            casefold_name("#chan", Casemapping::Ascii),
            Err(CasefoldError::ForbiddenLeading('#'))
        );
        assert_eq!(
            casefold_name("a b", Casemapping::Ascii),
            Err(CasefoldError::ForbiddenChar(' '))
        );
        assert_eq!(casefold_name("café", Casemapping::Ascii), Err(CasefoldError::NonAscii));
    }

    #[test]
    fn channels_need_a_hash() {
        assert_eq!(casefold_channel("#Rust", Casemapping::Ascii).unwrap(), "#rust");
        assert_eq!(
            casefold_channel("rust", Casemapping::Ascii),
            Err(CasefoldError::NotAChannel)
        );
    }
}
