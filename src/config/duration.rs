//! Human-friendly durations in config files.
//!
//! Accepts either an integer number of seconds or a string like `"30d"`,
//! `"24h"`, `"10m"`, `"45s"`, or a concatenation such as `"1h30m"`.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Parse a duration string. `"0"` and `""` mean zero.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let num: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {s:?}: missing number before {c:?}"))?;
        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return Err(format!("invalid duration {s:?}: unknown unit {c:?}")),
        };
        total = total.saturating_add(num.saturating_mul(unit));
        digits.clear();
    }
    if !digits.is_empty() {
        // Bare trailing number counts as seconds.
        let num: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;
        total = total.saturating_add(num);
    }
    Ok(Duration::from_secs(total))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// `#[serde(deserialize_with = "...")]` adapter.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration_string(&text).map_err(serde::de::Error::custom),
    }
}
