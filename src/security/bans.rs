//! In-memory D-line and K-line store.
//!
//! D-lines ban IP networks and are checked before anything else on a new
//! connection. K-lines ban nickmasks and are checked once registration
//! knows the client's full `nick!user@host`.
//!
//! # Architecture
//!
//! - Loaded from the datastore on first config application
//! - Checked on the accept path and at the end of registration
//! - Expired bans are lazily skipped during checks and dropped by [`BanStore::prune_expired`]
//! - New bans are handed to an optional persistence channel

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use glob::{MatchOptions, Pattern};
use ipnet::IpNet;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Kind of ban, also the datastore discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)] // Traditional IRC naming: D-Line, K-Line.
pub enum BanKind {
    DLine,
    KLine,
}

impl BanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DLine => "dline",
            Self::KLine => "kline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dline" => Some(Self::DLine),
            "kline" => Some(Self::KLine),
            _ => None,
        }
    }
}

/// Details of a single ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    /// Shown to the banned user.
    pub reason: String,
    /// Shown to operators only.
    pub oper_reason: String,
    /// Who or what added the ban.
    pub source: String,
    pub created_at: DateTime<Utc>,
    /// `None` for permanent bans.
    pub duration: Option<Duration>,
}

impl BanRecord {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let duration = chrono::Duration::from_std(self.duration?).ok()?;
        Some(self.created_at + duration)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now >= expires)
    }

    /// Render the user-facing message. `template` contains one `%s`, which
    /// is replaced by the reason. Temporary bans get the remaining time
    /// appended in brackets.
    pub fn ban_message(&self, template: &str) -> String {
        let reason = if self.reason.is_empty() {
            "No reason given"
        } else {
            self.reason.as_str()
        };
        let mut message = template.replacen("%s", reason, 1);
        if let Some(expires) = self.expires_at() {
            let left = (expires - Utc::now()).num_seconds().max(0);
            message = format!("{message} [{}]", format_seconds(left));
        }
        message
    }
}

fn format_seconds(total: i64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m{seconds}s"),
        _ => format!("{hours}h{minutes}m{seconds}s"),
    }
}

/// A ban as stored in the datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBan {
    pub kind: BanKind,
    /// Network for D-lines, mask for K-lines.
    pub subject: String,
    pub record: BanRecord,
}

#[derive(Debug)]
struct MaskBan {
    pattern: Pattern,
    record: BanRecord,
}

/// Thread-safe ban store shared by the accept path and registration.
#[derive(Debug, Default)]
pub struct BanStore {
    dlines: DashMap<IpNet, BanRecord>,
    klines: DashMap<String, MaskBan>,
    persist: Mutex<Option<mpsc::UnboundedSender<StoredBan>>>,
}

impl BanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route newly added bans to the datastore writer.
    pub fn set_persistence(&self, sender: mpsc::UnboundedSender<StoredBan>) {
        *self.persist.lock() = Some(sender);
    }

    /// Populate from the datastore. Unparseable entries are skipped.
    pub fn load(&self, bans: Vec<StoredBan>) {
        let now = Utc::now();
        for ban in bans {
            if ban.record.is_expired(now) {
                continue;
            }
            match ban.kind {
                BanKind::DLine => match ban.subject.parse::<IpNet>() {
                    Ok(net) => {
                        self.dlines.insert(net, ban.record);
                    }
                    Err(e) => warn!(subject = %ban.subject, error = %e, "Skipping malformed D-line"),
                },
                BanKind::KLine => {
                    if let Err(e) = self.insert_mask(&ban.subject, ban.record) {
                        warn!(subject = %ban.subject, error = %e, "Skipping malformed K-line");
                    }
                }
            }
        }
        debug!(
            dlines = self.dlines.len(),
            klines = self.klines.len(),
            "Ban store loaded"
        );
    }

    /// Find an active D-line covering `ip`.
    pub fn check_ip(&self, ip: IpAddr) -> Option<BanRecord> {
        let now = Utc::now();
        self.dlines
            .iter()
            .find(|entry| entry.key().contains(&ip) && !entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
    }

    /// Find an active K-line matching any of the given nickmasks.
    pub fn check_masks(&self, masks: &[String]) -> Option<BanRecord> {
        let now = Utc::now();
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.klines
            .iter()
            .find(|entry| {
                let ban = entry.value();
                !ban.record.is_expired(now)
                    && masks
                        .iter()
                        .any(|mask| ban.pattern.matches_with(mask, options))
            })
            .map(|entry| entry.value().record.clone())
    }

    /// Ban a single address.
    pub fn add_ip(
        &self,
        ip: IpAddr,
        duration: Option<Duration>,
        reason: &str,
        oper_reason: &str,
        source: &str,
    ) {
        let net = IpNet::from(ip);
        let record = BanRecord {
            reason: reason.to_string(),
            oper_reason: oper_reason.to_string(),
            source: source.to_string(),
            created_at: Utc::now(),
            duration,
        };
        self.dlines.insert(net, record.clone());
        self.persist(StoredBan {
            kind: BanKind::DLine,
            subject: net.to_string(),
            record,
        });
    }

    /// Ban a nickmask. A mask without `!` applies to any nickname.
    pub fn add_mask(&self, mask: &str, record: BanRecord) -> Result<(), glob::PatternError> {
        let mask = normalize_mask(mask);
        self.insert_mask(&mask, record.clone())?;
        self.persist(StoredBan {
            kind: BanKind::KLine,
            subject: mask,
            record,
        });
        Ok(())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.dlines.len() + self.klines.len();
        self.dlines.retain(|_, record| !record.is_expired(now));
        self.klines.retain(|_, ban| !ban.record.is_expired(now));
        before - (self.dlines.len() + self.klines.len())
    }

    pub fn len(&self) -> usize {
        self.dlines.len() + self.klines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_mask(&self, mask: &str, record: BanRecord) -> Result<(), glob::PatternError> {
        let mask = normalize_mask(mask);
        let pattern = Pattern::new(&escape_brackets(&mask))?;
        self.klines.insert(mask, MaskBan { pattern, record });
        Ok(())
    }

    fn persist(&self, ban: StoredBan) {
        if let Some(sender) = self.persist.lock().as_ref()
            && sender.send(ban).is_err()
        {
            warn!("Ban persistence channel closed; ban kept in memory only");
        }
    }
}

fn normalize_mask(mask: &str) -> String {
    let mask = mask.to_ascii_lowercase();
    if mask.contains('!') {
        mask
    } else {
        format!("*!{mask}")
    }
}

/// IRC masks only use `*` and `?`; brackets are literal nickname characters.
fn escape_brackets(mask: &str) -> String {
    let mut escaped = String::with_capacity(mask.len());
    for c in mask.chars() {
        match c {
            '[' => escaped.push_str("[[]"),
            ']' => escaped.push_str("[]]"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reason: &str, duration: Option<Duration>) -> BanRecord {
        BanRecord {
            reason: reason.into(),
            oper_reason: String::new(),
            source: "test".into(),
            created_at: Utc::now(),
            duration,
        }
    }

    #[test]
    fn check_ip_matches_single_address() {
        let store = BanStore::new();
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        store.add_ip(ip, None, "flooding", "", "test");
        assert_eq!(store.check_ip(ip).unwrap().reason, "flooding");
        assert!(store.check_ip("192.0.2.8".parse().unwrap()).is_none());
    }

    #[test]
    fn loaded_network_ban_covers_subnet() {
        let store = BanStore::new();
        store.load(vec![StoredBan {
            kind: BanKind::DLine,
            subject: "198.51.100.0/24".into(),
            record: record("bad net", None),
        }]);
        assert!(store.check_ip("198.51.100.99".parse().unwrap()).is_some());
        assert!(store.check_ip("198.51.101.1".parse().unwrap()).is_none());
    }

    #[test]
    fn expired_bans_are_ignored_and_pruned() {
        let store = BanStore::new();
        let mut expired = record("old", Some(Duration::from_secs(60)));
        expired.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.dlines.insert("203.0.113.1/32".parse().unwrap(), expired);
        assert!(store.check_ip("203.0.113.1".parse().unwrap()).is_none());
        assert_eq!(store.prune_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn kline_matches_nickmask_case_insensitively() {
        let store = BanStore::new();
        store.add_mask("*@*.Example.COM", record("go away", None)).unwrap();
        let masks = vec!["alice!al@host.example.com".to_string()];
        assert!(store.check_masks(&masks).is_some());
        let masks = vec!["alice!al@example.org".to_string()];
        assert!(store.check_masks(&masks).is_none());
    }

    #[test]
    fn kline_brackets_are_literal() {
        let store = BanStore::new();
        store.add_mask("[bot]*!*@*", record("bots", None)).unwrap();
        assert!(store.check_masks(&["[bot]foo!u@h".to_string()]).is_some());
        assert!(store.check_masks(&["bfoo!u@h".to_string()]).is_none());
    }

    #[test]
    fn ban_message_formats_reason_and_time_left() {
        let permanent = record("spam", None);
        assert_eq!(
            permanent.ban_message("You are banned from this server (%s)"),
            "You are banned from this server (spam)"
        );

        let unnamed = record("", None);
        assert_eq!(unnamed.ban_message("(%s)"), "(No reason given)");

        let temporary = record("throttle", Some(Duration::from_secs(600)));
        let message = temporary.ban_message("%s");
        assert!(message.starts_with("throttle ["), "{message}");
        assert!(message.ends_with("s]"), "{message}");
    }

    #[test]
    fn new_bans_are_sent_for_persistence() {
        let store = BanStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.set_persistence(tx);
        store.add_ip("192.0.2.1".parse().unwrap(), Some(Duration::from_secs(60)), "r", "o", "s");
        let stored = rx.try_recv().unwrap();
        assert_eq!(stored.kind, BanKind::DLine);
        assert_eq!(stored.subject, "192.0.2.1/32");
        assert_eq!(stored.record.oper_reason, "o");
    }

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(BanKind::parse(BanKind::DLine.as_str()), Some(BanKind::DLine));
        assert_eq!(BanKind::parse("zline"), None);
    }
}
