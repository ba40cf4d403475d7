//! IRCv3 client capabilities.
//!
//! The set of advertised capabilities is derived from the active config
//! snapshot. When a rehash changes that set, subscribed sessions are told
//! through `CAP DEL` and `CAP NEW`; see [`CapabilityDiff`].

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    AccountNotify,
    AccountTag,
    AwayNotify,
    Batch,
    CapNotify,
    ChgHost,
    Chathistory,
    EchoMessage,
    ExtendedJoin,
    InviteNotify,
    LabeledResponse,
    MessageTags,
    MultiPrefix,
    Resume,
    Sasl,
    ServerTime,
    SetName,
    Sts,
    UserhostInNames,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[
        Capability::AccountNotify,
        Capability::AccountTag,
        Capability::AwayNotify,
        Capability::Batch,
        Capability::CapNotify,
        Capability::ChgHost,
        Capability::Chathistory,
        Capability::EchoMessage,
        Capability::ExtendedJoin,
        Capability::InviteNotify,
        Capability::LabeledResponse,
        Capability::MessageTags,
        Capability::MultiPrefix,
        Capability::Resume,
        Capability::Sasl,
        Capability::ServerTime,
        Capability::SetName,
        Capability::Sts,
        Capability::UserhostInNames,
    ];

    /// Capabilities offered on STS-only listeners.
    pub const STS_ONLY: &'static [Capability] = &[
        Capability::Batch,
        Capability::EchoMessage,
        Capability::LabeledResponse,
        Capability::MessageTags,
        Capability::ServerTime,
        Capability::Sts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::AccountNotify => "account-notify",
            Self::AccountTag => "account-tag",
            Self::AwayNotify => "away-notify",
            Self::Batch => "batch",
            Self::CapNotify => "cap-notify",
            Self::ChgHost => "chghost",
            Self::Chathistory => "draft/chathistory",
            Self::EchoMessage => "echo-message",
            Self::ExtendedJoin => "extended-join",
            Self::InviteNotify => "invite-notify",
            Self::LabeledResponse => "labeled-response",
            Self::MessageTags => "message-tags",
            Self::MultiPrefix => "multi-prefix",
            Self::Resume => "draft/resume-0.5",
            Self::Sasl => "sasl",
            Self::ServerTime => "server-time",
            Self::SetName => "setname",
            Self::Sts => "sts",
            Self::UserhostInNames => "userhost-in-names",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|cap| cap.name() == name)
    }
}

/// Negotiation version a session announced with `CAP LS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CapVersion {
    #[default]
    Cap301,
    Cap302,
}

/// Capability values, only sent to 302 sessions.
pub type CapValues = BTreeMap<Capability, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapSet(BTreeSet<Capability>);

impl CapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cap: Capability) {
        self.0.insert(cap);
    }

    pub fn remove(&mut self, cap: Capability) {
        self.0.remove(&cap);
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Wire tokens for this set. 302 sessions also get `name=value`.
    pub fn strings(&self, version: CapVersion, values: &CapValues) -> Vec<String> {
        self.iter()
            .map(|cap| match (version, values.get(&cap)) {
                (CapVersion::Cap302, Some(value)) if !value.is_empty() => {
                    format!("{}={}", cap.name(), value)
                }
                _ => cap.name().to_string(),
            })
            .collect()
    }
}

impl FromIterator<Capability> for CapSet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Capabilities gained and lost between two config snapshots.
///
/// A capability whose value changed appears in both sets, so subscribers
/// see a `DEL` followed by a `NEW` carrying the new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityDiff {
    pub added: CapSet,
    pub removed: CapSet,
}

impl CapabilityDiff {
    pub fn between(
        old_caps: &CapSet,
        old_values: &CapValues,
        new_caps: &CapSet,
        new_values: &CapValues,
    ) -> Self {
        let mut diff = Self::default();
        for cap in new_caps.iter() {
            if !old_caps.has(cap) {
                diff.added.add(cap);
            } else if old_values.get(&cap) != new_values.get(&cap) {
                diff.added.add(cap);
                diff.removed.add(cap);
            }
        }
        for cap in old_caps.iter() {
            if !new_caps.has(cap) {
                diff.removed.add(cap);
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
