//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: The snapshot struct, its top-level sections and derived tables
//! - [`listen`]: Listener, TLS and STS configuration
//! - [`limits`]: Per-network connection limits, Tor limits, protocol lengths
//! - [`accounts`]: Authentication, nick reservation and account registration
//! - [`history`]: In-memory and persistent history configuration
//! - [`isupport`]: The RPL_ISUPPORT token table and its diff
//! - [`validation`]: Snapshot validation and rehash immutability checks

mod accounts;
pub mod duration;
mod history;
pub mod isupport;
mod limits;
mod listen;
mod multiclient;
mod oper;
mod types;
pub mod validation;

pub use accounts::{
    AccountRegistrationConfig, AccountsConfig, NickReservationConfig, RequireSaslConfig,
    ThrottleConfig, VHostConfig,
};
pub use history::{HistoryConfig, HistoryRestrictions, PersistentHistoryConfig, PersistentPolicy};
pub use isupport::ISupportList;
pub use limits::{IpLimitsConfig, LimitsConfig, TorListenersConfig};
pub use listen::{ListenerConfig, StsConfig, TlsConfig};
pub use multiclient::{AlwaysOnPolicy, MulticlientConfig};
pub use oper::OperBlock;
pub use types::{
    ChannelRegistrationConfig, ChannelsConfig, Config, ConfigError, DatastoreConfig, DebugConfig,
    Derived, IdleTimeoutsConfig, LoggingConfig, MotdConfig, ServerConfig,
};
pub use validation::{ImmutableField, ValidationError, check_immutable, validate};
