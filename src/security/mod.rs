//! Security module.
//!
//! Provides the connection-time defenses:
//! - **Bans**: D-lines (IP networks) and K-lines (nickmasks) with lazy expiry
//! - **Limiter**: Governor-based per-network throttling and concurrent caps
//! - **Admission**: The accept-path decision combining the two
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 AdmissionControl                │
//! ├──────────────┬───────────────────┬──────────────┤
//! │   BanStore   │ ConnectionLimiter │  TorLimiter  │
//! │   DashMap    │ DashMap+Governor  │ Mutex+Gov.   │
//! │  D/K-lines   │  per CIDR network │ one budget   │
//! └──────────────┴───────────────────┴──────────────┘
//! ```

pub mod admission;
pub mod bans;
pub mod limiter;

pub use admission::{AdmissionControl, AdmissionDecision, THROTTLE_MESSAGE};
pub use bans::{BanKind, BanRecord, BanStore, StoredBan};
pub use limiter::{ConnectionLimiter, LimitError, TorLimiter};
