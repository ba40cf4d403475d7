//! Shared server state.
//!
//! Sessions, clients and channels plus the managers that index them.

pub mod channel;
pub mod client;
pub mod lock_order;
pub mod managers;
pub mod session;

pub use channel::{Channel, ElistMatcher, RegisteredChannel};
pub use client::{AccountInfo, Client, ClientIdentity};
pub use session::{Outbound, PassStatus, Session, SessionId, SessionInfo};
