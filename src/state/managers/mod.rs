//! Domain managers for server state.
//!
//! Each manager owns one domain of the server's shared state and is
//! reachable from the server object. Managers never call each other;
//! cross-domain work happens in the handlers and the server.

pub mod accounts;
pub mod channel;
pub mod client;
pub mod help;
pub mod monitor;
pub mod resume;
pub mod stats;

pub use accounts::{AccountManager, AccountRecord};
pub use channel::ChannelManager;
pub use client::{ClientManager, NickAssignment, NickError};
pub use help::HelpIndexManager;
pub use monitor::MonitorManager;
pub use resume::ResumeManager;
pub use stats::{StatsManager, StatsValues};
