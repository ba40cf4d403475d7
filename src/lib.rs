//! lattice-ircd - an IRC daemon core.
//!
//! Admission control, the connection registration pipeline, live
//! configuration rehash and history target resolution, around a
//! [`server::Server`] object shared by every connection task.

pub mod caps;
pub mod casemap;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod history;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod proto;
pub mod security;
pub mod server;
pub mod state;
