//! IRC command handlers.
//!
//! Each command has a [`Handler`] registered in the [`Registry`]. Handlers
//! receive a [`Context`] holding the server, the session and the config
//! snapshot taken when the line arrived.
//!
//! Registration commands (NICK, USER, CAP END, ...) feed the registration
//! pipeline in [`registration`], which owns the path from an anonymous
//! session to a registered client.

pub mod burst;
mod cap;
mod channel;
mod chathistory;
mod connection;
mod core;
mod helpers;
mod messaging;
mod monitor;
mod oper;
pub mod registration;
mod server_query;

pub use self::core::{Context, Handler, Registry};
pub use helpers::{server_notice, server_reply};
