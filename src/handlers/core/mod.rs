//! Core handler infrastructure: the per-command context, the handler
//! trait and the dispatch registry.

pub mod context;
pub mod registry;

pub use context::{Context, Handler};
pub use registry::Registry;
