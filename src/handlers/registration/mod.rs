//! Connection registration.
//!
//! [`machine`] is the pure state machine; [`pipeline`] drives it against
//! the server, performing one side effect per transition; [`auth`] decides
//! the password and SASL policy outcome.

pub mod auth;
pub mod machine;
pub mod pipeline;

pub use machine::{
    Action, AuthOutcome, HandoffKind, NickOutcome, Readiness, RegEvent, RegState, Transition, step,
};
pub use pipeline::{RegistrationOutcome, try_register};
