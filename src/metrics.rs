//! Prometheus metrics collection.
//!
//! Exposed by the diagnostics listener (see [`crate::http`]). Recording
//! helpers are no-ops until [`init`] has run, so library users and tests
//! that never call it pay nothing.
//!
//! - `irc_connections_accepted_total`
//! - `irc_connections_rejected_total{reason}`
//! - `irc_throttle_bans_total`
//! - `irc_registrations_total`
//! - `irc_rehash_total{result}`
//! - `irc_connected_sessions`
//! - `irc_commands_total{command}`

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Connections that passed admission.
pub static CONNECTIONS_ACCEPTED: OnceLock<IntCounter> = OnceLock::new();

/// Connections refused at accept time, by reason.
pub static CONNECTIONS_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Automatic D-lines installed by the connection throttle.
pub static THROTTLE_BANS: OnceLock<IntCounter> = OnceLock::new();

/// Sessions that completed registration.
pub static REGISTRATIONS: OnceLock<IntCounter> = OnceLock::new();

/// Rehash attempts by result.
pub static REHASHES: OnceLock<IntCounterVec> = OnceLock::new();

/// Currently open sessions.
pub static CONNECTED_SESSIONS: OnceLock<IntGauge> = OnceLock::new();

/// Dispatched commands by name.
pub static COMMANDS: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Safe to call more than once; later calls do nothing.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if $metric.get().is_none() {
                        if let Err(e) = r.register(Box::new(m.clone())) {
                            tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                        }
                        let _ = $metric.set(m);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(CONNECTIONS_ACCEPTED, IntCounter::new("irc_connections_accepted_total", "Connections that passed admission"));
    register!(CONNECTIONS_REJECTED, IntCounterVec::new(Opts::new("irc_connections_rejected_total", "Connections refused at accept time"), &["reason"]));
    register!(THROTTLE_BANS, IntCounter::new("irc_throttle_bans_total", "Automatic throttle D-lines"));
    register!(REGISTRATIONS, IntCounter::new("irc_registrations_total", "Completed registrations"));
    register!(REHASHES, IntCounterVec::new(Opts::new("irc_rehash_total", "Rehash attempts by result"), &["result"]));
    register!(CONNECTED_SESSIONS, IntGauge::new("irc_connected_sessions", "Currently open sessions"));
    register!(COMMANDS, IntCounterVec::new(Opts::new("irc_commands_total", "Dispatched commands"), &["command"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

#[inline]
pub fn record_accept() {
    if let Some(c) = CONNECTIONS_ACCEPTED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_rejection(reason: &str) {
    if let Some(c) = CONNECTIONS_REJECTED.get() {
        c.with_label_values(&[reason]).inc();
    }
}

#[inline]
pub fn record_throttle_ban() {
    if let Some(c) = THROTTLE_BANS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_command(command: &str) {
    if let Some(c) = COMMANDS.get() {
        c.with_label_values(&[command]).inc();
    }
}

#[inline]
pub fn record_registration() {
    if let Some(c) = REGISTRATIONS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_rehash(success: bool) {
    if let Some(c) = REHASHES.get() {
        c.with_label_values(&[if success { "success" } else { "failure" }])
            .inc();
    }
}

#[inline]
pub fn session_opened() {
    if let Some(g) = CONNECTED_SESSIONS.get() {
        g.inc();
    }
}

#[inline]
pub fn session_closed() {
    if let Some(g) = CONNECTED_SESSIONS.get() {
        g.dec();
    }
}
