//! Accept-time admission decisions.
//!
//! Every new connection is checked against the D-line store and then the
//! per-network limiter (or the Tor limiter for Tor listeners) before any
//! session state exists. A throttled network earns an automatic, temporary
//! D-line, after which its throttle history is cleared.

use super::bans::BanStore;
use super::limiter::{ConnectionLimiter, LimitError, TorLimiter};
use crate::config::{IpLimitsConfig, TorListenersConfig};
use crate::metrics;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const THROTTLE_MESSAGE: &str = "You have attempted to connect too many times within a short duration. Wait a while, and you will be able to connect.";
const DLINE_TEMPLATE: &str = "You are banned from this server (%s)";
const TOO_MANY_CLIENTS: &str = "Too many clients from your network";
const TOR_TOO_MANY_CLIENTS: &str = "Too many clients from the Tor network";
const TOR_THROTTLED: &str = "Exceeded connection throttle for the Tor network";
const THROTTLE_OPER_REASON: &str = "Exceeded automated connection throttle";
const THROTTLE_SOURCE: &str = "auto.connection.throttler";

/// Outcome of an admission check. Rejections carry the line sent to the
/// peer before the socket is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept,
    Reject(String),
}

impl AdmissionDecision {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Reject(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Accept => None,
            Self::Reject(message) => Some(message),
        }
    }
}

#[derive(Debug)]
pub struct AdmissionControl {
    dlines: Arc<BanStore>,
    limiter: ConnectionLimiter,
    tor_limiter: TorLimiter,
}

impl AdmissionControl {
    pub fn new(dlines: Arc<BanStore>) -> Self {
        Self {
            dlines,
            limiter: ConnectionLimiter::default(),
            tor_limiter: TorLimiter::new(),
        }
    }

    pub fn apply_config(&self, ip_limits: &IpLimitsConfig, tor: &TorListenersConfig) {
        self.limiter.apply_config(ip_limits);
        self.tor_limiter.configure(tor);
    }

    /// Decide whether a connection from `ip` on an ordinary listener may
    /// proceed. An accepted connection holds a limiter slot until
    /// [`Self::release`] is called.
    pub fn check_connection(&self, ip: IpAddr) -> AdmissionDecision {
        if let Some(ban) = self.dlines.check_ip(ip) {
            metrics::record_rejection("dline");
            return AdmissionDecision::Reject(ban.ban_message(DLINE_TEMPLATE));
        }

        let mut result = self.limiter.add_client(ip);
        let duration = self.limiter.ban_duration();
        if result == Err(LimitError::ThrottleExceeded) && duration.is_zero() {
            // Throttling without a ban admits the connection, which still
            // takes a concurrent slot.
            result = self.limiter.add_client_unthrottled(ip);
        }

        match result {
            Ok(()) => AdmissionDecision::Accept,
            Err(LimitError::LimitExceeded) => {
                metrics::record_rejection("limit");
                AdmissionDecision::Reject(TOO_MANY_CLIENTS.to_string())
            }
            Err(LimitError::ThrottleExceeded) => {
                self.dlines.add_ip(
                    ip,
                    Some(duration),
                    THROTTLE_MESSAGE,
                    THROTTLE_OPER_REASON,
                    THROTTLE_SOURCE,
                );
                // Start the network from a clean slate once the ban lapses.
                self.limiter.reset_throttle(ip);
                info!(
                    %ip,
                    duration_secs = duration.as_secs(),
                    "Client exceeded connection throttle, temporarily D-lined"
                );
                metrics::record_rejection("throttle");
                metrics::record_throttle_ban();
                AdmissionDecision::Reject(THROTTLE_MESSAGE.to_string())
            }
            Err(e) => {
                warn!(%ip, error = %e, "unexpected error from connection limiter");
                AdmissionDecision::Accept
            }
        }
    }

    /// Tor connections are limited as a single network.
    pub fn check_tor_connection(&self) -> AdmissionDecision {
        match self.tor_limiter.add_client() {
            Ok(()) => AdmissionDecision::Accept,
            Err(LimitError::LimitExceeded) => {
                metrics::record_rejection("tor_limit");
                AdmissionDecision::Reject(TOR_TOO_MANY_CLIENTS.to_string())
            }
            Err(LimitError::ThrottleExceeded) => {
                metrics::record_rejection("tor_throttle");
                AdmissionDecision::Reject(TOR_THROTTLED.to_string())
            }
            Err(e) => {
                warn!(error = %e, "unexpected error from Tor limiter");
                AdmissionDecision::Accept
            }
        }
    }

    /// Return the limiter slot held by a closed connection.
    pub fn release(&self, ip: IpAddr, is_tor: bool) {
        if is_tor {
            self.tor_limiter.remove_client();
        } else {
            self.limiter.remove_client(ip);
        }
    }

    /// Drop expired D-lines and K-lines and idle throttle windows.
    pub fn prune(&self) -> (usize, usize) {
        (self.dlines.prune_expired(), self.limiter.prune_idle())
    }

    pub fn limiter(&self) -> &ConnectionLimiter {
        &self.limiter
    }

    pub fn tor_limiter(&self) -> &TorLimiter {
        &self.tor_limiter
    }
}
