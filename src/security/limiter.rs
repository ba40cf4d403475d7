//! Per-network connection limits and throttling.
//!
//! Addresses are grouped into networks by masking them to the configured
//! CIDR lengths. Each network has a concurrent connection count and a
//! fixed throttle window: at most `max_connections_per_window` connections
//! are admitted between the window's start and `window` later.
//!
//! Tor connections all arrive from loopback, so they share one global
//! budget in [`TorLimiter`].

use crate::config::{IpLimitsConfig, TorListenersConfig};
use dashmap::DashMap;
use governor::Quota;
use ipnet::IpNet;
use parking_lot::{Mutex, RwLock};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimitError {
    #[error("too many concurrent connections")]
    LimitExceeded,
    #[error("connection throttle exceeded")]
    ThrottleExceeded,
    #[error("limiter misconfigured: {0}")]
    Internal(String),
}

/// Token-bucket quota allowing `max` attempts per `window`.
pub(crate) fn quota_for(window: Duration, max: u32) -> Option<Quota> {
    let burst = NonZeroU32::new(max)?;
    let period = window.checked_div(max)?;
    Quota::with_period(period).map(|quota| quota.allow_burst(burst))
}

/// Connections counted since `started`.
#[derive(Debug, Clone, Copy)]
struct ThrottleWindow {
    started: Instant,
    count: u32,
}

impl ThrottleWindow {
    fn new(now: Instant) -> Self {
        Self { started: now, count: 0 }
    }

    fn is_over(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.started) >= window
    }

    /// Count one connection. Fails without counting once `max` connections
    /// have been seen in the current window.
    fn touch(&mut self, now: Instant, window: Duration, max: u32) -> Result<(), LimitError> {
        if self.is_over(now, window) {
            *self = Self::new(now);
        }
        if self.count >= max {
            return Err(LimitError::ThrottleExceeded);
        }
        self.count += 1;
        Ok(())
    }
}

/// Concurrent-connection and throttle limits for ordinary listeners.
#[derive(Debug, Default)]
pub struct ConnectionLimiter {
    config: RwLock<IpLimitsConfig>,
    counts: DashMap<IpNet, u32>,
    throttles: DashMap<IpNet, ThrottleWindow>,
}

impl ConnectionLimiter {
    pub fn new(config: IpLimitsConfig) -> Self {
        Self {
            config: RwLock::new(config),
            counts: DashMap::new(),
            throttles: DashMap::new(),
        }
    }

    /// Install new limits. Throttle state is discarded when its parameters
    /// change; concurrent counts survive unless the grouping changes.
    pub fn apply_config(&self, new: &IpLimitsConfig) {
        let mut config = self.config.write();
        let regrouped =
            config.cidr_len_ipv4 != new.cidr_len_ipv4 || config.cidr_len_ipv6 != new.cidr_len_ipv6;
        let rethrottled = regrouped
            || config.window != new.window
            || config.max_connections_per_window != new.max_connections_per_window;
        if regrouped {
            self.counts.clear();
        }
        if rethrottled {
            self.throttles.clear();
        }
        *config = new.clone();
    }

    /// How long an automatic throttle ban should last.
    pub fn ban_duration(&self) -> Duration {
        self.config.read().throttle_ban_duration
    }

    /// Record a new connection from `ip`. Nothing is recorded on error.
    pub fn add_client(&self, ip: IpAddr) -> Result<(), LimitError> {
        self.add(ip, true)
    }

    /// Record a connection that is admitted despite its throttle, still
    /// subject to the concurrent limit.
    pub fn add_client_unthrottled(&self, ip: IpAddr) -> Result<(), LimitError> {
        self.add(ip, false)
    }

    fn add(&self, ip: IpAddr, throttled: bool) -> Result<(), LimitError> {
        let config = self.config.read();
        if config.exempted.iter().any(|net| net.contains(&ip)) {
            return Ok(());
        }
        let key = network_key(ip, &config)?;

        let mut count = self.counts.entry(key).or_insert(0);
        if config.count && *count >= config.max_concurrent_connections {
            debug!(network = %key, count = *count, "concurrent connection limit reached");
            drop(count);
            self.counts.remove_if(&key, |_, count| *count == 0);
            return Err(LimitError::LimitExceeded);
        }

        if throttled && config.throttle && config.max_connections_per_window > 0 {
            let now = Instant::now();
            let result = self
                .throttles
                .entry(key)
                .or_insert_with(|| ThrottleWindow::new(now))
                .touch(now, config.window, config.max_connections_per_window);
            if let Err(e) = result {
                debug!(network = %key, "connection throttle exceeded");
                drop(count);
                self.counts.remove_if(&key, |_, count| *count == 0);
                return Err(e);
            }
        }

        *count += 1;
        Ok(())
    }

    /// Release a connection previously admitted by [`Self::add_client`].
    pub fn remove_client(&self, ip: IpAddr) {
        let config = self.config.read();
        if config.exempted.iter().any(|net| net.contains(&ip)) {
            return;
        }
        let Ok(key) = network_key(ip, &config) else {
            return;
        };
        self.counts.remove_if_mut(&key, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    /// Forget the throttle history of the network containing `ip`.
    pub fn reset_throttle(&self, ip: IpAddr) {
        let config = self.config.read();
        if let Ok(key) = network_key(ip, &config) {
            self.throttles.remove(&key);
        }
    }

    /// Drop throttle windows that have run out. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let window = self.config.read().window;
        let now = Instant::now();
        let before = self.throttles.len();
        self.throttles.retain(|_, throttle| !throttle.is_over(now, window));
        before.saturating_sub(self.throttles.len())
    }

    /// Number of networks with a live throttle window.
    pub fn throttled_networks(&self) -> usize {
        self.throttles.len()
    }

    /// Current concurrent count for the network containing `ip`.
    pub fn count(&self, ip: IpAddr) -> u32 {
        let config = self.config.read();
        network_key(ip, &config)
            .ok()
            .and_then(|key| self.counts.get(&key).map(|c| *c))
            .unwrap_or(0)
    }
}

fn network_key(ip: IpAddr, config: &IpLimitsConfig) -> Result<IpNet, LimitError> {
    let prefix = match ip {
        IpAddr::V4(_) => config.cidr_len_ipv4,
        IpAddr::V6(_) => config.cidr_len_ipv6,
    };
    IpNet::new(ip, prefix)
        .map(|net| net.trunc())
        .map_err(|e| LimitError::Internal(e.to_string()))
}

#[derive(Debug, Default)]
struct TorState {
    max_connections: u32,
    count: u32,
    window: Duration,
    max_per_window: u32,
    throttle: Option<ThrottleWindow>,
}

/// One shared budget for every Tor connection.
#[derive(Debug, Default)]
pub struct TorLimiter {
    state: Mutex<TorState>,
}

impl TorLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&self, config: &TorListenersConfig) {
        let mut state = self.state.lock();
        state.max_connections = config.max_connections;
        if state.window != config.throttle_duration
            || state.max_per_window != config.max_connections_per_duration
        {
            state.window = config.throttle_duration;
            state.max_per_window = config.max_connections_per_duration;
            state.throttle = None;
        }
    }

    pub fn add_client(&self) -> Result<(), LimitError> {
        let mut state = self.state.lock();
        if state.max_connections != 0 && state.count >= state.max_connections {
            return Err(LimitError::LimitExceeded);
        }
        if state.max_per_window != 0 {
            let now = Instant::now();
            let (window, max) = (state.window, state.max_per_window);
            state
                .throttle
                .get_or_insert_with(|| ThrottleWindow::new(now))
                .touch(now, window, max)?;
        }
        state.count += 1;
        Ok(())
    }

    pub fn remove_client(&self) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
    }

    pub fn count(&self) -> u32 {
        self.state.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_concurrent: u32, max_per_window: u32) -> IpLimitsConfig {
        IpLimitsConfig {
            max_concurrent_connections: max_concurrent,
            max_connections_per_window: max_per_window,
            window: Duration::from_secs(600),
            exempted: vec![],
            ..Default::default()
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn concurrent_limit_is_per_network() {
        let limiter = ConnectionLimiter::new(IpLimitsConfig {
            cidr_len_ipv4: 24,
            ..limits(2, 100)
        });
        assert!(limiter.add_client(ip("192.0.2.1")).is_ok());
        assert!(limiter.add_client(ip("192.0.2.2")).is_ok());
        assert_eq!(
            limiter.add_client(ip("192.0.2.3")),
            Err(LimitError::LimitExceeded)
        );
        assert!(limiter.add_client(ip("192.0.3.1")).is_ok());

        limiter.remove_client(ip("192.0.2.1"));
        assert!(limiter.add_client(ip("192.0.2.3")).is_ok());
    }

    #[test]
    fn throttle_trips_after_window_budget() {
        let limiter = ConnectionLimiter::new(limits(100, 3));
        for _ in 0..3 {
            assert!(limiter.add_client(ip("198.51.100.1")).is_ok());
        }
        assert_eq!(
            limiter.add_client(ip("198.51.100.1")),
            Err(LimitError::ThrottleExceeded)
        );
        assert_eq!(limiter.count(ip("198.51.100.1")), 3);

        limiter.reset_throttle(ip("198.51.100.1"));
        assert!(limiter.add_client(ip("198.51.100.1")).is_ok());
    }

    #[test]
    fn throttle_counts_every_connection_in_the_window() {
        let limiter = ConnectionLimiter::new(IpLimitsConfig {
            window: Duration::from_secs(1),
            ..limits(100, 3)
        });
        let addr = ip("198.51.100.2");
        for _ in 0..3 {
            assert!(limiter.add_client(addr).is_ok());
            std::thread::sleep(Duration::from_millis(250));
        }
        assert_eq!(limiter.add_client(addr), Err(LimitError::ThrottleExceeded));

        std::thread::sleep(Duration::from_millis(500));
        assert!(limiter.add_client(addr).is_ok());
    }

    #[test]
    fn idle_windows_are_pruned() {
        let limiter = ConnectionLimiter::new(IpLimitsConfig {
            window: Duration::from_millis(50),
            ..limits(100, 3)
        });
        assert!(limiter.add_client(ip("198.51.100.3")).is_ok());
        assert_eq!(limiter.prune_idle(), 0);
        assert_eq!(limiter.throttled_networks(), 1);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(limiter.prune_idle(), 1);
        assert_eq!(limiter.throttled_networks(), 0);
    }

    #[test]
    fn unthrottled_add_still_counts() {
        let limiter = ConnectionLimiter::new(limits(2, 1));
        let addr = ip("198.51.100.4");
        assert!(limiter.add_client(addr).is_ok());
        assert_eq!(limiter.add_client(addr), Err(LimitError::ThrottleExceeded));
        assert!(limiter.add_client_unthrottled(addr).is_ok());
        assert_eq!(limiter.count(addr), 2);
        assert_eq!(
            limiter.add_client_unthrottled(addr),
            Err(LimitError::LimitExceeded)
        );
    }

    #[test]
    fn exempt_networks_bypass_limits() {
        let limiter = ConnectionLimiter::new(IpLimitsConfig {
            exempted: vec!["127.0.0.0/8".parse().unwrap()],
            ..limits(1, 1)
        });
        for _ in 0..5 {
            assert!(limiter.add_client(ip("127.0.0.1")).is_ok());
        }
        assert_eq!(limiter.count(ip("127.0.0.1")), 0);
    }

    #[test]
    fn disabled_checks_allow_everything() {
        let limiter = ConnectionLimiter::new(IpLimitsConfig {
            count: false,
            throttle: false,
            ..limits(1, 1)
        });
        for _ in 0..5 {
            assert!(limiter.add_client(ip("203.0.113.9")).is_ok());
        }
    }

    #[test]
    fn bad_prefix_is_internal_error() {
        let limiter = ConnectionLimiter::new(IpLimitsConfig {
            cidr_len_ipv4: 40,
            ..limits(1, 1)
        });
        assert!(matches!(
            limiter.add_client(ip("192.0.2.1")),
            Err(LimitError::Internal(_))
        ));
    }

    #[test]
    fn apply_config_resets_throttle_on_change() {
        let limiter = ConnectionLimiter::new(limits(100, 1));
        assert!(limiter.add_client(ip("192.0.2.50")).is_ok());
        assert_eq!(
            limiter.add_client(ip("192.0.2.50")),
            Err(LimitError::ThrottleExceeded)
        );
        limiter.apply_config(&limits(100, 2));
        assert!(limiter.add_client(ip("192.0.2.50")).is_ok());
        assert_eq!(limiter.count(ip("192.0.2.50")), 2);
    }

    #[test]
    fn tor_limits() {
        let tor = TorLimiter::new();
        tor.configure(&TorListenersConfig {
            max_connections: 2,
            ..Default::default()
        });
        assert!(tor.add_client().is_ok());
        assert!(tor.add_client().is_ok());
        assert_eq!(tor.add_client(), Err(LimitError::LimitExceeded));
        tor.remove_client();
        assert!(tor.add_client().is_ok());

        let throttled = TorLimiter::new();
        throttled.configure(&TorListenersConfig {
            max_connections_per_duration: 1,
            ..Default::default()
        });
        assert!(throttled.add_client().is_ok());
        assert_eq!(throttled.add_client(), Err(LimitError::ThrottleExceeded));
    }
}
