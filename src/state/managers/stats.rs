//! Runtime statistics manager.
//!
//! Counts connections in each lifecycle stage for `LUSERS`. All counters
//! move together under one lock so a registering client is never counted
//! as both unknown and registered.

use parking_lot::Mutex;

/// A consistent view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsValues {
    /// Every connection, registered or not.
    pub total: usize,
    /// Connections that have not completed registration.
    pub unknown: usize,
    /// Registered clients with +i.
    pub invisible: usize,
    pub operators: usize,
    /// Highest `total` seen since startup.
    pub max: usize,
}

impl StatsValues {
    pub fn registered(&self) -> usize {
        self.total.saturating_sub(self.unknown)
    }

    /// Registered clients without +i.
    pub fn visible(&self) -> usize {
        self.registered().saturating_sub(self.invisible)
    }
}

#[derive(Debug, Default)]
pub struct StatsManager {
    values: Mutex<StatsValues>,
}

impl StatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, unregistered connection.
    pub fn add(&self) {
        let mut v = self.values.lock();
        v.unknown += 1;
        v.total += 1;
        v.max = v.max.max(v.total);
    }

    /// An unregistered connection completed registration.
    pub fn register(&self, invisible: bool) {
        let mut v = self.values.lock();
        v.unknown = v.unknown.saturating_sub(1);
        if invisible {
            v.invisible += 1;
        }
    }

    /// A connection went away.
    pub fn remove(&self, registered: bool, invisible: bool, operator: bool) {
        let mut v = self.values.lock();
        v.total = v.total.saturating_sub(1);
        if !registered {
            v.unknown = v.unknown.saturating_sub(1);
        }
        if invisible {
            v.invisible = v.invisible.saturating_sub(1);
        }
        if operator {
            v.operators = v.operators.saturating_sub(1);
        }
    }

    pub fn change_invisible(&self, delta: isize) {
        let mut v = self.values.lock();
        v.invisible = v.invisible.saturating_add_signed(delta);
    }

    pub fn change_operators(&self, delta: isize) {
        let mut v = self.values.lock();
        v.operators = v.operators.saturating_add_signed(delta);
    }

    pub fn snapshot(&self) -> StatsValues {
        *self.values.lock()
    }
}
