//! Tiered mutexes with a debug-build ordering check.
//!
//! Locks are ranked; a thread holding a lock may only acquire locks of a
//! strictly lower tier. The rehash lock (an async mutex held across
//! awaits) sits above every tier here and is never taken while one of
//! these is held; [`assert_none_held`] checks that.
//!
//! In release builds the check compiles away and a [`TieredMutex`] is a
//! plain `parking_lot::Mutex`.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};

/// Lock ranking, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockTier {
    Session = 1,
    Client = 2,
    ListenerTable = 3,
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD: std::cell::RefCell<Vec<LockTier>> = const { std::cell::RefCell::new(Vec::new()) };
}

struct TierToken {
    #[cfg(debug_assertions)]
    tier: LockTier,
}

impl TierToken {
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    fn acquire(tier: LockTier) -> Self {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(lowest) = held.iter().min() {
                assert!(
                    tier < *lowest,
                    "lock order violation: acquiring {tier:?} while holding {lowest:?}"
                );
            }
            held.push(tier);
        });
        Self {
            #[cfg(debug_assertions)]
            tier,
        }
    }
}

impl Drop for TierToken {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|t| *t == self.tier) {
                held.remove(pos);
            }
        });
    }
}

/// Panics in debug builds if the current thread holds any tiered lock.
pub fn assert_none_held() {
    #[cfg(debug_assertions)]
    HELD.with(|held| {
        let held = held.borrow();
        assert!(held.is_empty(), "rehash lock requested while holding {held:?}");
    });
}

pub struct TieredMutex<T> {
    tier: LockTier,
    inner: Mutex<T>,
}

impl<T> TieredMutex<T> {
    pub fn new(tier: LockTier, value: T) -> Self {
        Self {
            tier,
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> TieredGuard<'_, T> {
        let token = TierToken::acquire(self.tier);
        TieredGuard {
            guard: self.inner.lock(),
            _token: token,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for TieredMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredMutex")
            .field("tier", &self.tier)
            .field("inner", &self.inner)
            .finish()
    }
}

pub struct TieredGuard<'a, T> {
    // Released before the token so the tier is never recorded as free
    // while the mutex is still held.
    guard: MutexGuard<'a, T>,
    _token: TierToken,
}

impl<T> Deref for TieredGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for TieredGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_acquisition_is_allowed() {
        let table = TieredMutex::new(LockTier::ListenerTable, 1);
        let client = TieredMutex::new(LockTier::Client, 2);
        let session = TieredMutex::new(LockTier::Session, 3);
        let a = table.lock();
        let b = client.lock();
        let c = session.lock();
        assert_eq!(*a + *b + *c, 6);
    }

    #[test]
    fn sequential_acquisition_is_allowed() {
        let session = TieredMutex::new(LockTier::Session, ());
        let client = TieredMutex::new(LockTier::Client, ());
        drop(session.lock());
        drop(client.lock());
        assert_none_held();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock order violation")]
    fn ascending_acquisition_panics() {
        let session = TieredMutex::new(LockTier::Session, ());
        let client = TieredMutex::new(LockTier::Client, ());
        let _s = session.lock();
        let _c = client.lock();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "rehash lock requested")]
    fn rehash_under_tiered_lock_panics() {
        let client = TieredMutex::new(LockTier::Client, ());
        let _c = client.lock();
        assert_none_held();
    }
}
