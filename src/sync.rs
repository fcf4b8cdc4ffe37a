//! Wait primitives: a condition variable with deadline-bounded waits.
//!
//! [`WaitCondition`] bundles a non-recursive mutex and a condvar, the way the
//! rest of the toolkit consumes them: lock, check the predicate in a loop,
//! wait with an absolute deadline, re-check. The deadline form reports
//! whether a signal arrived before expiry so pollers can distinguish "woken"
//! from "timed out" — both of which are normal, neither an error.
//!
//! Spurious wakeups are expected; every caller loops on its predicate.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::clock::Timestamp;

/// Mutex + condvar pair with deadline-bounded waiting.
///
/// The mutex is non-recursive (as all `std` mutexes are); no caller in the
/// toolkit re-enters a lock it already holds.
#[derive(Debug, Default)]
pub struct WaitCondition {
    mutex: Mutex<()>,
    cond: Condvar,
}

impl WaitCondition {
    /// Create an unsignalled condition.
    #[must_use]
    pub fn new() -> Self {
        WaitCondition::default()
    }

    /// Acquire the companion mutex.
    ///
    /// A poisoned mutex only occurs if a holder panicked; the protected data
    /// is a unit, so recovery is always safe.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Release the mutex, block until signalled, reacquire.
    pub fn wait<'a>(&'a self, guard: MutexGuard<'a, ()>) -> MutexGuard<'a, ()> {
        self.cond.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Deadline-bounded wait.
    ///
    /// Returns the reacquired guard and `true` if a signal was received, or
    /// `false` if `limit` expired first. An already-expired limit returns
    /// immediately without sleeping.
    pub fn wait_until<'a>(
        &'a self,
        guard: MutexGuard<'a, ()>,
        limit: Timestamp,
    ) -> (MutexGuard<'a, ()>, bool) {
        let left = limit.left();
        if left.is_zero() {
            return (guard, false);
        }
        let (guard, result) = self
            .cond
            .wait_timeout(guard, left.duration())
            .unwrap_or_else(|e| e.into_inner());
        (guard, !result.timed_out())
    }

    /// Wake a single waiter.
    pub fn wake_one(&self) {
        self.cond.notify_one();
    }

    /// Wake every waiter.
    pub fn wake_all(&self) {
        self.cond.notify_all();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timeout;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_until_times_out_without_signal() {
        let wc = WaitCondition::new();
        let started = Timestamp::now();
        let guard = wc.lock();
        let (_guard, signalled) = wc.wait_until(guard, Timestamp::limit(Timeout::from_millis(20)));
        assert!(!signalled);
        assert!(Timestamp::now() - started >= Timeout::from_millis(20));
    }

    #[test]
    fn test_expired_limit_returns_immediately() {
        let wc = WaitCondition::new();
        let guard = wc.lock();
        let (_guard, signalled) = wc.wait_until(guard, Timestamp::now());
        assert!(!signalled);
    }

    #[test]
    fn test_wake_one_delivers_signal() {
        let wc = Arc::new(WaitCondition::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let wc = Arc::clone(&wc);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                let mut guard = wc.lock();
                let limit = Timestamp::limit(Timeout::new(5, 0));
                // Predicate loop: tolerate spurious wakeups.
                while !flag.load(Ordering::Acquire) {
                    let (g, signalled) = wc.wait_until(guard, limit);
                    guard = g;
                    if !signalled {
                        return false;
                    }
                }
                true
            })
        };

        thread::sleep(Duration::from_millis(10));
        {
            let _guard = wc.lock();
            flag.store(true, Ordering::Release);
            wc.wake_one();
        }
        assert!(waiter.join().expect("waiter panicked"));
    }
}
