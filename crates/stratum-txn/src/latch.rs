//! The session latch.
//!
//! Each session owns one count-down latch. A session about to wait sets
//! the count to the size of its waited set and parks on `wait_zero`; each
//! waited-on session counts it down once while releasing locks. Setting
//! the count to zero from another thread releases a parked waiter
//! immediately, which is how statement aborts interrupt a wait.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A resettable count-down latch.
#[derive(Debug, Default)]
pub struct CountDownLatch {
    count: Mutex<u64>,
    zero: Condvar,
}

impl CountDownLatch {
    /// Creates a latch at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    /// Sets the count; zero wakes every waiter.
    pub fn set_count(&self, count: u64) {
        let mut guard = self.count.lock();
        *guard = count;
        if count == 0 {
            self.zero.notify_all();
        }
    }

    /// Decrements the count, saturating at zero; reaching zero wakes
    /// every waiter.
    pub fn count_down(&self) {
        let mut guard = self.count.lock();
        *guard = guard.saturating_sub(1);
        if *guard == 0 {
            self.zero.notify_all();
        }
    }

    /// Parks until the count reaches zero.
    pub fn wait_zero(&self) {
        let mut guard = self.count.lock();
        while *guard > 0 {
            self.zero.wait(&mut guard);
        }
    }

    /// Parks until the count reaches zero or the timeout elapses.
    /// Returns true when the count reached zero.
    pub fn wait_zero_for(&self, timeout: Duration) -> bool {
        let mut guard = self.count.lock();
        while *guard > 0 {
            if self.zero.wait_for(&mut guard, timeout).timed_out() {
                return *guard == 0;
            }
        }
        true
    }
}
