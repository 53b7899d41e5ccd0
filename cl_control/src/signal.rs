//! Single-slot wake-up semaphore.
//!
//! `give()` wakes a blocked taker, or, when nobody is waiting, remembers one
//! pending wake that the next `take()` consumes immediately. Several gives
//! before a take collapse into one.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Signal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Wake the waiter, or leave one pending wake.
    #[inline]
    pub fn give(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    /// Block until woken or until `timeout` elapses (`None` waits forever).
    ///
    /// Returns `true` when a wake was consumed.
    pub fn take(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        match timeout {
            None => {
                while !*pending {
                    self.cond.wait(&mut pending);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*pending {
                    if self.cond.wait_until(&mut pending, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        std::mem::replace(&mut *pending, false)
    }

    /// Drop a remembered wake without blocking.
    #[inline]
    pub fn clear(&self) {
        *self.pending.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn give_before_take_is_remembered() {
        let s = Signal::new();
        s.give();
        s.give();
        assert!(s.take(Some(Duration::ZERO)));
        // Two gives collapse into a single pending wake.
        assert!(!s.take(Some(Duration::from_millis(1))));
    }

    #[test]
    fn take_times_out() {
        let s = Signal::new();
        let start = Instant::now();
        assert!(!s.take(Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn give_wakes_blocked_taker() {
        let s = Arc::new(Signal::new());
        let waiter = {
            let s = Arc::clone(&s);
            thread::spawn(move || s.take(None))
        };
        thread::sleep(Duration::from_millis(10));
        s.give();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn clear_drops_pending_wake() {
        let s = Signal::new();
        s.give();
        s.clear();
        assert!(!s.take(Some(Duration::ZERO)));
    }
}
