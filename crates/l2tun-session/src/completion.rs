//! Single-permit completion signal shared by a session's workers

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Binary semaphore: any number of `release` calls leave at most one
/// permit, and each permit is consumed by exactly one waiter.
#[derive(Debug, Default)]
pub struct Completion {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make one permit available and wake one waiter
    pub fn release(&self) {
        let mut released = self.released.lock().unwrap();
        *released = true;
        self.cond.notify_one();
    }

    /// Block until a permit is available, then consume it
    pub fn acquire(&self) {
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.cond.wait(released).unwrap();
        }
        *released = false;
    }

    /// Like `acquire`, but gives up after `timeout`. Returns whether a
    /// permit was consumed.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut released = self.released.lock().unwrap();
        while !*released {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            released = self.cond.wait_timeout(released, remaining).unwrap().0;
        }
        *released = false;
        true
    }

    /// Consume a permit if one is available, without blocking
    pub fn try_acquire(&self) -> bool {
        let mut released = self.released.lock().unwrap();
        std::mem::replace(&mut *released, false)
    }
}
