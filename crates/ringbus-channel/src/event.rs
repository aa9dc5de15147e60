use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, discarding poison.
///
/// Every critical section in this crate is a handful of plain stores; a
/// panic inside one cannot leave the protected state half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Auto-reset wakeup event.
///
/// `set` leaves the event signalled until one `wait` consumes it, so a
/// signal that races ahead of its waiter is never lost. Stall loops pair
/// this with a re-check of their own condition; a leftover signal costs one
/// spurious pass, nothing more.
#[derive(Debug, Default)]
pub(crate) struct Event {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event, waking a waiter if one is blocked.
    pub fn set(&self) {
        let mut flag = lock(&self.flag);
        *flag = true;
        self.cv.notify_all();
    }

    /// Block until signalled, consuming the signal.
    pub fn wait(&self) {
        let mut flag = lock(&self.flag);
        while !*flag {
            flag = self
                .cv
                .wait(flag)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *flag = false;
    }

    /// Block until signalled or `timeout` elapses.
    ///
    /// Returns true if the signal was consumed, false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = lock(&self.flag);
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            flag = self
                .cv
                .wait_timeout(flag, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *flag = false;
        true
    }
}
