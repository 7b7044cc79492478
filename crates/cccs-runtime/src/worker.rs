// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stop signalling shared by the drain worker and bootstrap polling.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A settable flag with interruptible timed waits.
///
/// The drain worker parks on it between passes; bootstrap polling parks on
/// it between health checks. `set` wakes every waiter, so shutdown
/// interrupts both immediately.
pub(crate) struct StopSignal {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn set(&self) {
        let mut flag = self.flag.lock().expect("stop signal poisoned");
        *flag = true;
        self.cv.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.flag.lock().expect("stop signal poisoned")
    }

    /// Wait until the signal is set or `timeout` elapses; returns whether
    /// the signal is set.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().expect("stop signal poisoned");
        if *flag {
            return true;
        }
        let (flag, _) = self
            .cv
            .wait_timeout_while(flag, timeout, |set| !*set)
            .expect("stop signal poisoned");
        *flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wait_times_out_when_unset() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn set_wakes_a_parked_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = Arc::clone(&signal);
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        signal.set();
        assert!(handle.join().unwrap());
        assert!(signal.is_set());
    }

    #[test]
    fn wait_returns_immediately_once_set() {
        let signal = StopSignal::new();
        signal.set();
        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
