use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    time::{Duration, Instant},
};

/// One-shot event set by a thread as it exits and waited on by its joiners.
///
/// Once set it stays set: every current and future waiter observes it, and
/// everything the setter wrote before [`set`](Self::set) is visible to them.
#[derive(Default)]
pub struct CompletionSignal {
    is_set: Mutex<bool>,
    cond: Condvar,
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("is_set", &self.is_set())
            .finish()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        *self.is_set.lock()
    }

    /// Transition to the set state, unblocking all waiters.
    /// Setting an already set signal does nothing.
    pub fn set(&self) {
        let mut is_set = self.is_set.lock();
        if !*is_set {
            *is_set = true;
            self.cond.notify_all();
        }
    }

    /// Block until the signal is set.
    pub fn wait(&self) {
        let mut is_set = self.is_set.lock();
        while !*is_set {
            self.cond.wait(&mut is_set);
        }
    }

    /// Block until the signal is set or `timeout` elapses,
    /// returning whether the signal was observed as set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                self.wait();
                return true;
            }
        };

        let mut is_set = self.is_set.lock();
        while !*is_set {
            if self.cond.wait_until(&mut is_set, deadline).timed_out() {
                break;
            }
        }
        *is_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn set_before_wait() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_set());
        signal.set();
        signal.set();
        signal.wait();
        assert!(signal.wait_timeout(Duration::from_millis(0)));
    }

    #[test]
    fn timeout_without_set() {
        let signal = CompletionSignal::new();
        let started = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wakes_every_waiter() {
        let signal = Arc::new(CompletionSignal::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        signal.set();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn unbounded_timeout() {
        let signal = CompletionSignal::new();
        signal.set();
        assert!(signal.wait_timeout(Duration::MAX));
    }
}
