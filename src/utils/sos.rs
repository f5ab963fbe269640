use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Session-wide quit flag.
///
/// Every blocking primitive in the pipeline holds a clone and checks
/// `cancelled()` under its own mutex before waiting, so a `cancel()` followed
/// by a wake of that primitive never loses the signal.
#[derive(Debug)]
pub struct SignalOfStop {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        // Lock briefly to synchronize with threads parked in wait_timeout
        let _guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    pub fn wait_cancellation(&self) {
        let mut guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !self.cancelled() {
            guard = self
                .shared
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Sleep for `timeout` unless cancelled first. Returns `true` when the
    /// flag is set on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !self.cancelled() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .shared
                .condvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

// Implementing the Clone trait
impl Clone for SignalOfStop {
    fn clone(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::clone(&self.shared),
        }
    }
}
