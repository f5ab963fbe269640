use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// `f64` stored as raw bits so clock fields can be read from any thread
/// without a lock.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
#[inline]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f64_store_load() {
        let value = AtomicF64::new(1.5);
        assert_eq!(value.load(), 1.5);
        value.store(-0.04);
        assert_eq!(value.load(), -0.04);
    }

    #[test]
    fn test_default_is_zero() {
        assert_eq!(AtomicF64::default().load(), 0.0);
    }
}
