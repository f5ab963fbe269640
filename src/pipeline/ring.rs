//! Fixed-capacity presentation ring
//!
//! A slot arena with read/write cursors shared by the picture and subtitle
//! queues. The producer fills the slot under the write cursor and commits
//! it; the presentation thread reads the slot under the read cursor and
//! advances. Both sides share one mutex and one condition variable.

use crate::error::{PlayerError, Result};
use crate::utils::{SignalOfStop, lock};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct RingState<T> {
    slots: Vec<T>,
    rindex: usize,
    windex: usize,
    size: usize,
}

impl<T> RingState<T> {
    fn new(slots: Vec<T>) -> Self {
        Self {
            slots,
            rindex: 0,
            windex: 0,
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Committed, unread slots
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size >= self.slots.len()
    }

    pub fn write_index(&self) -> usize {
        self.windex
    }

    pub fn slot(&self, index: usize) -> Option<&T> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut T {
        &mut self.slots[index]
    }

    /// The `offset`-th unread slot
    pub fn peek(&self, offset: usize) -> Option<&T> {
        if offset >= self.size {
            return None;
        }
        Some(&self.slots[(self.rindex + offset) % self.slots.len()])
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        if self.size == 0 {
            return None;
        }
        Some(&mut self.slots[self.rindex])
    }

    /// Publish the slot under the write cursor
    pub fn commit_write(&mut self) {
        debug_assert!(!self.is_full());
        self.windex = (self.windex + 1) % self.slots.len();
        self.size += 1;
    }

    /// Release the slot under the read cursor
    pub fn advance_read(&mut self) {
        if self.size == 0 {
            return;
        }
        self.rindex = (self.rindex + 1) % self.slots.len();
        self.size -= 1;
    }

    /// Forget every committed slot; slot contents stay for reuse
    pub fn clear(&mut self) {
        self.rindex = self.windex;
        self.size = 0;
    }
}

pub struct PresentationRing<T> {
    state: Mutex<RingState<T>>,
    cond: Condvar,
    sos: SignalOfStop,
}

impl<T> PresentationRing<T> {
    pub fn new(slots: Vec<T>, sos: SignalOfStop) -> Self {
        assert!(!slots.is_empty(), "presentation ring needs at least one slot");
        Self {
            state: Mutex::new(RingState::new(slots)),
            cond: Condvar::new(),
            sos,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        lock(&self.state)
    }

    /// Block until `ready` holds or the session quits
    pub fn wait_until<'a, F>(
        &self,
        mut guard: MutexGuard<'a, RingState<T>>,
        mut ready: F,
    ) -> Result<MutexGuard<'a, RingState<T>>>
    where
        F: FnMut(&RingState<T>) -> bool,
    {
        loop {
            if self.sos.cancelled() {
                return Err(PlayerError::Quit);
            }
            if ready(&guard) {
                return Ok(guard);
            }
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Lock the ring once a slot is free for writing
    pub fn wait_for_space(&self) -> Result<MutexGuard<'_, RingState<T>>> {
        let guard = self.lock();
        self.wait_until(guard, |state| !state.is_full())
    }

    pub fn notify(&self) {
        self.cond.notify_all();
    }

    /// Wake every waiter so it can observe the quit flag
    pub fn wake(&self) {
        let _state = self.lock();
        self.cond.notify_all();
    }

    pub fn flush(&self) {
        let mut state = self.lock();
        state.clear();
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
