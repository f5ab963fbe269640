//! Decoded picture queue with allocate-on-demand surfaces
//!
//! The video worker writes into the slot under the write cursor. When that
//! slot has no surface, or one of the wrong size, the worker asks the
//! presentation thread to allocate it and sleeps on the ring until the
//! request is acknowledged. Surfaces are therefore only ever created on the
//! presentation thread.

use crate::display::surface::YuvSurface;
use crate::error::{PlayerError, Result};
use crate::pipeline::ring::{PresentationRing, RingState};
use crate::pipeline::types::VideoFrame;
use crate::utils::SignalOfStop;
use log::{debug, warn};
use std::sync::MutexGuard;
use std::sync::mpsc::Sender;

/// Message to the presentation thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentEvent {
    /// Allocate a `width`x`height` surface for picture slot `slot`
    Allocate { slot: usize, width: u32, height: u32 },
    /// Leave the presentation loop; `fatal` when caused by a stream error
    Quit { fatal: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Ready,
    Pending,
    Failed,
}

#[derive(Debug)]
pub struct PictureSlot {
    pub surface: Option<YuvSurface>,
    pub width: u32,
    pub height: u32,
    pub allocation: Allocation,
    /// Presentation time in seconds
    pub pts: f64,
    /// Seek generation the picture was decoded in
    pub generation: u64,
}

impl Default for PictureSlot {
    fn default() -> Self {
        Self {
            surface: None,
            width: 0,
            height: 0,
            allocation: Allocation::Ready,
            pts: 0.0,
            generation: 0,
        }
    }
}

impl PictureSlot {
    fn needs_allocation(&self, width: u32, height: u32) -> bool {
        self.surface.is_none() || self.width != width || self.height != height
    }
}

pub struct PictureQueue {
    ring: PresentationRing<PictureSlot>,
    events: Sender<PresentEvent>,
}

impl PictureQueue {
    pub fn new(capacity: usize, events: Sender<PresentEvent>, sos: SignalOfStop) -> Self {
        let slots = (0..capacity.max(1)).map(|_| PictureSlot::default()).collect();
        Self {
            ring: PresentationRing::new(slots, sos),
            events,
        }
    }

    /// Copy `frame` into the next free slot and publish it with `pts`,
    /// stamped with the seek `generation` it was decoded in.
    ///
    /// Blocks while the ring is full and while a surface allocation is in
    /// flight. Returns `Quit` when the session shuts down meanwhile.
    pub fn queue_picture(&self, frame: &VideoFrame, pts: f64, generation: u64) -> Result<()> {
        let mut state = self.ring.wait_for_space()?;
        let index = state.write_index();

        let slot = state.slot_mut(index);
        if slot.needs_allocation(frame.width, frame.height) {
            slot.allocation = Allocation::Pending;
            slot.surface = None;
            debug!(
                "PictureQueue: requesting {}x{} surface for slot {}",
                frame.width, frame.height, index
            );
            let request = PresentEvent::Allocate {
                slot: index,
                width: frame.width,
                height: frame.height,
            };
            if self.events.send(request).is_err() {
                return Err(PlayerError::Quit);
            }
            state = self.ring.wait_until(state, |state| {
                state
                    .slot(index)
                    .is_some_and(|slot| slot.allocation != Allocation::Pending)
            })?;
        }

        // Fill the slot without holding the lock; the reader never touches
        // the slot under the write cursor.
        let slot = state.slot_mut(index);
        if slot.allocation == Allocation::Failed {
            slot.allocation = Allocation::Ready;
            return Err(PlayerError::Surface {
                width: frame.width,
                height: frame.height,
            });
        }
        let Some(mut surface) = slot.surface.take() else {
            return Err(PlayerError::Surface {
                width: frame.width,
                height: frame.height,
            });
        };
        drop(state);

        surface.copy_from(frame);

        let mut state = self.ring.lock();
        let slot = state.slot_mut(index);
        slot.surface = Some(surface);
        slot.pts = pts;
        slot.generation = generation;
        if state.write_index() == index && !state.is_full() {
            state.commit_write();
        } else {
            warn!("PictureQueue: slot {} reclaimed while filling, dropping picture", index);
        }
        Ok(())
    }

    /// Presentation thread side of the allocation handshake
    pub fn complete_allocation(&self, slot: usize, surface: Option<YuvSurface>) {
        let mut state = self.ring.lock();
        if slot >= state.capacity() {
            return;
        }
        let entry = state.slot_mut(slot);
        match surface {
            Some(surface) => {
                entry.width = surface.width;
                entry.height = surface.height;
                entry.surface = Some(surface);
                entry.allocation = Allocation::Ready;
            }
            None => entry.allocation = Allocation::Failed,
        }
        self.ring.notify();
    }

    /// Lock the ring for the presentation thread
    pub fn lock(&self) -> MutexGuard<'_, RingState<PictureSlot>> {
        self.ring.lock()
    }

    /// Release the head picture and wake the producer
    pub fn advance(&self, mut state: MutexGuard<'_, RingState<PictureSlot>>) {
        state.advance_read();
        self.ring.notify();
    }

    pub fn flush(&self) {
        self.ring.flush();
    }

    pub fn wake(&self) {
        self.ring.wake();
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
