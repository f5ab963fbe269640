//! Decoded subtitle cues waiting for their display window
//!
//! Same ring discipline as the picture queue: the subtitle worker blocks
//! while the ring is full, the presentation thread retires cues as video
//! time passes them and composites the front cue once it is due.

use crate::display::overlay::blend_subrect;
use crate::display::surface::YuvSurface;
use crate::error::Result;
use crate::pipeline::ring::PresentationRing;
use crate::pipeline::types::SubtitleCue;
use crate::utils::SignalOfStop;
use log::trace;

pub struct SubtitleQueue {
    ring: PresentationRing<Option<SubtitleCue>>,
}

impl SubtitleQueue {
    pub fn new(capacity: usize, sos: SignalOfStop) -> Self {
        Self {
            ring: PresentationRing::new(vec![None; capacity.max(1)], sos),
        }
    }

    /// Publish a cue, blocking while the ring is full
    pub fn push(&self, cue: SubtitleCue) -> Result<()> {
        let mut state = self.ring.wait_for_space()?;
        let index = state.write_index();
        *state.slot_mut(index) = Some(cue);
        state.commit_write();
        Ok(())
    }

    /// Drop the front cue once `video_pts` has moved past it.
    ///
    /// A cue is over when its own end time has passed, or when the next
    /// queued cue has already started. Only the first two cues are looked
    /// at, so a long cue overlapped by several short ones can be retired
    /// early.
    pub fn retire_expired(&self, video_pts: f64) -> usize {
        let mut state = self.ring.lock();
        let mut retired = 0;
        loop {
            let Some(Some(front)) = state.peek(0) else {
                break;
            };
            let next_started = matches!(
                state.peek(1),
                Some(Some(next)) if video_pts > next.start_time()
            );
            if video_pts > front.end_time() || next_started {
                trace!("SubtitleQueue: retiring cue at {:.3}s", front.pts);
                if let Some(slot) = state.front_mut() {
                    *slot = None;
                }
                state.advance_read();
                retired += 1;
            } else {
                break;
            }
        }
        if retired > 0 {
            self.ring.notify();
        }
        retired
    }

    /// Blend the front cue onto `surface` if it is due at `video_pts`
    pub fn composite(&self, surface: &mut YuvSurface, video_pts: f64) -> bool {
        let state = self.ring.lock();
        match state.peek(0) {
            Some(Some(cue)) if video_pts >= cue.start_time() => {
                for rect in &cue.rects {
                    blend_subrect(surface, rect);
                }
                true
            }
            _ => false,
        }
    }

    pub fn flush(&self) {
        let mut state = self.ring.lock();
        for index in 0..state.capacity() {
            *state.slot_mut(index) = None;
        }
        state.clear();
        self.ring.notify();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlayerError;
    use crate::pipeline::types::SubtitleRect;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn cue(pts: f64, start_ms: u32, end_ms: u32) -> SubtitleCue {
        SubtitleCue {
            pts,
            start_display_ms: start_ms,
            end_display_ms: end_ms,
            rects: vec![SubtitleRect {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
                pixels: vec![0; 4],
                stride: 2,
                palette: vec![0xff_f0_80_80],
            }],
        }
    }

    #[test]
    fn test_cue_composited_inside_window() {
        let queue = SubtitleQueue::new(1, SignalOfStop::new());
        queue.push(cue(10.0, 500, 2000)).unwrap();

        let mut surface = YuvSurface::new(4, 4, 0);
        assert!(!queue.composite(&mut surface, 10.2));
        assert_eq!(surface.planes[0][0], 0);

        assert_eq!(queue.retire_expired(10.6), 0);
        assert!(queue.composite(&mut surface, 10.6));
        assert_eq!(surface.planes[0][0], 0xf0);
    }

    #[test]
    fn test_cue_retired_after_end() {
        let queue = SubtitleQueue::new(1, SignalOfStop::new());
        queue.push(cue(10.0, 0, 2000)).unwrap();

        assert_eq!(queue.retire_expired(12.0), 0);
        assert_eq!(queue.retire_expired(12.01), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_started_successor_retires_front_known_approximation() {
        // Known approximation: only the first two cues are compared, so the
        // front cue goes as soon as the second one starts, even though its
        // own end time (20 s) is far away.
        let queue = SubtitleQueue::new(3, SignalOfStop::new());
        queue.push(cue(10.0, 0, 10_000)).unwrap();
        queue.push(cue(11.0, 0, 1000)).unwrap();
        queue.push(cue(15.0, 0, 1000)).unwrap();

        assert_eq!(queue.retire_expired(11.5), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_producer_blocks_until_retired() {
        let queue = Arc::new(SubtitleQueue::new(1, SignalOfStop::new()));
        queue.push(cue(1.0, 0, 100)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(cue(2.0, 0, 100)))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len(), 1);

        queue.retire_expired(1.5);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_quit_unblocks_producer() {
        let sos = SignalOfStop::new();
        let queue = Arc::new(SubtitleQueue::new(1, sos.clone()));
        queue.push(cue(1.0, 0, 100)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(cue(2.0, 0, 100)))
        };
        thread::sleep(Duration::from_millis(20));
        sos.cancel();
        queue.wake();

        assert!(matches!(producer.join().unwrap(), Err(PlayerError::Quit)));
    }

    #[test]
    fn test_flush_drops_cues() {
        let queue = SubtitleQueue::new(2, SignalOfStop::new());
        queue.push(cue(1.0, 0, 100)).unwrap();
        queue.push(cue(2.0, 0, 100)).unwrap();
        queue.flush();
        assert!(queue.is_empty());
        let mut surface = YuvSurface::new(4, 4, 0);
        assert!(!queue.composite(&mut surface, 1.0));
    }
}
