//! Video pacing
//!
//! Decides how long the picture at the head of the queue stays on screen.
//! The nominal delay is the PTS distance to the previous picture; when video
//! is not the master clock the delay is dropped to zero (video late) or
//! doubled (video early) to pull the two clocks back together. An absolute
//! frame timer turns those delays into wall-clock deadlines so scheduling
//! jitter does not accumulate.

use crate::pipeline::audio_sync::AV_NOSYNC_THRESHOLD;
use log::trace;

/// Smallest drift tolerance; also the floor of any scheduled wait
pub const AV_SYNC_THRESHOLD: f64 = 0.01;

/// Delay assumed before two pictures have been seen
pub const INITIAL_FRAME_DELAY: f64 = 40e-3;

/// How a picture's delay was adjusted against the master clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingAction {
    /// Video is master, or the drift is within tolerance
    OnTime,
    /// Video lags the master: show the next picture immediately
    CatchUp,
    /// Video leads the master: hold this picture for twice as long
    SlowDown,
    /// Drift too large to correct
    Unsynced,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingDecision {
    pub delay: f64,
    pub action: PacingAction,
}

#[derive(Debug, Clone)]
pub struct FrameTimer {
    /// Wall-clock time (seconds) at which the current picture's delay ends
    frame_timer: f64,
    last_pts: f64,
    last_delay: f64,
}

impl FrameTimer {
    pub fn new(now: f64) -> Self {
        Self {
            frame_timer: now,
            last_pts: 0.0,
            last_delay: INITIAL_FRAME_DELAY,
        }
    }

    pub fn frame_timer(&self) -> f64 {
        self.frame_timer
    }

    pub fn last_delay(&self) -> f64 {
        self.last_delay
    }

    /// Restart the timer at `now`, as after a seek
    pub fn reset(&mut self, now: f64) {
        self.frame_timer = now;
    }

    /// Delay for the picture with `pts`. `master` is the master clock
    /// reading, or `None` when video itself is the master.
    pub fn compute_delay(&mut self, pts: f64, master: Option<f64>) -> PacingDecision {
        let mut delay = pts - self.last_pts;
        if delay <= 0.0 || delay >= 1.0 {
            // bogus distance (discontinuity or first picture)
            delay = self.last_delay;
        }
        self.last_delay = delay;
        self.last_pts = pts;

        let Some(reference) = master else {
            return PacingDecision {
                delay,
                action: PacingAction::OnTime,
            };
        };

        let diff = pts - reference;
        if diff.abs() >= AV_NOSYNC_THRESHOLD {
            return PacingDecision {
                delay,
                action: PacingAction::Unsynced,
            };
        }

        let sync_threshold = delay.max(AV_SYNC_THRESHOLD);
        let decision = if diff <= -sync_threshold {
            PacingDecision {
                delay: 0.0,
                action: PacingAction::CatchUp,
            }
        } else if diff >= sync_threshold {
            PacingDecision {
                delay: 2.0 * delay,
                action: PacingAction::SlowDown,
            }
        } else {
            PacingDecision {
                delay,
                action: PacingAction::OnTime,
            }
        };
        trace!(
            "FrameTimer: pts {:.3} diff {:+.3} delay {:.3} {:?}",
            pts, diff, decision.delay, decision.action
        );
        decision
    }

    /// Advance the frame timer by `delay` and return how long to wait from
    /// `now`, never less than [`AV_SYNC_THRESHOLD`].
    pub fn schedule(&mut self, delay: f64, now: f64) -> f64 {
        self.frame_timer += delay;
        (self.frame_timer - now).max(AV_SYNC_THRESHOLD)
    }
}

/// Predicts the PTS of decoded pictures and advances the video clock.
///
/// Owned by the video worker: a picture without a usable PTS takes the
/// predicted one, and every picture pushes the prediction forward by its
/// duration, repeated fields included.
#[derive(Debug, Clone, Copy)]
pub struct VideoClockPredictor {
    frame_duration: f64,
}

impl VideoClockPredictor {
    pub fn new(frame_duration: f64) -> Self {
        Self { frame_duration }
    }

    pub fn frame_duration(&self) -> f64 {
        self.frame_duration
    }

    /// Resolve the picture PTS and return `(pts, next_clock)`
    pub fn synchronize(&self, pts: Option<f64>, repeat_pict: u32, clock: f64) -> (f64, f64) {
        let pts = pts.unwrap_or(clock);
        let frame_delay = self.frame_duration + repeat_pict as f64 * 0.5 * self.frame_duration;
        (pts, pts + frame_delay)
    }
}
