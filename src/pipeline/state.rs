//! Session lifecycle

use std::fmt;
use std::time::{Duration, Instant};

/// Where a session is in its one-way lifecycle.
///
/// A session only moves forward: `Idle`, `Initializing`, `Running`,
/// `Stopping`, `Stopped`. Opening may fail, so `Initializing` may skip
/// straight to `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Tracks are being opened and threads spawned
    Initializing,
    Running { started_at: Instant },
    /// Quit raised, threads are being joined
    Stopping,
    Stopped,
}

impl PipelineState {
    fn step(&self) -> u8 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Initializing => 1,
            PipelineState::Running { .. } => 2,
            PipelineState::Stopping => 3,
            PipelineState::Stopped => 4,
        }
    }

    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        if self == target {
            return true;
        }
        let (from, to) = (self.step(), target.step());
        to == from + 1 || (*self == PipelineState::Initializing && to == 3)
    }

    /// Move to `target` if allowed, returning whether the state changed
    pub fn advance(&mut self, target: PipelineState) -> bool {
        if *self != target && self.can_transition_to(&target) {
            *self = target;
            true
        } else {
            false
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running { .. })
    }

    /// Stopping or already stopped
    pub fn is_stopped(&self) -> bool {
        self.step() >= 3
    }

    pub fn playing_for(&self) -> Option<Duration> {
        match self {
            PipelineState::Running { started_at } => Some(started_at.elapsed()),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Initializing => "initializing",
            PipelineState::Running { .. } => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> PipelineState {
        PipelineState::Running {
            started_at: Instant::now(),
        }
    }

    #[test]
    fn test_forward_path() {
        let mut state = PipelineState::Idle;
        assert!(state.advance(PipelineState::Initializing));
        assert!(state.advance(running()));
        assert!(state.advance(PipelineState::Stopping));
        assert!(state.advance(PipelineState::Stopped));
        assert_eq!(state, PipelineState::Stopped);
    }

    #[test]
    fn test_failed_open_skips_running() {
        let mut state = PipelineState::Initializing;
        assert!(state.advance(PipelineState::Stopping));
        assert!(state.is_stopped());
        assert!(state.playing_for().is_none());
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!PipelineState::Idle.can_transition_to(&running()));
        assert!(!running().can_transition_to(&PipelineState::Stopped));
        assert!(!PipelineState::Stopped.can_transition_to(&PipelineState::Idle));

        let mut state = PipelineState::Stopping;
        assert!(!state.advance(PipelineState::Initializing));
        assert_eq!(state, PipelineState::Stopping);
    }

    #[test]
    fn test_same_state_is_not_a_change() {
        let mut state = PipelineState::Stopped;
        assert!(state.can_transition_to(&PipelineState::Stopped));
        assert!(!state.advance(PipelineState::Stopped));
        assert_eq!(running().to_string(), "running");
        assert!(running().is_running());
        assert!(running().playing_for().is_some());
    }
}
