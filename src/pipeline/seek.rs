//! Seek requests
//!
//! At most one request is pending at a time. The UI thread posts it, the
//! demux loop takes it at its next safe point and executes it.

use crate::utils::lock;
use log::debug;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// Absolute target in seconds
    pub target: f64,
    pub direction: SeekDirection,
}

impl SeekRequest {
    /// Target relative to `position`, never before the start of the stream
    pub fn relative(position: f64, increment: f64) -> Self {
        Self {
            target: (position + increment).max(0.0),
            direction: if increment < 0.0 {
                SeekDirection::Backward
            } else {
                SeekDirection::Forward
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct SeekController {
    pending: Mutex<Option<SeekRequest>>,
}

impl SeekController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a request. Returns `false`, leaving the pending one untouched,
    /// when a request is already waiting.
    pub fn request(&self, request: SeekRequest) -> bool {
        let mut pending = lock(&self.pending);
        if pending.is_some() {
            debug!("SeekController: dropping request to {:.3}s, one is pending", request.target);
            return false;
        }
        *pending = Some(request);
        true
    }

    /// Take the pending request, clearing the flag
    pub fn take(&self) -> Option<SeekRequest> {
        lock(&self.pending).take()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_request_is_noop_while_pending() {
        let seek = SeekController::new();
        let first = SeekRequest::relative(30.0, 10.0);
        assert!(seek.request(first));
        assert!(!seek.request(SeekRequest::relative(30.0, -60.0)));

        assert_eq!(seek.take(), Some(first));
        assert!(!seek.is_pending());
        assert_eq!(seek.take(), None);
    }

    #[test]
    fn test_request_accepted_after_take() {
        let seek = SeekController::new();
        assert!(seek.request(SeekRequest::relative(0.0, 10.0)));
        seek.take();
        assert!(seek.request(SeekRequest::relative(10.0, 10.0)));
    }

    #[test]
    fn test_relative_direction_and_floor() {
        let back = SeekRequest::relative(5.0, -10.0);
        assert_eq!(back.direction, SeekDirection::Backward);
        assert_eq!(back.target, 0.0);

        let forward = SeekRequest::relative(5.0, 60.0);
        assert_eq!(forward.direction, SeekDirection::Forward);
        assert_eq!(forward.target, 65.0);
    }
}
