//! Error taxonomy shared by every pipeline component

use thiserror::Error;

/// Errors raised by the playback engine.
///
/// Variants map onto how the caller is expected to react: transient decode
/// problems are logged and skipped, exhaustion is reported to the immediate
/// caller, fatal stream errors stop the session and `Quit` unwinds every
/// blocking wait once shutdown has begun.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The session quit flag was observed while waiting
    #[error("shutdown in progress")]
    Quit,

    #[error("out of memory while {0}")]
    ResourceExhausted(&'static str),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("resampler unavailable: {0}")]
    Resample(String),

    #[error("demuxer read failed: {0}")]
    Demux(String),

    #[error("seek to {target:.3}s failed: {reason}")]
    Seek { target: f64, reason: String },

    #[error("no playable audio or video track")]
    NoPlayableTracks,

    #[error("track {index} could not be opened: {reason}")]
    TrackOpen { index: usize, reason: String },

    #[error("audio output: {0}")]
    AudioOutput(String),

    #[error("surface allocation failed for {width}x{height}")]
    Surface { width: u32, height: u32 },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PlayerError {
    /// Errors that only cost the current packet or frame.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlayerError::Decode(_) | PlayerError::Resample(_) | PlayerError::Surface { .. }
        )
    }

    pub fn is_quit(&self) -> bool {
        matches!(self, PlayerError::Quit)
    }
}

pub type Result<T, E = PlayerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(PlayerError::Decode("bad slice".into()).is_transient());
        assert!(PlayerError::Surface { width: 4, height: 4 }.is_transient());
        assert!(!PlayerError::Demux("eio".into()).is_transient());
        assert!(PlayerError::Quit.is_quit());
        assert!(!PlayerError::NoPlayableTracks.is_quit());
    }

    #[test]
    fn test_error_messages() {
        let err = PlayerError::Seek {
            target: 12.5,
            reason: "no index".into(),
        };
        assert_eq!(err.to_string(), "seek to 12.500s failed: no index");
    }
}
