use crate::error::Result;
use crate::pipeline::clock::SyncMaster;
use crate::pipeline::demux::QueueLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Session tuning knobs.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub sync_master: SyncMaster,
    /// Demuxer stops reading while the audio queue holds more than this
    pub max_audio_queue_bytes: usize,
    pub max_video_queue_bytes: usize,
    pub picture_queue_size: usize,
    pub subtitle_queue_size: usize,
    /// Output device buffer, in sample frames
    pub audio_buffer_frames: u32,
    pub audio_enabled: bool,
    /// Seek steps bound to the `+`/`-` and `>`/`<` commands, in seconds
    pub short_seek_secs: f64,
    pub long_seek_secs: f64,
    pub viewport: (u32, u32),
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let limits = QueueLimits::default();
        Self {
            sync_master: SyncMaster::default(),
            max_audio_queue_bytes: limits.max_audio_bytes,
            max_video_queue_bytes: limits.max_video_bytes,
            picture_queue_size: 1,
            subtitle_queue_size: 1,
            audio_buffer_frames: 1024,
            audio_enabled: true,
            short_seek_secs: 10.0,
            long_seek_secs: 60.0,
            viewport: (640, 480),
        }
    }
}

impl PlayerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_audio_bytes: self.max_audio_queue_bytes,
            max_video_bytes: self.max_video_queue_bytes,
        }
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
