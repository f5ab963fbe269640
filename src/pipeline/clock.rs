//! Media clocks for audio-video synchronization

use crate::utils::AtomicF64;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Which clock every other stream is corrected against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMaster {
    Audio,
    #[default]
    Video,
    External,
}

impl FromStr for SyncMaster {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(SyncMaster::Audio),
            "video" => Ok(SyncMaster::Video),
            "external" | "ext" => Ok(SyncMaster::External),
            other => Err(format!("unknown sync master '{}'", other)),
        }
    }
}

impl std::fmt::Display for SyncMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMaster::Audio => write!(f, "audio"),
            SyncMaster::Video => write!(f, "video"),
            SyncMaster::External => write!(f, "external"),
        }
    }
}

/// Audio, video and external clocks plus the master selector.
///
/// Each field has exactly one writer:
/// - the audio output callback owns the audio clock and buffer state
/// - the video decode worker owns the predicted `video_clock`
/// - the presentation thread owns `video_current_pts` and its timestamp
///
/// Readers on any thread go through atomics, so `master_clock()` never blocks.
/// All times are seconds; "now" is measured from the clock's base instant.
pub struct MediaClock {
    /// Monotonic reference for every wall-clock reading
    base: Instant,

    master: SyncMaster,

    /// PTS of the end of the last decoded audio chunk
    audio_clock: AtomicF64,
    /// Bytes produced by the resampler but not yet handed to the device
    audio_unplayed_bytes: AtomicUsize,
    /// Output rate in bytes per second, `0` until the device is open
    audio_bytes_per_sec: AtomicUsize,

    /// Predicted PTS of the next frame to decode
    video_clock: AtomicF64,
    /// PTS of the picture on screen and when it was put there
    video_current_pts: AtomicF64,
    video_current_pts_time: AtomicF64,

    /// External clock reads `now + external_offset`
    external_offset: AtomicF64,

    /// Bumped after every successful seek
    seek_generation: AtomicU64,
}

impl MediaClock {
    /// Create a new media clock starting now
    pub fn new(master: SyncMaster) -> Self {
        Self {
            base: Instant::now(),
            master,
            audio_clock: AtomicF64::new(0.0),
            audio_unplayed_bytes: AtomicUsize::new(0),
            audio_bytes_per_sec: AtomicUsize::new(0),
            video_clock: AtomicF64::new(0.0),
            video_current_pts: AtomicF64::new(0.0),
            video_current_pts_time: AtomicF64::new(0.0),
            external_offset: AtomicF64::new(0.0),
            seek_generation: AtomicU64::new(0),
        }
    }

    pub fn master(&self) -> SyncMaster {
        self.master
    }

    /// Seconds elapsed since the clock base
    pub fn now(&self) -> f64 {
        self.base.elapsed().as_secs_f64()
    }

    // ---- audio ----------------------------------------------------------

    pub fn set_audio_clock(&self, pts: f64) {
        self.audio_clock.store(pts);
    }

    pub fn raw_audio_clock(&self) -> f64 {
        self.audio_clock.load()
    }

    /// Record how much decoded audio is still waiting to reach the device
    pub fn set_audio_buffer_state(&self, unplayed_bytes: usize, bytes_per_sec: usize) {
        self.audio_unplayed_bytes
            .store(unplayed_bytes, Ordering::Release);
        self.audio_bytes_per_sec
            .store(bytes_per_sec, Ordering::Release);
    }

    /// PTS currently audible: the decoded PTS minus what is still buffered
    pub fn audio_clock(&self) -> f64 {
        let pts = self.audio_clock.load();
        let bytes_per_sec = self.audio_bytes_per_sec.load(Ordering::Acquire);
        if bytes_per_sec == 0 {
            return pts;
        }
        let unplayed = self.audio_unplayed_bytes.load(Ordering::Acquire);
        pts - unplayed as f64 / bytes_per_sec as f64
    }

    // ---- video ----------------------------------------------------------

    pub fn predicted_video_clock(&self) -> f64 {
        self.video_clock.load()
    }

    pub fn set_predicted_video_clock(&self, pts: f64) {
        self.video_clock.store(pts);
    }

    /// Called by the presentation thread when a picture reaches the screen
    pub fn set_video_current(&self, pts: f64) {
        self.set_video_current_at(pts, self.now());
    }

    fn set_video_current_at(&self, pts: f64, now: f64) {
        self.video_current_pts.store(pts);
        self.video_current_pts_time.store(now);
    }

    pub fn video_current_pts(&self) -> f64 {
        self.video_current_pts.load()
    }

    /// PTS on screen, extrapolated by the time it has been visible
    pub fn video_clock(&self) -> f64 {
        self.video_clock_at(self.now())
    }

    fn video_clock_at(&self, now: f64) -> f64 {
        self.video_current_pts.load() + (now - self.video_current_pts_time.load())
    }

    // ---- external -------------------------------------------------------

    pub fn external_clock(&self) -> f64 {
        self.now() + self.external_offset.load()
    }

    // ---- arbitration ----------------------------------------------------

    /// Reading of the configured master clock
    pub fn master_clock(&self) -> f64 {
        match self.master {
            SyncMaster::Audio => self.audio_clock(),
            SyncMaster::Video => self.video_clock(),
            SyncMaster::External => self.external_clock(),
        }
    }

    /// Re-base every clock on a seek target and bump the seek generation
    pub fn reseed(&self, target: f64) {
        let now = self.now();
        self.external_offset.store(target - now);
        self.audio_clock.store(target);
        self.audio_unplayed_bytes.store(0, Ordering::Release);
        self.video_clock.store(target);
        self.set_video_current_at(target, now);
        self.seek_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn seek_generation(&self) -> u64 {
        self.seek_generation.load(Ordering::Acquire)
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new(SyncMaster::default())
    }
}

impl std::fmt::Debug for MediaClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaClock")
            .field("master", &self.master)
            .field("audio", &self.audio_clock())
            .field("video", &self.video_clock())
            .field("external", &self.external_clock())
            .finish()
    }
}
