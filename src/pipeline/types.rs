//! Core types for the pipeline system

use bytes::Bytes;

/// Rational time base of a track: one tick lasts `num / den` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Convert a tick count into seconds
    pub fn to_secs(&self, ticks: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        ticks as f64 * self.num as f64 / self.den as f64
    }

    /// Convert seconds into ticks of this base, rounding toward zero
    pub fn from_secs(&self, secs: f64) -> i64 {
        if self.num == 0 {
            return 0;
        }
        (secs * self.den as f64 / self.num as f64) as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        // microseconds, the demuxer-wide base
        Self::new(1, 1_000_000)
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
            MediaKind::Subtitle => write!(f, "Subtitle"),
        }
    }
}

/// Interleaved or planar PCM sample layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
    F64Planar,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8Planar => 1,
            SampleFormat::S16 | SampleFormat::S16Planar => 2,
            SampleFormat::S32 | SampleFormat::S32Planar => 4,
            SampleFormat::F32 | SampleFormat::F32Planar => 4,
            SampleFormat::F64 | SampleFormat::F64Planar => 8,
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            SampleFormat::U8Planar
                | SampleFormat::S16Planar
                | SampleFormat::S32Planar
                | SampleFormat::F32Planar
                | SampleFormat::F64Planar
        )
    }

    /// FFmpeg-style short name (`s16`, `fltp`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "flt",
            SampleFormat::F64 => "dbl",
            SampleFormat::U8Planar => "u8p",
            SampleFormat::S16Planar => "s16p",
            SampleFormat::S32Planar => "s32p",
            SampleFormat::F32Planar => "fltp",
            SampleFormat::F64Planar => "dblp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let format = match name {
            "u8" => SampleFormat::U8,
            "s16" => SampleFormat::S16,
            "s32" => SampleFormat::S32,
            "flt" => SampleFormat::F32,
            "dbl" => SampleFormat::F64,
            "u8p" => SampleFormat::U8Planar,
            "s16p" => SampleFormat::S16Planar,
            "s32p" => SampleFormat::S32Planar,
            "fltp" => SampleFormat::F32Planar,
            "dblp" => SampleFormat::F64Planar,
            _ => return None,
        };
        Some(format)
    }
}

/// PCM stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioParams {
    /// Bytes of one interleaved sample frame (all channels)
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_bytes()
    }
}

/// Stream-specific parameters of a track
#[derive(Debug, Clone, PartialEq)]
pub enum TrackParams {
    Video {
        width: u32,
        height: u32,
        /// Pixel aspect ratio, `None` when unknown or square
        sample_aspect_ratio: Option<(u32, u32)>,
        /// Nominal duration of one frame in seconds
        frame_duration: Option<f64>,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
    Subtitle,
}

/// One elementary stream exposed by the demuxer
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub time_base: TimeBase,
    pub params: TrackParams,
}

/// Compressed unit read from the container.
///
/// Owned by exactly one packet queue at a time; the payload is reference
/// counted so handing it to a decoder never copies.
#[derive(Clone)]
pub struct Packet {
    pub track: usize,
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub time_base: TimeBase,
}

impl Packet {
    pub fn new(track: usize, data: Bytes, time_base: TimeBase) -> Self {
        Self {
            track,
            data,
            pts: None,
            dts: None,
            time_base,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    /// Payload size used for queue accounting
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn pts_secs(&self) -> Option<f64> {
        self.pts.map(|pts| self.time_base.to_secs(pts))
    }

    pub fn dts_secs(&self) -> Option<f64> {
        self.dts.map(|dts| self.time_base.to_secs(dts))
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("track", &self.track)
            .field("size", &self.data.len())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .finish()
    }
}

/// Decoded picture in packed YUV 4:2:0 layout (Y, then U, then V, no padding)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Best-effort presentation time in seconds
    pub pts: Option<f64>,
    /// Extra half-frame durations this picture must be held for
    pub repeat_pict: u32,
}

impl VideoFrame {
    pub fn packed_len(width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
    }
}

/// Palette-indexed overlay region of a bitmap subtitle
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// One palette index per pixel, `stride` bytes per row
    pub pixels: Vec<u8>,
    pub stride: usize,
    /// Palette entries packed as `0xAAYYUUVV`
    pub palette: Vec<u32>,
}

/// Decoded subtitle cue waiting for its display window
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    /// Presentation time in seconds
    pub pts: f64,
    /// Display window relative to `pts`, in milliseconds
    pub start_display_ms: u32,
    pub end_display_ms: u32,
    pub rects: Vec<SubtitleRect>,
}

impl SubtitleCue {
    pub fn start_time(&self) -> f64 {
        self.pts + self.start_display_ms as f64 / 1000.0
    }

    pub fn end_time(&self) -> f64 {
        self.pts + self.end_display_ms as f64 / 1000.0
    }
}
