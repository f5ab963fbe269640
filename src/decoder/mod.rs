//! Demuxer and decoder seams.
//!
//! The engine never talks to a codec library directly: the demux loop, the
//! decode workers and the audio callback are written against these traits,
//! and a backend (FFmpeg, or the synthetic source used by tests) plugs in.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;

use crate::error::Result;
use crate::pipeline::seek::SeekDirection;
use crate::pipeline::types::{AudioParams, Packet, SubtitleCue, TrackInfo, VideoFrame};

/// Container reader
pub trait Demuxer: Send {
    /// Every elementary stream the container exposes
    fn tracks(&self) -> &[TrackInfo];

    /// Next packet, `Ok(None)` at end of stream
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Reposition on `target`, expressed in ticks of `track`'s time base
    fn seek(&mut self, track: usize, target: i64, direction: SeekDirection) -> Result<()>;
}

pub trait VideoDecode: Send {
    /// Feed one packet; an empty result means the decoder needs more input
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>>;

    /// Drop any reference frames buffered before a seek
    fn flush_state(&mut self);
}

/// Decoded bitmap subtitle before its PTS is resolved
#[derive(Debug, Clone)]
pub struct DecodedSubtitle {
    pub pts: Option<f64>,
    pub cue: SubtitleCue,
}

pub trait SubtitleDecode: Send {
    /// `Ok(None)` when the packet did not complete a bitmap cue
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedSubtitle>>;

    fn flush_state(&mut self);
}

/// Accessors the audio engine needs on a decoded audio frame
pub trait DecodedAudio {
    fn params(&self) -> AudioParams;
    /// Samples per channel
    fn samples(&self) -> usize;
    /// Best-effort presentation time in seconds
    fn pts(&self) -> Option<f64>;
}

pub trait AudioDecode: Send {
    type Frame: DecodedAudio + Send;

    fn decode(&mut self, packet: &Packet) -> Result<Vec<Self::Frame>>;

    fn flush_state(&mut self);
}

/// Sample format and rate converter feeding the output device
pub trait Resample<F>: Send {
    /// (Re)build the conversion for a new source layout
    fn configure(&mut self, source: &AudioParams, target: &AudioParams) -> Result<()>;

    /// Append converted interleaved PCM to `out`, returning the bytes written
    fn convert(&mut self, frame: F, out: &mut Vec<u8>) -> Result<usize>;
}

/// Opens a decoder per track
pub trait DecoderFactory {
    type Audio: AudioDecode + 'static;
    type Resampler: Resample<<Self::Audio as AudioDecode>::Frame> + 'static;

    fn video_decoder(&self, track: &TrackInfo) -> Result<Box<dyn VideoDecode>>;

    fn audio_decoder(&self, track: &TrackInfo) -> Result<Self::Audio>;

    fn resampler(&self) -> Self::Resampler;

    fn subtitle_decoder(&self, track: &TrackInfo) -> Result<Box<dyn SubtitleDecode>>;
}
