//! Deterministic in-memory media source
//!
//! Produces a video track of flat-colour pictures, a PCM tone and an
//! optional bitmap subtitle track, all with exact timestamps. Used by the
//! `--synthetic` CLI mode and by the session tests, where no codec library
//! or real file is available.

use crate::decoder::{
    AudioDecode, DecodedAudio, DecodedSubtitle, DecoderFactory, Demuxer, Resample,
    SubtitleDecode, VideoDecode,
};
use crate::error::{PlayerError, Result};
use crate::pipeline::seek::SeekDirection;
use crate::pipeline::types::{
    AudioParams, MediaKind, Packet, SampleFormat, SubtitleCue, SubtitleRect, TimeBase,
    TrackInfo, TrackParams, VideoFrame,
};
use bytes::{BufMut, Bytes, BytesMut};
use log::debug;

/// Every synthetic track counts in milliseconds
const TIME_BASE: TimeBase = TimeBase::new(1, 1000);

const VIDEO_TRACK: usize = 0;
const AUDIO_TRACK: usize = 1;
const SUBTITLE_TRACK: usize = 2;

/// Duration of one audio packet
const AUDIO_PACKET_MS: i64 = 20;
const SUBTITLE_PERIOD_MS: i64 = 2000;
const SUBTITLE_SHOWN_MS: u32 = 1000;

#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub with_audio: bool,
    pub with_subtitles: bool,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            duration_secs: 10.0,
            width: 64,
            height: 48,
            fps: 25,
            sample_rate: 8000,
            channels: 2,
            with_audio: true,
            with_subtitles: true,
        }
    }
}

impl SyntheticSpec {
    /// Whole milliseconds per picture, at least one
    fn frame_ms(&self) -> i64 {
        (1000 / self.fps.max(1) as i64).max(1)
    }

    fn duration_ms(&self) -> i64 {
        (self.duration_secs * 1000.0) as i64
    }

    fn audio_params(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: SampleFormat::S16,
        }
    }
}

pub struct SyntheticDemuxer {
    spec: SyntheticSpec,
    tracks: Vec<TrackInfo>,
    /// Next timestamp per track, `None` when the track is absent
    next: [Option<i64>; 3],
}

impl SyntheticDemuxer {
    pub fn new(spec: SyntheticSpec) -> Self {
        let mut tracks = vec![TrackInfo {
            index: VIDEO_TRACK,
            kind: MediaKind::Video,
            time_base: TIME_BASE,
            params: TrackParams::Video {
                width: spec.width,
                height: spec.height,
                sample_aspect_ratio: None,
                frame_duration: Some(spec.frame_ms() as f64 / 1000.0),
            },
        }];
        if spec.with_audio {
            tracks.push(TrackInfo {
                index: AUDIO_TRACK,
                kind: MediaKind::Audio,
                time_base: TIME_BASE,
                params: TrackParams::Audio {
                    sample_rate: spec.sample_rate,
                    channels: spec.channels,
                },
            });
        }
        if spec.with_subtitles {
            tracks.push(TrackInfo {
                index: SUBTITLE_TRACK,
                kind: MediaKind::Subtitle,
                time_base: TIME_BASE,
                params: TrackParams::Subtitle,
            });
        }
        let next = [
            Some(0),
            spec.with_audio.then_some(0),
            spec.with_subtitles.then_some(0),
        ];
        Self { spec, tracks, next }
    }

    fn step(&self, track: usize) -> i64 {
        match track {
            VIDEO_TRACK => self.spec.frame_ms(),
            AUDIO_TRACK => AUDIO_PACKET_MS,
            _ => SUBTITLE_PERIOD_MS,
        }
    }

    fn video_packet(&self, pts: i64) -> Packet {
        let index = (pts / self.spec.frame_ms()) as u32;
        // payload sized like a small compressed picture
        let mut data = BytesMut::with_capacity(256);
        data.put_u32_le(index);
        data.resize(256, 0);
        Packet::new(VIDEO_TRACK, data.freeze(), TIME_BASE)
            .with_pts(pts)
            .with_dts(pts)
    }

    fn audio_packet(&self, pts: i64) -> Packet {
        let rate = self.spec.sample_rate as i64;
        let samples = rate * AUDIO_PACKET_MS / 1000;
        let first = rate * pts / 1000;
        let mut data = BytesMut::with_capacity(samples as usize * self.spec.audio_params().frame_bytes());
        for n in first..first + samples {
            let phase = 2.0 * std::f64::consts::PI * 440.0 * n as f64 / rate as f64;
            let value = (phase.sin() * 8000.0) as i16;
            for _ in 0..self.spec.channels {
                data.put_i16_le(value);
            }
        }
        Packet::new(AUDIO_TRACK, data.freeze(), TIME_BASE)
            .with_pts(pts)
            .with_dts(pts)
    }

    fn subtitle_packet(&self, pts: i64) -> Packet {
        Packet::new(SUBTITLE_TRACK, Bytes::from_static(b"cue"), TIME_BASE).with_pts(pts)
    }
}

impl Demuxer for SyntheticDemuxer {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let end = self.spec.duration_ms();
        let Some((track, pts)) = self
            .next
            .iter()
            .enumerate()
            .filter_map(|(track, next)| next.map(|pts| (track, pts)))
            .filter(|&(_, pts)| pts < end)
            .min_by_key(|&(track, pts)| (pts, track))
        else {
            return Ok(None);
        };

        self.next[track] = Some(pts + self.step(track));
        let packet = match track {
            VIDEO_TRACK => self.video_packet(pts),
            AUDIO_TRACK => self.audio_packet(pts),
            _ => self.subtitle_packet(pts),
        };
        Ok(Some(packet))
    }

    fn seek(&mut self, track: usize, target: i64, direction: SeekDirection) -> Result<()> {
        let Some(info) = self.tracks.iter().find(|info| info.index == track) else {
            return Err(PlayerError::Seek {
                target: target as f64,
                reason: format!("no track {}", track),
            });
        };
        let target_ms = TIME_BASE.from_secs(info.time_base.to_secs(target));
        if target_ms < 0 || target_ms > self.spec.duration_ms() {
            return Err(PlayerError::Seek {
                target: target_ms as f64 / 1000.0,
                reason: "outside the stream".into(),
            });
        }

        for track in 0..self.next.len() {
            if self.next[track].is_none() {
                continue;
            }
            let step = self.step(track);
            let aligned = match direction {
                SeekDirection::Backward => target_ms / step * step,
                SeekDirection::Forward => (target_ms + step - 1) / step * step,
            };
            self.next[track] = Some(aligned);
        }
        debug!("SyntheticDemuxer: seek to {} ms ({:?})", target_ms, direction);
        Ok(())
    }
}

/// Luma of the picture with the given index
pub fn picture_luma(index: u32) -> u8 {
    16 + (index * 8 % 220) as u8
}

pub struct SyntheticVideoDecoder {
    width: u32,
    height: u32,
}

impl VideoDecode for SyntheticVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        let Some(index) = packet.data.get(..4) else {
            return Err(PlayerError::Decode("truncated picture".into()));
        };
        let index = u32::from_le_bytes([index[0], index[1], index[2], index[3]]);
        let luma_len = (self.width * self.height) as usize;
        let mut data = vec![picture_luma(index); luma_len];
        data.resize(VideoFrame::packed_len(self.width, self.height), 128);
        Ok(vec![VideoFrame {
            width: self.width,
            height: self.height,
            data,
            pts: packet.pts_secs(),
            repeat_pict: 0,
        }])
    }

    fn flush_state(&mut self) {}
}

/// Interleaved PCM chunk
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub params: AudioParams,
    pub data: Bytes,
    pub pts: Option<f64>,
}

impl DecodedAudio for PcmFrame {
    fn params(&self) -> AudioParams {
        self.params
    }

    fn samples(&self) -> usize {
        self.data.len() / self.params.frame_bytes().max(1)
    }

    fn pts(&self) -> Option<f64> {
        self.pts
    }
}

pub struct SyntheticAudioDecoder {
    params: AudioParams,
}

impl AudioDecode for SyntheticAudioDecoder {
    type Frame = PcmFrame;

    fn decode(&mut self, packet: &Packet) -> Result<Vec<PcmFrame>> {
        if packet.data.len() % self.params.frame_bytes().max(1) != 0 {
            return Err(PlayerError::Decode("partial sample frame".into()));
        }
        Ok(vec![PcmFrame {
            params: self.params,
            data: packet.data.clone(),
            pts: packet.pts_secs(),
        }])
    }

    fn flush_state(&mut self) {}
}

/// Signed 16-bit converter: nearest-neighbour rate conversion and channel
/// up/down-mixing by copying or dropping channels
#[derive(Debug, Default)]
pub struct PcmResampler {
    source: Option<AudioParams>,
    target: Option<AudioParams>,
}

impl Resample<PcmFrame> for PcmResampler {
    fn configure(&mut self, source: &AudioParams, target: &AudioParams) -> Result<()> {
        if source.format != SampleFormat::S16 || target.format != SampleFormat::S16 {
            return Err(PlayerError::Resample(format!(
                "{} to {} not supported",
                source.format.name(),
                target.format.name()
            )));
        }
        if source.sample_rate == 0 || source.channels == 0 || target.channels == 0 {
            return Err(PlayerError::Resample("empty layout".into()));
        }
        self.source = Some(*source);
        self.target = Some(*target);
        Ok(())
    }

    fn convert(&mut self, frame: PcmFrame, out: &mut Vec<u8>) -> Result<usize> {
        let (Some(source), Some(target)) = (self.source, self.target) else {
            return Err(PlayerError::Resample("not configured".into()));
        };
        let in_channels = source.channels as usize;
        let in_frames = frame.data.len() / source.frame_bytes();
        let out_frames =
            (in_frames as u64 * target.sample_rate as u64 / source.sample_rate as u64) as usize;

        let start = out.len();
        out.reserve(out_frames * target.frame_bytes());
        for i in 0..out_frames {
            let src = i * in_frames / out_frames.max(1);
            for ch in 0..target.channels as usize {
                let offset = (src * in_channels + ch.min(in_channels - 1)) * 2;
                out.extend_from_slice(&frame.data[offset..offset + 2]);
            }
        }
        Ok(out.len() - start)
    }
}

pub struct SyntheticSubtitleDecoder {
    width: u32,
    height: u32,
}

impl SubtitleDecode for SyntheticSubtitleDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedSubtitle>> {
        if packet.data.is_empty() {
            return Ok(None);
        }
        let width = (self.width / 2).max(2);
        let height = (self.height / 8).max(2);
        Ok(Some(DecodedSubtitle {
            pts: packet.pts_secs(),
            cue: SubtitleCue {
                pts: 0.0,
                start_display_ms: 0,
                end_display_ms: SUBTITLE_SHOWN_MS,
                rects: vec![SubtitleRect {
                    x: (self.width / 4) as i32,
                    y: (self.height - height - 2) as i32,
                    width,
                    height,
                    pixels: vec![1; (width * height) as usize],
                    stride: width as usize,
                    palette: vec![0x00_00_80_80, 0xc0_eb_80_80],
                }],
            },
        }))
    }

    fn flush_state(&mut self) {}
}

/// Opens decoders for the tracks of a [`SyntheticDemuxer`]
pub struct SyntheticFactory {
    /// Picture size subtitle cues are laid out for
    canvas: (u32, u32),
}

impl SyntheticFactory {
    pub fn new(spec: &SyntheticSpec) -> Self {
        Self {
            canvas: (spec.width, spec.height),
        }
    }
}

fn video_size(track: &TrackInfo) -> Result<(u32, u32)> {
    match track.params {
        TrackParams::Video { width, height, .. } => Ok((width, height)),
        _ => Err(PlayerError::TrackOpen {
            index: track.index,
            reason: format!("{} track has no picture size", track.kind),
        }),
    }
}

impl DecoderFactory for SyntheticFactory {
    type Audio = SyntheticAudioDecoder;
    type Resampler = PcmResampler;

    fn video_decoder(&self, track: &TrackInfo) -> Result<Box<dyn VideoDecode>> {
        let (width, height) = video_size(track)?;
        Ok(Box::new(SyntheticVideoDecoder { width, height }))
    }

    fn audio_decoder(&self, track: &TrackInfo) -> Result<SyntheticAudioDecoder> {
        match track.params {
            TrackParams::Audio {
                sample_rate,
                channels,
            } => Ok(SyntheticAudioDecoder {
                params: AudioParams {
                    sample_rate,
                    channels,
                    format: SampleFormat::S16,
                },
            }),
            _ => Err(PlayerError::TrackOpen {
                index: track.index,
                reason: "not an audio track".into(),
            }),
        }
    }

    fn resampler(&self) -> PcmResampler {
        PcmResampler::default()
    }

    fn subtitle_decoder(&self, track: &TrackInfo) -> Result<Box<dyn SubtitleDecode>> {
        if track.kind != MediaKind::Subtitle {
            return Err(PlayerError::TrackOpen {
                index: track.index,
                reason: "not a subtitle track".into(),
            });
        }
        let (width, height) = self.canvas;
        Ok(Box::new(SyntheticSubtitleDecoder { width, height }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(demuxer: &mut SyntheticDemuxer) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(packet) = demuxer.read_packet().unwrap() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_packets_interleaved_by_timestamp() {
        let mut demuxer = SyntheticDemuxer::new(SyntheticSpec {
            duration_secs: 1.0,
            ..Default::default()
        });
        let packets = drain(&mut demuxer);

        assert_eq!(packets.iter().filter(|p| p.track == VIDEO_TRACK).count(), 25);
        assert_eq!(packets.iter().filter(|p| p.track == AUDIO_TRACK).count(), 50);
        assert_eq!(packets.iter().filter(|p| p.track == SUBTITLE_TRACK).count(), 1);
        assert!(packets.windows(2).all(|w| w[0].pts <= w[1].pts));
    }

    #[test]
    fn test_seek_aligns_every_track() {
        let mut demuxer = SyntheticDemuxer::new(SyntheticSpec::default());
        demuxer.seek(VIDEO_TRACK, 5030, SeekDirection::Backward).unwrap();
        let first = demuxer.read_packet().unwrap().unwrap();
        assert_eq!(first.pts, Some(4000)); // subtitle grid is 2 s

        let mut demuxer = SyntheticDemuxer::new(SyntheticSpec {
            with_subtitles: false,
            ..Default::default()
        });
        demuxer.seek(VIDEO_TRACK, 5030, SeekDirection::Forward).unwrap();
        let first = demuxer.read_packet().unwrap().unwrap();
        assert_eq!(first.pts, Some(5040));

        assert!(demuxer.seek(VIDEO_TRACK, 60_000, SeekDirection::Forward).is_err());
    }

    #[test]
    fn test_very_high_frame_rate_still_advances() {
        let mut demuxer = SyntheticDemuxer::new(SyntheticSpec {
            duration_secs: 0.01,
            fps: 5000,
            with_audio: false,
            with_subtitles: false,
            ..Default::default()
        });
        let mut last = -1;
        let mut count = 0;
        while let Some(packet) = demuxer.read_packet().unwrap() {
            let pts = packet.pts.unwrap();
            assert!(pts > last);
            last = pts;
            count += 1;
        }
        assert_eq!(count, 10);
        demuxer.seek(VIDEO_TRACK, 5, SeekDirection::Forward).unwrap();
        assert_eq!(demuxer.read_packet().unwrap().unwrap().pts, Some(5));
    }

    #[test]
    fn test_video_decoder_stamps_pictures() {
        let spec = SyntheticSpec::default();
        let mut demuxer = SyntheticDemuxer::new(spec.clone());
        let track = demuxer.tracks()[0].clone();
        let mut decoder = SyntheticFactory::new(&spec).video_decoder(&track).unwrap();
        demuxer.read_packet().unwrap(); // picture 0
        let packet = loop {
            let packet = demuxer.read_packet().unwrap().unwrap();
            if packet.track == VIDEO_TRACK {
                break packet;
            }
        };
        let frames = decoder.decode(&packet).unwrap();
        assert_eq!(frames[0].pts, Some(0.04));
        assert_eq!(frames[0].data[0], picture_luma(1));
        assert_eq!(frames[0].data.len(), VideoFrame::packed_len(64, 48));
    }

    #[test]
    fn test_resampler_upmixes_and_converts_rate() {
        let source = AudioParams {
            sample_rate: 8000,
            channels: 1,
            format: SampleFormat::S16,
        };
        let target = AudioParams {
            sample_rate: 16_000,
            channels: 2,
            format: SampleFormat::S16,
        };
        let mut resampler = PcmResampler::default();
        resampler.configure(&source, &target).unwrap();

        let frame = PcmFrame {
            params: source,
            data: Bytes::from(vec![1, 0, 2, 0]),
            pts: None,
        };
        let mut out = Vec::new();
        assert_eq!(resampler.convert(frame, &mut out).unwrap(), 16);
        assert_eq!(out, vec![1, 0, 1, 0, 1, 0, 1, 0, 2, 0, 2, 0, 2, 0, 2, 0]);
    }

    #[test]
    fn test_resampler_rejects_float() {
        let mut resampler = PcmResampler::default();
        let source = AudioParams {
            sample_rate: 8000,
            channels: 1,
            format: SampleFormat::F32,
        };
        let target = AudioParams {
            format: SampleFormat::S16,
            ..source
        };
        assert!(matches!(
            resampler.configure(&source, &target),
            Err(PlayerError::Resample(_))
        ));
    }
}
