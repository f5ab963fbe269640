//! FFmpeg backend built on `ac-ffmpeg`.
//!
//! Any container and codec the linked FFmpeg understands can be played.
//! Pictures are converted to packed YUV 4:2:0, audio is resampled to the
//! layout the output device asked for. `ac-ffmpeg` has no subtitle decoding,
//! so subtitle packets are queued and consumed without producing cues.

use crate::decoder::{
    AudioDecode, DecodedAudio, DecodedSubtitle, DecoderFactory, Demuxer, Resample, SubtitleDecode,
    VideoDecode,
};
use crate::error::{PlayerError, Result};
use crate::pipeline::seek::SeekDirection;
use crate::pipeline::types::{
    AudioParams, MediaKind, Packet, SampleFormat, TimeBase, TrackInfo, TrackParams, VideoFrame,
};
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioDecoder, AudioFrame, AudioResampler, ChannelLayout};
use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::{VideoDecoder, VideoFrameScaler};
use ac_ffmpeg::codec::{AudioCodecParameters, VideoCodecParameters};
use ac_ffmpeg::format::demuxer::{DemuxerWithStreamInfo, SeekTarget};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::Timestamp;
use bytes::Bytes;
use log::{debug, info};
use std::fs::File;
use std::path::Path;

fn ff_time_base(tb: TimeBase) -> ac_ffmpeg::time::TimeBase {
    ac_ffmpeg::time::TimeBase::new(tb.num, tb.den)
}

fn ts_secs(ts: Timestamp) -> Option<f64> {
    if ts.is_null() {
        return None;
    }
    let tb = ts.time_base();
    Some(TimeBase::new(tb.num() as i32, tb.den() as i32).to_secs(ts.timestamp()))
}

fn decode_err(e: ac_ffmpeg::Error) -> PlayerError {
    PlayerError::Decode(e.to_string())
}

/// Container reader over a seekable file
pub struct FfmpegDemuxer {
    inner: DemuxerWithStreamInfo<File>,
    tracks: Vec<TrackInfo>,
    video_params: Vec<(usize, VideoCodecParameters)>,
    audio_params: Vec<(usize, AudioCodecParameters)>,
}

unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let io = IO::from_seekable_read_stream(file);

        let inner = ac_ffmpeg::format::demuxer::Demuxer::builder()
            .build(io)
            .map_err(|e| PlayerError::Demux(format!("{}: {}", path.display(), e)))?
            .find_stream_info(None)
            .map_err(|(_, e)| PlayerError::Demux(format!("stream info: {}", e)))?;

        let mut tracks = Vec::new();
        let mut video_params = Vec::new();
        let mut audio_params = Vec::new();

        for (index, stream) in inner.streams().iter().enumerate() {
            let tb = stream.time_base();
            let time_base = TimeBase::new(tb.num() as i32, tb.den() as i32);
            let codec = stream.codec_parameters();

            let (kind, params) = if let Some(video) = codec.as_video_codec_parameters() {
                video_params.push((index, video.clone()));
                (
                    MediaKind::Video,
                    TrackParams::Video {
                        width: video.width() as u32,
                        height: video.height() as u32,
                        sample_aspect_ratio: None,
                        frame_duration: None,
                    },
                )
            } else if let Some(audio) = codec.as_audio_codec_parameters() {
                audio_params.push((index, audio.clone()));
                (
                    MediaKind::Audio,
                    TrackParams::Audio {
                        sample_rate: audio.sample_rate(),
                        channels: audio.channel_layout().channels() as u16,
                    },
                )
            } else if codec.is_subtitle_codec() {
                (MediaKind::Subtitle, TrackParams::Subtitle)
            } else {
                debug!("FfmpegDemuxer: ignoring data stream {}", index);
                continue;
            };

            tracks.push(TrackInfo {
                index,
                kind,
                time_base,
                params,
            });
        }

        info!(
            "FfmpegDemuxer: opened {} with {} usable tracks",
            path.display(),
            tracks.len()
        );

        Ok(Self {
            inner,
            tracks,
            video_params,
            audio_params,
        })
    }

    /// Decoder factory bound to this container's codec parameters
    pub fn factory(&self) -> FfmpegFactory {
        FfmpegFactory {
            video: self.video_params.clone(),
            audio: self.audio_params.clone(),
        }
    }
}

impl Demuxer for FfmpegDemuxer {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let Some(packet) = self
            .inner
            .take()
            .map_err(|e| PlayerError::Demux(e.to_string()))?
        else {
            return Ok(None);
        };

        let tb = packet.time_base();
        let mut out = Packet::new(
            packet.stream_index(),
            Bytes::copy_from_slice(packet.data()),
            TimeBase::new(tb.num() as i32, tb.den() as i32),
        );
        if !packet.pts().is_null() {
            out = out.with_pts(packet.pts().timestamp());
        }
        if !packet.dts().is_null() {
            out = out.with_dts(packet.dts().timestamp());
        }
        Ok(Some(out))
    }

    fn seek(&mut self, track: usize, target: i64, direction: SeekDirection) -> Result<()> {
        let time_base = self
            .tracks
            .iter()
            .find(|t| t.index == track)
            .map(|t| t.time_base)
            .unwrap_or_default();
        let ts = Timestamp::new(target, ff_time_base(time_base));
        let seek_target = match direction {
            SeekDirection::Backward => SeekTarget::UpTo,
            SeekDirection::Forward => SeekTarget::From,
        };

        self.inner
            .seek_to_timestamp(ts, seek_target)
            .map_err(|e| PlayerError::Seek {
                target: time_base.to_secs(target),
                reason: e.to_string(),
            })
    }
}

fn to_ff_packet(packet: &Packet) -> ac_ffmpeg::packet::Packet {
    let tb = ff_time_base(packet.time_base);
    let mut out = PacketMut::from(&packet.data[..]).with_time_base(tb);
    if let Some(pts) = packet.pts {
        out = out.with_pts(Timestamp::new(pts, tb));
    }
    if let Some(dts) = packet.dts {
        out = out.with_dts(Timestamp::new(dts, tb));
    }
    out.freeze()
}

#[derive(Clone, Copy)]
struct Plane<'a> {
    data: &'a [u8],
    stride: usize,
    width: usize,
    height: usize,
}

fn pack_yuv420(dst: &mut [u8], y: Plane<'_>, u: Plane<'_>, v: Plane<'_>) {
    let y_size = y.width * y.height;
    let u_size = u.width * u.height;
    extract_plane(&mut dst[..y_size], y);
    extract_plane(&mut dst[y_size..y_size + u_size], u);
    extract_plane(&mut dst[y_size + u_size..], v);
}

/// Strip stride padding from one plane
#[inline]
fn extract_plane(dst: &mut [u8], plane: Plane<'_>) {
    let Plane {
        data,
        stride,
        width,
        height,
    } = plane;

    if stride == width && data.len() >= width * height && dst.len() >= width * height {
        dst[..width * height].copy_from_slice(&data[..width * height]);
        return;
    }

    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * width;
        if src_start + width > data.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&data[src_start..src_start + width]);
    }
}

/// Video decoder producing packed YUV 4:2:0 pictures.
///
/// Flushing rebuilds the codec context: draining an FFmpeg decoder ends its
/// stream, which is not what a seek wants.
pub struct FfmpegVideoDecoder {
    params: VideoCodecParameters,
    time_base: TimeBase,
    decoder: VideoDecoder,
    scaler: Option<(VideoFrameScaler, usize, usize)>,
}

unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn new(params: VideoCodecParameters, time_base: TimeBase) -> Result<Self> {
        let decoder = Self::build(&params, time_base)?;
        Ok(Self {
            params,
            time_base,
            decoder,
            scaler: None,
        })
    }

    fn build(params: &VideoCodecParameters, time_base: TimeBase) -> Result<VideoDecoder> {
        VideoDecoder::from_codec_parameters(params)
            .and_then(|b| b.time_base(ff_time_base(time_base)).build())
            .map_err(decode_err)
    }

    fn to_yuv420(&mut self, frame: ac_ffmpeg::codec::video::VideoFrame) -> Result<VideoFrame> {
        let (w, h) = (frame.width(), frame.height());
        let pts = ts_secs(frame.pts());
        let yuv420p = get_pixel_format("yuv420p");

        let frame = if frame.pixel_format() == yuv420p {
            frame
        } else {
            if !matches!(self.scaler, Some((_, sw, sh)) if sw == w && sh == h) {
                let scaler = VideoFrameScaler::builder()
                    .source_pixel_format(frame.pixel_format())
                    .source_width(w)
                    .source_height(h)
                    .target_pixel_format(yuv420p)
                    .target_width(w)
                    .target_height(h)
                    .build()
                    .map_err(decode_err)?;
                self.scaler = Some((scaler, w, h));
            }
            match self.scaler.as_mut() {
                Some((scaler, _, _)) => scaler.scale(&frame).map_err(decode_err)?,
                None => return Err(PlayerError::Decode("scaler missing".into())),
            }
        };

        let planes = frame.planes();
        if planes.len() < 3 {
            return Err(PlayerError::Decode("expected three planes".into()));
        }
        let (uw, uh) = (w.div_ceil(2), h.div_ceil(2));
        let mut data = vec![0u8; VideoFrame::packed_len(w as u32, h as u32)];
        pack_yuv420(
            &mut data,
            Plane {
                data: planes[0].data(),
                stride: planes[0].line_size(),
                width: w,
                height: h,
            },
            Plane {
                data: planes[1].data(),
                stride: planes[1].line_size(),
                width: uw,
                height: uh,
            },
            Plane {
                data: planes[2].data(),
                stride: planes[2].line_size(),
                width: uw,
                height: uh,
            },
        );

        Ok(VideoFrame {
            width: w as u32,
            height: h as u32,
            data,
            pts,
            repeat_pict: 0,
        })
    }
}

impl VideoDecode for FfmpegVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        self.decoder
            .try_push(to_ff_packet(packet))
            .map_err(decode_err)?;

        let mut frames = Vec::new();
        while let Some(frame) = self.decoder.take().map_err(decode_err)? {
            frames.push(self.to_yuv420(frame)?);
        }
        Ok(frames)
    }

    fn flush_state(&mut self) {
        match Self::build(&self.params, self.time_base) {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => log::warn!("FfmpegVideoDecoder: rebuild after flush failed: {}", e),
        }
    }
}

/// Decoded audio frame with its layout resolved
pub struct FfmpegAudioFrame {
    frame: AudioFrame,
    params: AudioParams,
}

unsafe impl Send for FfmpegAudioFrame {}

impl DecodedAudio for FfmpegAudioFrame {
    fn params(&self) -> AudioParams {
        self.params
    }

    fn samples(&self) -> usize {
        self.frame.samples()
    }

    fn pts(&self) -> Option<f64> {
        ts_secs(self.frame.pts())
    }
}

pub struct FfmpegAudioDecoder {
    params: AudioCodecParameters,
    time_base: TimeBase,
    decoder: AudioDecoder,
}

unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    fn new(params: AudioCodecParameters, time_base: TimeBase) -> Result<Self> {
        let decoder = Self::build(&params, time_base)?;
        Ok(Self {
            params,
            time_base,
            decoder,
        })
    }

    fn build(params: &AudioCodecParameters, time_base: TimeBase) -> Result<AudioDecoder> {
        AudioDecoder::from_codec_parameters(params)
            .and_then(|b| b.time_base(ff_time_base(time_base)).build())
            .map_err(decode_err)
    }
}

impl AudioDecode for FfmpegAudioDecoder {
    type Frame = FfmpegAudioFrame;

    fn decode(&mut self, packet: &Packet) -> Result<Vec<FfmpegAudioFrame>> {
        self.decoder
            .try_push(to_ff_packet(packet))
            .map_err(decode_err)?;

        let mut frames = Vec::new();
        while let Some(frame) = self.decoder.take().map_err(decode_err)? {
            let name = frame.sample_format().name();
            let format = SampleFormat::from_name(name)
                .ok_or_else(|| PlayerError::Decode(format!("unsupported sample format {}", name)))?;
            let params = AudioParams {
                sample_rate: frame.sample_rate(),
                channels: frame.channel_layout().channels() as u16,
                format,
            };
            frames.push(FfmpegAudioFrame { frame, params });
        }
        Ok(frames)
    }

    fn flush_state(&mut self) {
        match Self::build(&self.params, self.time_base) {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => log::warn!("FfmpegAudioDecoder: rebuild after flush failed: {}", e),
        }
    }
}

/// `swresample` conversion to the device layout
#[derive(Default)]
pub struct FfmpegResampler {
    inner: Option<AudioResampler>,
    target: Option<AudioParams>,
}

unsafe impl Send for FfmpegResampler {}

impl Resample<FfmpegAudioFrame> for FfmpegResampler {
    fn configure(&mut self, source: &AudioParams, target: &AudioParams) -> Result<()> {
        let layout = |channels: u16| {
            ChannelLayout::from_channels(channels as u32)
                .ok_or_else(|| PlayerError::Resample(format!("no layout for {} channels", channels)))
        };

        let resampler = AudioResampler::builder()
            .source_channel_layout(layout(source.channels)?)
            .source_sample_format(get_sample_format(source.format.name()))
            .source_sample_rate(source.sample_rate)
            .target_channel_layout(layout(target.channels)?)
            .target_sample_format(get_sample_format(target.format.name()))
            .target_sample_rate(target.sample_rate)
            .build()
            .map_err(|e| PlayerError::Resample(e.to_string()))?;

        self.inner = Some(resampler);
        self.target = Some(*target);
        Ok(())
    }

    fn convert(&mut self, frame: FfmpegAudioFrame, out: &mut Vec<u8>) -> Result<usize> {
        let (Some(resampler), Some(target)) = (self.inner.as_mut(), self.target) else {
            return Err(PlayerError::Resample("not configured".into()));
        };

        resampler
            .push(frame.frame)
            .map_err(|e| PlayerError::Resample(e.to_string()))?;

        let mut written = 0;
        while let Some(converted) = resampler
            .take()
            .map_err(|e| PlayerError::Resample(e.to_string()))?
        {
            let planes = converted.planes();
            if let Some(plane) = planes.first() {
                // plane buffers are padded past the last sample
                let len = (converted.samples() * target.frame_bytes()).min(plane.data().len());
                out.extend_from_slice(&plane.data()[..len]);
                written += len;
            }
        }
        Ok(written)
    }
}

struct UnsupportedSubtitles;

impl SubtitleDecode for UnsupportedSubtitles {
    fn decode(&mut self, _packet: &Packet) -> Result<Option<DecodedSubtitle>> {
        Ok(None)
    }

    fn flush_state(&mut self) {}
}

/// Opens FFmpeg decoders from the parameters captured at demuxer open
pub struct FfmpegFactory {
    video: Vec<(usize, VideoCodecParameters)>,
    audio: Vec<(usize, AudioCodecParameters)>,
}

unsafe impl Send for FfmpegFactory {}

impl DecoderFactory for FfmpegFactory {
    type Audio = FfmpegAudioDecoder;
    type Resampler = FfmpegResampler;

    fn video_decoder(&self, track: &TrackInfo) -> Result<Box<dyn VideoDecode>> {
        let params = self
            .video
            .iter()
            .find(|(index, _)| *index == track.index)
            .map(|(_, params)| params.clone())
            .ok_or_else(|| PlayerError::TrackOpen {
                index: track.index,
                reason: "not a video stream".into(),
            })?;
        Ok(Box::new(FfmpegVideoDecoder::new(params, track.time_base)?))
    }

    fn audio_decoder(&self, track: &TrackInfo) -> Result<FfmpegAudioDecoder> {
        let params = self
            .audio
            .iter()
            .find(|(index, _)| *index == track.index)
            .map(|(_, params)| params.clone())
            .ok_or_else(|| PlayerError::TrackOpen {
                index: track.index,
                reason: "not an audio stream".into(),
            })?;
        FfmpegAudioDecoder::new(params, track.time_base)
    }

    fn resampler(&self) -> FfmpegResampler {
        FfmpegResampler::default()
    }

    fn subtitle_decoder(&self, track: &TrackInfo) -> Result<Box<dyn SubtitleDecode>> {
        debug!(
            "FfmpegFactory: subtitle track {} has no bitmap decoder, cues are dropped",
            track.index
        );
        Ok(Box::new(UnsupportedSubtitles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plane_strips_stride() {
        let src = [1, 2, 0, 0, 3, 4, 0, 0];
        let mut dst = [0u8; 4];
        extract_plane(
            &mut dst,
            Plane {
                data: &src,
                stride: 4,
                width: 2,
                height: 2,
            },
        );
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    fn square(data: &[u8], side: usize) -> Plane<'_> {
        Plane {
            data,
            stride: side,
            width: side,
            height: side,
        }
    }

    #[test]
    fn test_pack_yuv420_layout() {
        let (y, u, v) = ([10u8; 16], [20u8; 4], [30u8; 4]);
        let mut dst = vec![0u8; VideoFrame::packed_len(4, 4)];
        pack_yuv420(&mut dst, square(&y, 4), square(&u, 2), square(&v, 2));
        assert!(dst[..16].iter().all(|&b| b == 10));
        assert!(dst[16..20].iter().all(|&b| b == 20));
        assert!(dst[20..].iter().all(|&b| b == 30));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = FfmpegDemuxer::open("/nonexistent/clip.mkv").err();
        assert!(matches!(err, Some(PlayerError::Io(_))));
    }
}
