//! Audio sync engine
//!
//! Runs inside the audio device's pull callback. Each time the staging
//! chunk is drained it pulls packets from the audio queue, decodes and
//! resamples them, and, when audio is not the master clock, stretches or
//! shortens the chunk so the audio clock converges on the master.
//!
//! The callback never blocks on the queue: an empty queue plays a short
//! silence chunk, a quit turns the engine into a silence source.

use crate::decoder::{AudioDecode, DecodedAudio, Resample};
use crate::display::audio_buffer::AudioChunk;
use crate::pipeline::clock::{MediaClock, SyncMaster};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::packet_queue::{Dequeue, PacketQueue};
use crate::pipeline::types::{AudioParams, SampleFormat};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// Number of drift measurements averaged before any correction
pub const AUDIO_DIFF_AVG_NB: u32 = 20;

/// Largest stretch or shrink applied to one chunk, in percent
pub const SAMPLE_CORRECTION_PERCENT_MAX: usize = 10;

/// Drift (seconds) beyond which the streams are considered unrelated
pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;

/// Silence played when the queue runs dry, before frame alignment
const SILENCE_CHUNK_BYTES: usize = 1024;

/// What the drift corrector decided for one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    Unchanged,
    /// Drift exceeded the no-sync threshold; averaging restarted
    Reset,
    /// Emit this many bytes instead of the decoded size
    Resize(usize),
}

/// Exponentially weighted drift average and the resulting size correction
#[derive(Debug, Clone)]
pub struct DriftCorrector {
    diff_cum: f64,
    coef: f64,
    threshold: f64,
    avg_count: u32,
}

impl DriftCorrector {
    /// `device_buffer_frames` is the hardware buffer in sample frames; twice
    /// its duration is the drift tolerated before correcting.
    pub fn new(device_buffer_frames: u32, sample_rate: u32) -> Self {
        let threshold = if sample_rate == 0 {
            0.0
        } else {
            2.0 * device_buffer_frames as f64 / sample_rate as f64
        };
        Self {
            diff_cum: 0.0,
            coef: (0.01f64.ln() / AUDIO_DIFF_AVG_NB as f64).exp(),
            threshold,
            avg_count: 0,
        }
    }

    pub fn coef(&self) -> f64 {
        self.coef
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Smoothed drift estimate
    pub fn average(&self) -> f64 {
        self.diff_cum * (1.0 - self.coef)
    }

    pub fn reset(&mut self) {
        self.diff_cum = 0.0;
        self.avg_count = 0;
    }

    /// Feed the drift `diff = audio_clock - master_clock` measured for a
    /// chunk of `samples_size` bytes and decide its corrected size.
    pub fn correct(
        &mut self,
        diff: f64,
        samples_size: usize,
        sample_rate: u32,
        frame_bytes: usize,
    ) -> Correction {
        if !diff.is_finite() || frame_bytes == 0 {
            return Correction::Unchanged;
        }

        if diff.abs() >= AV_NOSYNC_THRESHOLD {
            self.reset();
            return Correction::Reset;
        }

        self.diff_cum = diff + self.coef * self.diff_cum;
        if self.avg_count < AUDIO_DIFF_AVG_NB {
            self.avg_count += 1;
            return Correction::Unchanged;
        }

        if self.average().abs() < self.threshold {
            return Correction::Unchanged;
        }

        let frames = (samples_size / frame_bytes) as i64;
        let wanted = frames + (diff * sample_rate as f64) as i64;
        let min = (frames * (100 - SAMPLE_CORRECTION_PERCENT_MAX as i64) + 99) / 100;
        let max = frames * (100 + SAMPLE_CORRECTION_PERCENT_MAX as i64) / 100;
        let wanted_size = wanted.clamp(min, max) as usize * frame_bytes;

        if wanted_size == samples_size {
            Correction::Unchanged
        } else {
            Correction::Resize(wanted_size)
        }
    }
}

/// Truncate `buf`, or grow it by repeating its final sample frame
pub fn resize_chunk(buf: &mut Vec<u8>, wanted: usize, frame_bytes: usize) {
    let len = buf.len();
    if wanted <= len {
        buf.truncate(wanted);
        return;
    }
    if frame_bytes == 0 || len < frame_bytes {
        return;
    }

    buf.reserve(wanted - len);
    let last = len - frame_bytes;
    while buf.len() + frame_bytes <= wanted {
        buf.extend_from_within(last..len);
    }
}

/// How a drained chunk was refilled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refill {
    Decoded,
    Underrun,
    Stopped,
}

/// Decode/resample/correct state machine driven by the output callback.
///
/// Holds only weak references to the queue and clock it serves, so the
/// device callback cannot keep a torn-down session alive.
pub struct AudioEngine<D: AudioDecode, R> {
    queue: Weak<PacketQueue>,
    clock: Weak<MediaClock>,
    health: Arc<PipelineHealth>,
    decoder: D,
    resampler: R,
    /// Format of the device
    target: AudioParams,
    /// Source layout the resampler is configured for
    source: Option<AudioParams>,
    pending: VecDeque<D::Frame>,
    chunk: AudioChunk,
    corrector: DriftCorrector,
    stopped: bool,
}

impl<D, R> AudioEngine<D, R>
where
    D: AudioDecode,
    R: Resample<D::Frame>,
{
    pub fn new(
        decoder: D,
        resampler: R,
        target: AudioParams,
        device_buffer_frames: u32,
        queue: &Arc<PacketQueue>,
        clock: &Arc<MediaClock>,
        health: Arc<PipelineHealth>,
    ) -> Self {
        info!(
            "AudioEngine: output {} Hz, {} ch, {}",
            target.sample_rate,
            target.channels,
            target.format.name()
        );
        Self {
            queue: Arc::downgrade(queue),
            clock: Arc::downgrade(clock),
            health,
            decoder,
            resampler,
            target,
            source: None,
            pending: VecDeque::new(),
            chunk: AudioChunk::new(),
            corrector: DriftCorrector::new(device_buffer_frames, target.sample_rate),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn silence_byte(&self) -> u8 {
        if self.target.format == SampleFormat::U8 || self.target.format == SampleFormat::U8Planar {
            0x80
        } else {
            0
        }
    }

    /// Fill `out` completely; called from the device thread
    pub fn fill(&mut self, out: &mut [u8]) {
        let (Some(queue), Some(clock)) = (self.queue.upgrade(), self.clock.upgrade()) else {
            out.fill(self.silence_byte());
            return;
        };
        if self.stopped {
            out.fill(self.silence_byte());
            return;
        }

        let mut written = 0;
        while written < out.len() {
            if self.chunk.is_drained() {
                match self.refill(&queue, &clock) {
                    Refill::Decoded => {}
                    Refill::Underrun => {
                        self.health.record_underrun();
                        let frame_bytes = self.target.frame_bytes().max(1);
                        let len = (SILENCE_CHUNK_BYTES / frame_bytes).max(1) * frame_bytes;
                        self.chunk.fill_silence(len, self.silence_byte());
                    }
                    Refill::Stopped => {
                        debug!("AudioEngine: queue closed, playing silence");
                        self.stopped = true;
                        self.chunk.reset();
                        out[written..].fill(self.silence_byte());
                        break;
                    }
                }
            }
            written += self.chunk.copy_to(&mut out[written..]);
        }

        clock.set_audio_buffer_state(self.chunk.remaining(), self.target.bytes_per_second());
    }

    fn refill(&mut self, queue: &PacketQueue, clock: &MediaClock) -> Refill {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                if self.resample(frame, clock) {
                    self.synchronize(clock);
                    return Refill::Decoded;
                }
            }

            match queue.get(false) {
                Dequeue::Packet(packet) => {
                    if let Some(pts) = packet.pts_secs() {
                        clock.set_audio_clock(pts);
                    }
                    match self.decoder.decode(&packet) {
                        Ok(frames) => self.pending.extend(frames),
                        Err(e) => {
                            warn!("AudioEngine: dropping packet: {}", e);
                            self.health.record_decode_failure();
                        }
                    }
                }
                Dequeue::Flush => {
                    self.decoder.flush_state();
                    self.pending.clear();
                    self.corrector.reset();
                    self.health.record_decoder_reset();
                }
                Dequeue::Empty => return Refill::Underrun,
                Dequeue::Quit => return Refill::Stopped,
            }
        }
    }

    /// Convert one frame into the staging chunk and advance the audio clock.
    /// Returns `false` when the frame was skipped.
    fn resample(&mut self, frame: D::Frame, clock: &MediaClock) -> bool {
        let params = frame.params();
        let samples = frame.samples();
        let pts = frame.pts();

        if self.source != Some(params) {
            if let Err(e) = self.resampler.configure(&params, &self.target) {
                warn!("AudioEngine: cannot convert {:?}: {}", params, e);
                self.source = None;
                self.health.record_decode_failure();
                return false;
            }
            self.source = Some(params);
        }

        let buf = self.chunk.refill();
        if let Err(e) = self.resampler.convert(frame, buf) {
            warn!("AudioEngine: resample failed: {}", e);
            self.health.record_decode_failure();
            self.chunk.reset();
            return false;
        }

        if params.sample_rate > 0 {
            let start = pts.unwrap_or_else(|| clock.raw_audio_clock());
            clock.set_audio_clock(start + samples as f64 / params.sample_rate as f64);
        }

        !self.chunk.is_empty()
    }

    /// Stretch or shrink the fresh chunk toward the master clock
    fn synchronize(&mut self, clock: &MediaClock) {
        if clock.master() == SyncMaster::Audio {
            return;
        }

        // The previous chunk is fully played at this point
        clock.set_audio_buffer_state(0, self.target.bytes_per_second());
        let diff = clock.audio_clock() - clock.master_clock();
        let frame_bytes = self.target.frame_bytes();
        let size = self.chunk.len();

        match self
            .corrector
            .correct(diff, size, self.target.sample_rate, frame_bytes)
        {
            Correction::Unchanged => {}
            Correction::Reset => self.health.record_sync_reset(),
            Correction::Resize(wanted) => {
                let buf = self.chunk.unread_mut();
                resize_chunk(buf, wanted, frame_bytes);
                self.health.record_audio_correction();
            }
        }
    }
}
