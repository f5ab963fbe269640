//! Per-track decode workers
//!
//! Thin loops: block on the packet queue, hand packets to the decoder,
//! stamp the output and publish it to the presentation rings. A flush
//! sentinel resets the decoder exactly once before the next packet.

use crate::decoder::{SubtitleDecode, VideoDecode};
use crate::error::{PlayerError, Result};
use crate::pipeline::clock::MediaClock;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::packet_queue::{Dequeue, PacketQueue};
use crate::pipeline::picture_queue::PictureQueue;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::subtitle_queue::SubtitleQueue;
use crate::pipeline::types::Packet;
use crate::pipeline::video_pacer::{INITIAL_FRAME_DELAY, VideoClockPredictor};
use log::{debug, warn};
use std::sync::Arc;

pub struct VideoWorker {
    decoder: Box<dyn VideoDecode>,
    queue: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    clock: Arc<MediaClock>,
    health: Arc<PipelineHealth>,
    predictor: VideoClockPredictor,
    /// Flush sentinels consumed, in step with the clock's seek generation
    generation: u64,
}

impl VideoWorker {
    /// `frame_duration` is the nominal picture duration in seconds, when the
    /// container knows it
    pub fn new(
        decoder: Box<dyn VideoDecode>,
        queue: Arc<PacketQueue>,
        pictures: Arc<PictureQueue>,
        clock: Arc<MediaClock>,
        health: Arc<PipelineHealth>,
        frame_duration: Option<f64>,
    ) -> Self {
        let frame_duration = frame_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(INITIAL_FRAME_DELAY);
        Self {
            decoder,
            queue,
            pictures,
            clock,
            health,
            predictor: VideoClockPredictor::new(frame_duration),
            generation: 0,
        }
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<()> {
        let frames = match self.decoder.decode(packet) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("VideoWorker: dropping packet: {}", e);
                self.health.record_decode_failure();
                return Ok(());
            }
        };

        if self.generation < self.clock.seek_generation() {
            // packet read before a seek whose sentinel is still queued
            debug!("VideoWorker: dropping {} pre-seek frames", frames.len());
            return Ok(());
        }

        for frame in frames {
            let pts = frame.pts.or_else(|| packet.dts_secs());
            let (pts, next) =
                self.predictor
                    .synchronize(pts, frame.repeat_pict, self.clock.predicted_video_clock());
            self.clock.set_predicted_video_clock(next);

            match self.pictures.queue_picture(&frame, pts, self.generation) {
                Ok(()) => {}
                Err(PlayerError::Quit) => return Err(PlayerError::Quit),
                Err(e) if e.is_transient() => {
                    warn!("VideoWorker: picture at {:.3}s skipped: {}", pts, e);
                    self.health.record_decode_failure();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl PipelineStage for VideoWorker {
    fn run(&mut self) -> Result<()> {
        loop {
            match self.queue.get(true) {
                Dequeue::Packet(packet) => self.handle_packet(&packet)?,
                Dequeue::Flush => {
                    debug!("VideoWorker: flush, resetting decoder");
                    self.generation = (self.generation + 1).max(self.clock.seek_generation());
                    self.decoder.flush_state();
                    self.health.record_decoder_reset();
                }
                Dequeue::Empty => {}
                Dequeue::Quit => return Err(PlayerError::Quit),
            }
        }
    }

    fn name(&self) -> &'static str {
        "video-decode"
    }
}

pub struct SubtitleWorker {
    decoder: Box<dyn SubtitleDecode>,
    queue: Arc<PacketQueue>,
    cues: Arc<SubtitleQueue>,
    health: Arc<PipelineHealth>,
}

impl SubtitleWorker {
    pub fn new(
        decoder: Box<dyn SubtitleDecode>,
        queue: Arc<PacketQueue>,
        cues: Arc<SubtitleQueue>,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            decoder,
            queue,
            cues,
            health,
        }
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<()> {
        let decoded = match self.decoder.decode(packet) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("SubtitleWorker: dropping packet: {}", e);
                self.health.record_decode_failure();
                return Ok(());
            }
        };

        let mut cue = decoded.cue;
        cue.pts = decoded
            .pts
            .or_else(|| packet.pts_secs())
            .or_else(|| packet.dts_secs())
            .unwrap_or(0.0);
        self.cues.push(cue)
    }
}

impl PipelineStage for SubtitleWorker {
    fn run(&mut self) -> Result<()> {
        loop {
            match self.queue.get(true) {
                Dequeue::Packet(packet) => self.handle_packet(&packet)?,
                Dequeue::Flush => {
                    debug!("SubtitleWorker: flush, resetting decoder");
                    self.decoder.flush_state();
                    self.health.record_decoder_reset();
                }
                Dequeue::Empty => {}
                Dequeue::Quit => return Err(PlayerError::Quit),
            }
        }
    }

    fn name(&self) -> &'static str {
        "subtitle-decode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedSubtitle;
    use crate::display::surface::YuvSurface;
    use crate::pipeline::clock::SyncMaster;
    use crate::pipeline::picture_queue::PresentEvent;
    use crate::pipeline::stage::spawn_stage;
    use crate::pipeline::types::{MediaKind, SubtitleCue, TimeBase, VideoFrame};
    use crate::utils::{SignalOfStop, lock};
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Decoder that emits one 4x4 frame per packet and records every call
    struct ScriptedVideo {
        calls: Arc<Mutex<Vec<&'static str>>>,
        frame_pts: Option<f64>,
    }

    impl VideoDecode for ScriptedVideo {
        fn decode(&mut self, _packet: &Packet) -> Result<Vec<VideoFrame>> {
            lock(&self.calls).push("decode");
            Ok(vec![VideoFrame {
                width: 4,
                height: 4,
                data: vec![16; VideoFrame::packed_len(4, 4)],
                pts: self.frame_pts,
                repeat_pict: 0,
            }])
        }

        fn flush_state(&mut self) {
            lock(&self.calls).push("flush");
        }
    }

    struct Rig {
        sos: SignalOfStop,
        queue: Arc<PacketQueue>,
        pictures: Arc<PictureQueue>,
        clock: Arc<MediaClock>,
        health: Arc<PipelineHealth>,
        events: mpsc::Receiver<PresentEvent>,
    }

    fn rig() -> Rig {
        let sos = SignalOfStop::new();
        let (tx, events) = mpsc::channel();
        Rig {
            queue: Arc::new(PacketQueue::new(MediaKind::Video, sos.clone())),
            pictures: Arc::new(PictureQueue::new(4, tx, sos.clone())),
            clock: Arc::new(MediaClock::new(SyncMaster::Video)),
            health: Arc::new(PipelineHealth::new()),
            sos,
            events,
        }
    }

    fn packet(pts: i64) -> Packet {
        Packet::new(0, Bytes::from_static(b"v"), TimeBase::new(1, 1000))
            .with_pts(pts)
            .with_dts(pts)
    }

    /// Answer allocation requests until `count` pictures are queued
    fn present_until(rig: &Rig, count: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while rig.pictures.len() < count {
            assert!(std::time::Instant::now() < deadline, "pictures never queued");
            if let Ok(PresentEvent::Allocate { slot, width, height }) =
                rig.events.recv_timeout(Duration::from_millis(10))
            {
                rig.pictures
                    .complete_allocation(slot, Some(YuvSurface::new(width, height, slot as u64)));
            }
        }
    }

    #[test]
    fn test_flush_sentinel_resets_decoder_exactly_once() {
        let rig = rig();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let worker = VideoWorker::new(
            Box::new(ScriptedVideo {
                calls: Arc::clone(&calls),
                frame_pts: None,
            }),
            Arc::clone(&rig.queue),
            Arc::clone(&rig.pictures),
            Arc::clone(&rig.clock),
            Arc::clone(&rig.health),
            Some(0.04),
        );

        rig.queue.put(packet(0)).unwrap();
        rig.queue.put_flush().unwrap();
        rig.queue.put(packet(40)).unwrap();
        rig.queue.put(packet(80)).unwrap();

        let handle = spawn_stage(worker).unwrap();
        present_until(&rig, 3);

        rig.sos.cancel();
        rig.queue.wake();
        rig.pictures.wake();
        handle.join().unwrap().unwrap();

        assert_eq!(*lock(&calls), vec!["decode", "flush", "decode", "decode"]);
        assert_eq!(rig.health.decoder_resets(), 1);
    }

    #[test]
    fn test_frames_decoded_before_seek_sentinel_are_dropped() {
        let rig = rig();
        let worker = VideoWorker::new(
            Box::new(ScriptedVideo {
                calls: Arc::new(Mutex::new(Vec::new())),
                frame_pts: None,
            }),
            Arc::clone(&rig.queue),
            Arc::clone(&rig.pictures),
            Arc::clone(&rig.clock),
            Arc::clone(&rig.health),
            Some(0.04),
        );

        // the seek already re-based the clocks, the old packet is still queued
        rig.queue.put(packet(1000)).unwrap();
        rig.clock.reseed(30.0);
        rig.queue.put_flush().unwrap();
        rig.queue.put(packet(30_000)).unwrap();

        let handle = spawn_stage(worker).unwrap();
        present_until(&rig, 1);
        thread::sleep(Duration::from_millis(20));
        rig.sos.cancel();
        rig.queue.wake();
        rig.pictures.wake();
        handle.join().unwrap().unwrap();

        let state = rig.pictures.lock();
        assert_eq!(state.len(), 1);
        assert_eq!(state.peek(0).unwrap().pts, 30.0);
        assert_eq!(state.peek(0).unwrap().generation, 1);
    }

    #[test]
    fn test_picture_pts_falls_back_to_packet_dts_then_clock() {
        let rig = rig();
        let worker = VideoWorker::new(
            Box::new(ScriptedVideo {
                calls: Arc::new(Mutex::new(Vec::new())),
                frame_pts: None,
            }),
            Arc::clone(&rig.queue),
            Arc::clone(&rig.pictures),
            Arc::clone(&rig.clock),
            Arc::clone(&rig.health),
            Some(0.04),
        );

        rig.queue.put(packet(1000)).unwrap();
        rig.queue
            .put(Packet::new(0, Bytes::from_static(b"v"), TimeBase::new(1, 1000)))
            .unwrap();

        let handle = spawn_stage(worker).unwrap();
        present_until(&rig, 2);
        rig.sos.cancel();
        rig.queue.wake();
        handle.join().unwrap().unwrap();

        let state = rig.pictures.lock();
        assert_eq!(state.peek(0).unwrap().pts, 1.0);
        // no timestamps at all: predicted from the previous picture
        assert!((state.peek(1).unwrap().pts - 1.04).abs() < 1e-9);
        drop(state);
        assert!((rig.clock.predicted_video_clock() - 1.08).abs() < 1e-9);
    }

    #[test]
    fn test_quit_stops_blocked_worker() {
        let rig = rig();
        let worker = VideoWorker::new(
            Box::new(ScriptedVideo {
                calls: Arc::new(Mutex::new(Vec::new())),
                frame_pts: Some(0.0),
            }),
            Arc::clone(&rig.queue),
            Arc::clone(&rig.pictures),
            Arc::clone(&rig.clock),
            Arc::clone(&rig.health),
            None,
        );
        let handle = spawn_stage(worker).unwrap();
        thread::sleep(Duration::from_millis(20));
        rig.sos.cancel();
        rig.queue.wake();
        assert!(handle.join().unwrap().is_ok());
    }

    struct OneShotSubtitle {
        resets: Arc<Mutex<u32>>,
    }

    impl SubtitleDecode for OneShotSubtitle {
        fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedSubtitle>> {
            if packet.data.is_empty() {
                return Err(PlayerError::Decode("empty subtitle packet".into()));
            }
            Ok(Some(DecodedSubtitle {
                pts: None,
                cue: SubtitleCue {
                    pts: 0.0,
                    start_display_ms: 0,
                    end_display_ms: 500,
                    rects: Vec::new(),
                },
            }))
        }

        fn flush_state(&mut self) {
            *lock(&self.resets) += 1;
        }
    }

    #[test]
    fn test_subtitle_worker_stamps_cues() {
        let sos = SignalOfStop::new();
        let queue = Arc::new(PacketQueue::new(MediaKind::Subtitle, sos.clone()));
        let cues = Arc::new(SubtitleQueue::new(2, sos.clone()));
        let health = Arc::new(PipelineHealth::new());
        let resets = Arc::new(Mutex::new(0));
        let worker = SubtitleWorker::new(
            Box::new(OneShotSubtitle {
                resets: Arc::clone(&resets),
            }),
            Arc::clone(&queue),
            Arc::clone(&cues),
            Arc::clone(&health),
        );

        queue
            .put(Packet::new(2, Bytes::new(), TimeBase::new(1, 1000)).with_pts(0))
            .unwrap();
        queue.put_flush().unwrap();
        queue
            .put(Packet::new(2, Bytes::from_static(b"s"), TimeBase::new(1, 1000)).with_pts(2500))
            .unwrap();

        let handle = spawn_stage(worker).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while cues.is_empty() {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        sos.cancel();
        queue.wake();
        handle.join().unwrap().unwrap();

        assert_eq!(*lock(&resets), 1);
        assert_eq!(health.decode_failures(), 1);
        // the cue takes the packet pts and is retired after 2.5 + 0.5
        assert_eq!(cues.retire_expired(2.9), 0);
        assert_eq!(cues.retire_expired(3.1), 1);
    }
}
