//! Demux and dispatch loop
//!
//! The only producer of packets. Reads one packet at a time, routes it to
//! the queue of its track, throttles itself when the queues hold enough
//! data and executes pending seeks between reads.

use crate::decoder::Demuxer;
use crate::error::{PlayerError, Result};
use crate::pipeline::clock::MediaClock;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::packet_queue::PacketQueue;
use crate::pipeline::picture_queue::{PictureQueue, PresentEvent};
use crate::pipeline::seek::{SeekController, SeekRequest};
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::subtitle_queue::SubtitleQueue;
use crate::pipeline::types::{Packet, TimeBase};
use crate::utils::SignalOfStop;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::Duration;

const BACKPRESSURE_WAIT: Duration = Duration::from_millis(10);
const EOF_WAIT: Duration = Duration::from_millis(100);

/// An opened track and the queue its packets go to
#[derive(Clone)]
pub struct TrackRoute {
    pub track: usize,
    pub time_base: TimeBase,
    pub queue: Arc<PacketQueue>,
}

/// Byte ceilings above which the loop stops reading
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_audio_bytes: usize,
    pub max_video_bytes: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_audio_bytes: 5 * 16 * 1024,
            max_video_bytes: 5 * 256 * 1024,
        }
    }
}

#[derive(Default)]
pub struct Routes {
    pub video: Option<TrackRoute>,
    pub audio: Option<TrackRoute>,
    pub subtitle: Option<TrackRoute>,
}

impl Routes {
    fn iter(&self) -> impl Iterator<Item = &TrackRoute> {
        [&self.video, &self.audio, &self.subtitle]
            .into_iter()
            .flatten()
    }

    fn find(&self, track: usize) -> Option<&TrackRoute> {
        self.iter().find(|route| route.track == track)
    }

    /// Track whose time base seek targets are expressed in
    fn reference(&self) -> Option<&TrackRoute> {
        self.video
            .as_ref()
            .or(self.audio.as_ref())
            .or(self.subtitle.as_ref())
    }
}

pub struct DemuxLoop {
    demuxer: Box<dyn Demuxer>,
    routes: Routes,
    pictures: Option<Arc<PictureQueue>>,
    cues: Option<Arc<SubtitleQueue>>,
    seek: Arc<SeekController>,
    clock: Arc<MediaClock>,
    health: Arc<PipelineHealth>,
    events: Sender<PresentEvent>,
    limits: QueueLimits,
    sos: SignalOfStop,
    at_eof: bool,
}

impl DemuxLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        routes: Routes,
        pictures: Option<Arc<PictureQueue>>,
        cues: Option<Arc<SubtitleQueue>>,
        seek: Arc<SeekController>,
        clock: Arc<MediaClock>,
        health: Arc<PipelineHealth>,
        events: Sender<PresentEvent>,
        limits: QueueLimits,
        sos: SignalOfStop,
    ) -> Self {
        Self {
            demuxer,
            routes,
            pictures,
            cues,
            seek,
            clock,
            health,
            events,
            limits,
            sos,
            at_eof: false,
        }
    }

    fn execute_seek(&mut self, request: SeekRequest) {
        let Some(reference) = self.routes.reference() else {
            return;
        };
        let target = reference.time_base.from_secs(request.target);
        debug!(
            "DemuxLoop: seeking to {:.3}s ({} ticks on track {})",
            request.target, target, reference.track
        );

        if let Err(e) = self
            .demuxer
            .seek(reference.track, target, request.direction)
        {
            warn!("DemuxLoop: seek to {:.3}s failed: {}", request.target, e);
            self.health.record_seek(false);
            return;
        }

        for route in self.routes.iter() {
            route.queue.flush();
            if let Err(e) = route.queue.put_flush() {
                warn!("DemuxLoop: cannot queue flush for {}: {}", route.queue.kind(), e);
            }
        }
        if let Some(pictures) = &self.pictures {
            pictures.flush();
        }
        if let Some(cues) = &self.cues {
            cues.flush();
        }
        self.clock.reseed(request.target);
        self.health.record_seek(true);
        self.at_eof = false;
        info!("DemuxLoop: seeked to {:.3}s", request.target);
    }

    fn queues_full(&self) -> bool {
        let over = |route: &Option<TrackRoute>, max: usize| {
            route.as_ref().is_some_and(|route| route.queue.size() > max)
        };
        over(&self.routes.audio, self.limits.max_audio_bytes)
            || over(&self.routes.video, self.limits.max_video_bytes)
    }

    fn dispatch(&self, packet: Packet) {
        let Some(route) = self.routes.find(packet.track) else {
            self.health.record_discard();
            return;
        };
        match route.queue.put(packet) {
            Ok(()) => self.health.record_packet(),
            Err(e) => {
                warn!("DemuxLoop: dropping {} packet: {}", route.queue.kind(), e);
                self.health.record_discard();
            }
        }
    }

    fn fail(&self, e: PlayerError) -> Result<()> {
        error!("DemuxLoop: read error, stopping playback: {}", e);
        let _ = self.events.send(PresentEvent::Quit { fatal: true });
        Err(e)
    }
}

impl PipelineStage for DemuxLoop {
    fn run(&mut self) -> Result<()> {
        loop {
            if self.sos.cancelled() {
                return Err(PlayerError::Quit);
            }

            if let Some(request) = self.seek.take() {
                self.execute_seek(request);
            }

            if self.queues_full() {
                self.sos.wait_timeout(BACKPRESSURE_WAIT);
                continue;
            }

            match self.demuxer.read_packet() {
                Ok(Some(packet)) => self.dispatch(packet),
                Ok(None) => {
                    if !self.at_eof {
                        info!("DemuxLoop: end of stream");
                        self.at_eof = true;
                    }
                    self.sos.wait_timeout(EOF_WAIT);
                }
                Err(e) => return self.fail(e),
            }
        }
    }

    fn name(&self) -> &'static str {
        "demux"
    }
}
