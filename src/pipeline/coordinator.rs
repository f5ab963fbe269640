//! Playback session
//!
//! Opens the tracks of a demuxer, wires queues, clocks and rings together,
//! spawns the pipeline threads and hands the presentation loop to the host
//! thread. Tear-down is explicit: raise quit, wake every waiter, join.

use crate::config::PlayerConfig;
use crate::decoder::{DecoderFactory, Demuxer, SubtitleDecode, VideoDecode};
use crate::display::{AudioOutput, Presenter};
use crate::error::{PlayerError, Result};
use crate::pipeline::audio_sync::AudioEngine;
use crate::pipeline::clock::{MediaClock, SyncMaster};
use crate::pipeline::demux::{DemuxLoop, Routes, TrackRoute};
use crate::pipeline::health::{HealthSummary, PipelineHealth};
use crate::pipeline::packet_queue::PacketQueue;
use crate::pipeline::picture_queue::{PictureQueue, PresentEvent};
use crate::pipeline::presentation::{ExitReason, PresentationLoop};
use crate::pipeline::seek::{SeekController, SeekDirection, SeekRequest};
use crate::pipeline::stage::spawn_stage;
use crate::pipeline::state::PipelineState;
use crate::pipeline::subtitle_queue::SubtitleQueue;
use crate::pipeline::types::{AudioParams, MediaKind, SampleFormat, TrackInfo, TrackParams};
use crate::pipeline::workers::{SubtitleWorker, VideoWorker};
use crate::utils::{SignalOfStop, lock};
use log::{debug, info, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// State shared between the session and its handles
struct SessionShared {
    sos: SignalOfStop,
    clock: Arc<MediaClock>,
    seek: Arc<SeekController>,
    health: Arc<PipelineHealth>,
    events: Sender<PresentEvent>,
    queues: Vec<Arc<PacketQueue>>,
    pictures: Option<Arc<PictureQueue>>,
    cues: Option<Arc<SubtitleQueue>>,
    state: Mutex<PipelineState>,
}

impl SessionShared {
    fn transition(&self, target: PipelineState) {
        let mut state = lock(&self.state);
        let from = *state;
        if state.advance(target) {
            info!("Session: {} -> {}", from, target);
        } else if from != target {
            warn!("Session: ignoring transition {} -> {}", from, target);
        }
    }

    /// Wake every blocked thread so it observes the quit flag
    fn wake_all(&self) {
        for queue in &self.queues {
            queue.wake();
        }
        if let Some(pictures) = &self.pictures {
            pictures.wake();
        }
        if let Some(cues) = &self.cues {
            cues.wake();
        }
    }
}

/// Cloneable control surface for input threads and signal handlers
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Seek to an absolute position in seconds. Dropped while another
    /// seek is pending.
    pub fn request_seek(&self, target: f64) -> bool {
        let direction = if target < self.master_clock() {
            SeekDirection::Backward
        } else {
            SeekDirection::Forward
        };
        self.shared.seek.request(SeekRequest {
            target: target.max(0.0),
            direction,
        })
    }

    /// Seek `increment` seconds from the current master position
    pub fn request_seek_relative(&self, increment: f64) -> bool {
        self.shared
            .seek
            .request(SeekRequest::relative(self.master_clock(), increment))
    }

    pub fn master_clock(&self) -> f64 {
        self.shared.clock.master_clock()
    }

    pub fn sync_master(&self) -> SyncMaster {
        self.shared.clock.master()
    }

    /// Ask the presentation loop to return; threads are joined by
    /// [`Session::shutdown`]
    pub fn request_quit(&self) {
        let _ = self.shared.events.send(PresentEvent::Quit { fatal: false });
        self.shared.sos.cancel();
        self.shared.wake_all();
    }

    pub fn health(&self) -> HealthSummary {
        self.shared.health.summary()
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.shared.state)
    }
}

/// Tracks chosen for playback, first of each kind
struct Selection {
    video: Option<TrackInfo>,
    audio: Option<TrackInfo>,
    subtitle: Option<TrackInfo>,
}

impl Selection {
    fn from_tracks(tracks: &[TrackInfo]) -> Self {
        let first = |kind| tracks.iter().find(|track| track.kind == kind).cloned();
        Self {
            video: first(MediaKind::Video),
            audio: first(MediaKind::Audio),
            subtitle: first(MediaKind::Subtitle),
        }
    }
}

/// Configured master, or the external clock when its track is missing
fn effective_master(configured: SyncMaster, has_video: bool, has_audio: bool) -> SyncMaster {
    match configured {
        SyncMaster::Video if !has_video => SyncMaster::External,
        SyncMaster::Audio if !has_audio => SyncMaster::External,
        master => master,
    }
}

fn open_or_warn<T>(kind: MediaKind, track: &TrackInfo, opened: Result<T>) -> Option<T> {
    match opened {
        Ok(decoder) => Some(decoder),
        Err(e) => {
            warn!("Session: {} track {} unusable: {}", kind, track.index, e);
            None
        }
    }
}

pub struct Session<P: Presenter> {
    shared: Arc<SessionShared>,
    presentation: PresentationLoop<P>,
    threads: Vec<JoinHandle<Result<()>>>,
    audio_output: Option<Box<dyn AudioOutput>>,
    exit: Option<ExitReason>,
}

impl<P: Presenter> Session<P> {
    /// Open every playable track and start the pipeline threads.
    ///
    /// Fails with [`PlayerError::NoPlayableTracks`] when neither an audio nor
    /// a video track can be opened.
    pub fn open<F>(
        demuxer: Box<dyn Demuxer>,
        factory: &F,
        presenter: P,
        audio_output: Option<Box<dyn AudioOutput>>,
        config: &PlayerConfig,
    ) -> Result<Self>
    where
        F: DecoderFactory,
    {
        let selection = Selection::from_tracks(demuxer.tracks());

        let video: Option<(TrackInfo, Box<dyn VideoDecode>)> =
            selection.video.as_ref().and_then(|track| {
                open_or_warn(MediaKind::Video, track, factory.video_decoder(track))
                    .map(|decoder| (track.clone(), decoder))
            });

        let mut audio_output = audio_output.filter(|_| config.audio_enabled);
        let audio = match (&selection.audio, audio_output.as_mut()) {
            (Some(track), Some(output)) => {
                open_audio(factory, track, output.as_mut(), config.audio_buffer_frames)
            }
            _ => None,
        };
        if audio.is_none() {
            audio_output = None;
        }

        let subtitle: Option<(TrackInfo, Box<dyn SubtitleDecode>)> =
            selection.subtitle.as_ref().and_then(|track| {
                open_or_warn(MediaKind::Subtitle, track, factory.subtitle_decoder(track))
                    .map(|decoder| (track.clone(), decoder))
            });

        if video.is_none() && audio.is_none() {
            return Err(PlayerError::NoPlayableTracks);
        }

        let master = effective_master(config.sync_master, video.is_some(), audio.is_some());
        if master != config.sync_master {
            warn!(
                "Session: no {} track, falling back to the {} clock",
                config.sync_master, master
            );
        }

        let sos = SignalOfStop::new();
        let clock = Arc::new(MediaClock::new(master));
        let health = Arc::new(PipelineHealth::new());
        let seek = Arc::new(SeekController::new());
        let (events, events_rx) = mpsc::channel();

        let route = |track: &TrackInfo| TrackRoute {
            track: track.index,
            time_base: track.time_base,
            queue: Arc::new(PacketQueue::new(track.kind, sos.clone())),
        };
        let routes = Routes {
            video: video.as_ref().map(|(track, _)| route(track)),
            audio: audio.as_ref().map(|opened| route(&opened.track)),
            subtitle: subtitle.as_ref().map(|(track, _)| route(track)),
        };
        let queues: Vec<Arc<PacketQueue>> = [&routes.video, &routes.audio, &routes.subtitle]
            .into_iter()
            .flatten()
            .map(|route| Arc::clone(&route.queue))
            .collect();

        let pictures = video.as_ref().map(|_| {
            Arc::new(PictureQueue::new(
                config.picture_queue_size,
                events.clone(),
                sos.clone(),
            ))
        });
        let cues = subtitle
            .as_ref()
            .map(|_| Arc::new(SubtitleQueue::new(config.subtitle_queue_size, sos.clone())));

        let shared = Arc::new(SessionShared {
            sos: sos.clone(),
            clock: Arc::clone(&clock),
            seek: Arc::clone(&seek),
            health: Arc::clone(&health),
            events: events.clone(),
            queues,
            pictures: pictures.clone(),
            cues: cues.clone(),
            state: Mutex::new(PipelineState::Idle),
        });
        shared.transition(PipelineState::Initializing);

        let sample_aspect_ratio = video.as_ref().and_then(|(track, _)| match track.params {
            TrackParams::Video {
                sample_aspect_ratio,
                ..
            } => sample_aspect_ratio,
            _ => None,
        });
        let presentation = PresentationLoop::new(
            presenter,
            events_rx,
            pictures.clone(),
            cues.clone(),
            sample_aspect_ratio,
            Arc::clone(&clock),
            Arc::clone(&health),
            sos.clone(),
        );

        let mut session = Self {
            shared,
            presentation,
            threads: Vec::new(),
            audio_output,
            exit: None,
        };

        let video_queue = routes.video.as_ref().map(|route| Arc::clone(&route.queue));
        let audio_queue = routes.audio.as_ref().map(|route| Arc::clone(&route.queue));
        let subtitle_queue = routes.subtitle.as_ref().map(|route| Arc::clone(&route.queue));

        let demux = DemuxLoop::new(
            demuxer,
            routes,
            pictures.clone(),
            cues.clone(),
            seek,
            Arc::clone(&clock),
            Arc::clone(&health),
            events,
            config.queue_limits(),
            sos,
        );
        session.spawn(demux)?;

        if let (Some((track, decoder)), Some(queue), Some(pictures)) =
            (video, video_queue, pictures)
        {
            let frame_duration = match track.params {
                TrackParams::Video { frame_duration, .. } => frame_duration,
                _ => None,
            };
            session.spawn(VideoWorker::new(
                decoder,
                queue,
                pictures,
                Arc::clone(&clock),
                Arc::clone(&health),
                frame_duration,
            ))?;
        }

        if let (Some((_, decoder)), Some(queue), Some(cues)) = (subtitle, subtitle_queue, cues) {
            session.spawn(SubtitleWorker::new(decoder, queue, cues, Arc::clone(&health)))?;
        }

        if let (Some(opened), Some(queue)) = (audio, audio_queue) {
            let mut engine = AudioEngine::new(
                opened.decoder,
                factory.resampler(),
                opened.params,
                config.audio_buffer_frames,
                &queue,
                &clock,
                Arc::clone(&health),
            );
            if let Some(output) = session.audio_output.as_mut() {
                if let Err(e) = output.start(Box::new(move |out: &mut [u8]| engine.fill(out))) {
                    session.abort();
                    return Err(e);
                }
            }
        }

        session.shared.transition(PipelineState::Running {
            started_at: Instant::now(),
        });
        info!(
            "Session: playing with {} master, {} threads",
            master,
            session.threads.len()
        );
        Ok(session)
    }

    fn spawn<S>(&mut self, stage: S) -> Result<()>
    where
        S: crate::pipeline::stage::PipelineStage + 'static,
    {
        match spawn_stage(stage) {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e.into())
            }
        }
    }

    /// Stop whatever is still running, ignoring thread results
    fn abort(&mut self) {
        if self.threads.is_empty() && self.audio_output.is_none() {
            return;
        }
        self.shared.transition(PipelineState::Stopping);
        self.shared.sos.cancel();
        self.shared.wake_all();
        if let Some(mut output) = self.audio_output.take() {
            output.stop();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.shared.transition(PipelineState::Stopped);
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn request_seek(&self, target: f64) -> bool {
        self.handle().request_seek(target)
    }

    pub fn request_seek_relative(&self, increment: f64) -> bool {
        self.handle().request_seek_relative(increment)
    }

    pub fn master_clock(&self) -> f64 {
        self.shared.clock.master_clock()
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.shared.health)
    }

    /// Run the presentation loop on the calling thread until quit
    pub fn run(&mut self) -> ExitReason {
        let reason = self.presentation.run();
        info!("Session: presentation loop finished ({:?})", reason);
        self.exit = Some(reason);
        reason
    }

    /// Raise quit, wake and join every thread and stop the audio device.
    ///
    /// Returns the first error a pipeline thread failed with. A demux failure
    /// that already ended [`Session::run`] with [`ExitReason::StreamError`]
    /// is not returned again.
    pub fn shutdown(mut self) -> Result<()> {
        let stream_failed = self.exit == Some(ExitReason::StreamError);
        self.shared.transition(PipelineState::Stopping);
        self.shared.sos.cancel();
        self.shared.wake_all();

        if let Some(mut output) = self.audio_output.take() {
            output.stop();
        }

        let mut first_error = None;
        for handle in self.threads.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(PlayerError::Demux(reason))) if stream_failed => {
                    debug!("Session: demux thread ended with {}", reason);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => warn!("Session: a pipeline thread panicked"),
            }
        }

        self.shared.transition(PipelineState::Stopped);
        info!("{}", self.shared.health.summary());
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<P: Presenter> Drop for Session<P> {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Audio track with its decoder and the device format it plays at
struct OpenedAudio<D> {
    track: TrackInfo,
    decoder: D,
    params: AudioParams,
}

fn open_audio<F: DecoderFactory>(
    factory: &F,
    track: &TrackInfo,
    output: &mut dyn AudioOutput,
    buffer_frames: u32,
) -> Option<OpenedAudio<F::Audio>> {
    let TrackParams::Audio {
        sample_rate,
        channels,
    } = track.params
    else {
        return None;
    };
    let decoder = open_or_warn(MediaKind::Audio, track, factory.audio_decoder(track))?;
    let wanted = AudioParams {
        sample_rate,
        channels,
        format: SampleFormat::S16,
    };
    let params = open_or_warn(MediaKind::Audio, track, output.open(&wanted, buffer_frames))?;
    Some(OpenedAudio {
        track: track.clone(),
        decoder,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::synthetic::{SyntheticDemuxer, SyntheticFactory, SyntheticSpec};
    use crate::display::{HeadlessPresenter, NullAudioOutput};
    use std::thread;
    use std::time::Duration;

    fn open(
        spec: SyntheticSpec,
        config: &PlayerConfig,
    ) -> Result<Session<HeadlessPresenter>> {
        let factory = SyntheticFactory::new(&spec);
        Session::open(
            Box::new(SyntheticDemuxer::new(spec)),
            &factory,
            HeadlessPresenter::new((320, 240)),
            Some(Box::new(NullAudioOutput::new())),
            config,
        )
    }

    fn run_for(session: &mut Session<HeadlessPresenter>, duration: Duration) -> ExitReason {
        let handle = session.handle();
        let stopper = thread::spawn(move || {
            thread::sleep(duration);
            handle.request_quit();
        });
        let reason = session.run();
        stopper.join().unwrap();
        reason
    }

    #[test]
    fn test_effective_master_fallback() {
        assert_eq!(effective_master(SyncMaster::Video, true, false), SyncMaster::Video);
        assert_eq!(effective_master(SyncMaster::Video, false, true), SyncMaster::External);
        assert_eq!(effective_master(SyncMaster::Audio, true, false), SyncMaster::External);
        assert_eq!(effective_master(SyncMaster::External, false, true), SyncMaster::External);
    }

    #[test]
    fn test_plays_synthetic_stream_video_master() {
        let config = PlayerConfig::default();
        let mut session = open(SyntheticSpec::default(), &config).unwrap();
        assert!(session.handle().state().is_running());

        let reason = run_for(&mut session, Duration::from_millis(600));
        assert_eq!(reason, ExitReason::Quit);

        let health = session.health().summary();
        assert!(health.pictures_presented >= 8, "{}", health);
        assert!(health.packets_queued > 0);
        let position = session.master_clock();
        assert!((0.2..2.0).contains(&position), "master at {}", position);
        session.shutdown().unwrap();
    }

    #[test]
    fn test_audio_master_keeps_video_in_step() {
        let config = PlayerConfig {
            sync_master: SyncMaster::Audio,
            ..PlayerConfig::default()
        };
        let mut session = open(SyntheticSpec::default(), &config).unwrap();
        assert_eq!(session.handle().sync_master(), SyncMaster::Audio);

        run_for(&mut session, Duration::from_millis(800));
        let health = session.health().summary();
        assert!(health.pictures_presented >= 8, "{}", health);
        assert!(session.master_clock() > 0.3);
        session.shutdown().unwrap();
    }

    #[test]
    fn test_no_audio_falls_back_to_external_clock() {
        let config = PlayerConfig {
            sync_master: SyncMaster::Audio,
            audio_enabled: false,
            ..PlayerConfig::default()
        };
        let session = open(SyntheticSpec::default(), &config).unwrap();
        assert_eq!(session.handle().sync_master(), SyncMaster::External);
        session.shutdown().unwrap();
    }

    #[test]
    fn test_relative_seek_moves_master_clock() {
        let config = PlayerConfig {
            sync_master: SyncMaster::External,
            ..PlayerConfig::default()
        };
        let mut session = open(
            SyntheticSpec {
                duration_secs: 60.0,
                ..Default::default()
            },
            &config,
        )
        .unwrap();
        assert!(session.request_seek_relative(10.0));

        run_for(&mut session, Duration::from_millis(400));
        let health = session.health().summary();
        assert_eq!(health.seeks_completed, 1, "{}", health);
        assert!(session.master_clock() >= 10.0);
        // each open track saw exactly one flush sentinel
        assert!(health.decoder_resets >= 2, "{}", health);
        session.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_is_prompt_and_final() {
        let config = PlayerConfig::default();
        let session = open(SyntheticSpec::default(), &config).unwrap();
        let handle = session.handle();
        let started = Instant::now();
        session.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(handle.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_read_error_ends_run_and_shuts_down_cleanly() {
        struct Truncated(Vec<TrackInfo>);
        impl Demuxer for Truncated {
            fn tracks(&self) -> &[TrackInfo] {
                &self.0
            }
            fn read_packet(&mut self) -> Result<Option<crate::pipeline::types::Packet>> {
                Err(PlayerError::Demux("truncated file".into()))
            }
            fn seek(&mut self, _: usize, _: i64, _: SeekDirection) -> Result<()> {
                Ok(())
            }
        }
        let spec = SyntheticSpec::default();
        let tracks = SyntheticDemuxer::new(spec.clone()).tracks().to_vec();
        let mut session = Session::open(
            Box::new(Truncated(tracks)),
            &SyntheticFactory::new(&spec),
            HeadlessPresenter::new((320, 240)),
            Some(Box::new(NullAudioOutput::new())),
            &PlayerConfig::default(),
        )
        .unwrap();

        assert_eq!(session.run(), ExitReason::StreamError);
        let handle = session.handle();
        assert!(session.shutdown().is_ok());
        assert_eq!(handle.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_audio_only_stream_without_device_is_unplayable() {
        struct AudioOnly(Vec<TrackInfo>);
        impl Demuxer for AudioOnly {
            fn tracks(&self) -> &[TrackInfo] {
                &self.0
            }
            fn read_packet(&mut self) -> Result<Option<crate::pipeline::types::Packet>> {
                Ok(None)
            }
            fn seek(&mut self, _: usize, _: i64, _: SeekDirection) -> Result<()> {
                Ok(())
            }
        }
        let spec = SyntheticSpec::default();
        let tracks = SyntheticDemuxer::new(spec.clone())
            .tracks()
            .iter()
            .filter(|track| track.kind == MediaKind::Audio)
            .cloned()
            .collect();
        let result = Session::open(
            Box::new(AudioOnly(tracks)),
            &SyntheticFactory::new(&spec),
            HeadlessPresenter::new((320, 240)),
            None,
            &PlayerConfig::default(),
        );
        assert!(matches!(result, Err(PlayerError::NoPlayableTracks)));
    }
}
