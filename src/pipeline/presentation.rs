//! Presentation loop
//!
//! Runs on the host thread. Serves surface allocation requests from the
//! video worker and fires the self-re-arming refresh timer: every refresh
//! shows the head picture (with its due subtitle composited) and computes
//! when the next one is due.

use crate::display::Presenter;
use crate::display::surface::DisplayRect;
use crate::pipeline::clock::{MediaClock, SyncMaster};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::picture_queue::{PictureQueue, PresentEvent};
use crate::pipeline::subtitle_queue::SubtitleQueue;
use crate::pipeline::video_pacer::{FrameTimer, PacingAction};
use crate::utils::SignalOfStop;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Delay before the first refresh
const FIRST_REFRESH: Duration = Duration::from_millis(40);
/// Poll interval when the session has no video track
const NO_VIDEO_REFRESH: Duration = Duration::from_millis(100);
/// Retry interval when no picture is ready yet
const EMPTY_RING_REFRESH: Duration = Duration::from_millis(1);

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Why the presentation loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Quit requested by the host or the user
    Quit,
    /// The demuxer hit an unrecoverable read error
    StreamError,
}

pub struct PresentationLoop<P: Presenter> {
    presenter: P,
    events: Receiver<PresentEvent>,
    pictures: Option<Arc<PictureQueue>>,
    cues: Option<Arc<SubtitleQueue>>,
    sample_aspect_ratio: Option<(u32, u32)>,
    clock: Arc<MediaClock>,
    health: Arc<PipelineHealth>,
    sos: SignalOfStop,
    timer: FrameTimer,
    seek_generation: u64,
}

impl<P: Presenter> PresentationLoop<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        presenter: P,
        events: Receiver<PresentEvent>,
        pictures: Option<Arc<PictureQueue>>,
        cues: Option<Arc<SubtitleQueue>>,
        sample_aspect_ratio: Option<(u32, u32)>,
        clock: Arc<MediaClock>,
        health: Arc<PipelineHealth>,
        sos: SignalOfStop,
    ) -> Self {
        let timer = FrameTimer::new(clock.now());
        let seek_generation = clock.seek_generation();
        Self {
            presenter,
            events,
            pictures,
            cues,
            sample_aspect_ratio,
            clock,
            health,
            sos,
            timer,
            seek_generation,
        }
    }

    /// Drive the loop until quit. Blocks the calling thread.
    pub fn run(&mut self) -> ExitReason {
        let mut next_refresh = Instant::now() + FIRST_REFRESH;
        let mut last_health_log = Instant::now();

        loop {
            if self.sos.cancelled() {
                return ExitReason::Quit;
            }

            let timeout = next_refresh.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(timeout) {
                Ok(PresentEvent::Allocate {
                    slot,
                    width,
                    height,
                }) => self.allocate(slot, width, height),
                Ok(PresentEvent::Quit { fatal }) => {
                    return if fatal {
                        ExitReason::StreamError
                    } else {
                        ExitReason::Quit
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    next_refresh = Instant::now() + self.refresh();
                }
                Err(RecvTimeoutError::Disconnected) => return ExitReason::Quit,
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                info!("{}", self.health.summary());
                last_health_log = Instant::now();
            }
        }
    }

    fn allocate(&mut self, slot: usize, width: u32, height: u32) {
        let Some(pictures) = &self.pictures else {
            return;
        };
        let surface = match self.presenter.allocate_surface(width, height) {
            Ok(surface) => Some(surface),
            Err(e) => {
                warn!("Presentation: cannot allocate {}x{} surface: {}", width, height, e);
                None
            }
        };
        pictures.complete_allocation(slot, surface);
    }

    /// Show the head picture if there is one and return the time until the
    /// next refresh
    fn refresh(&mut self) -> Duration {
        let Some(pictures) = self.pictures.clone() else {
            return NO_VIDEO_REFRESH;
        };

        let generation = self.clock.seek_generation();
        if generation != self.seek_generation {
            debug!("Presentation: seek observed, restarting frame timer");
            self.seek_generation = generation;
            self.timer.reset(self.clock.now());
        }

        let mut state = pictures.lock();
        let Some(head) = state.front_mut() else {
            return EMPTY_RING_REFRESH;
        };
        if head.generation < generation {
            // decoded before the last seek, its pts would drag the clock back
            debug!("Presentation: dropping pre-seek picture at {:.3}s", head.pts);
            pictures.advance(state);
            return EMPTY_RING_REFRESH;
        }
        let pts = head.pts;

        self.clock.set_video_current(pts);
        let master = match self.clock.master() {
            SyncMaster::Video => None,
            _ => Some(self.clock.master_clock()),
        };
        let decision = self.timer.compute_delay(pts, master);
        match decision.action {
            PacingAction::CatchUp => self.health.record_catch_up(),
            PacingAction::SlowDown => self.health.record_slowdown(),
            PacingAction::OnTime | PacingAction::Unsynced => {}
        }
        let wait = self.timer.schedule(decision.delay, self.clock.now());

        if let Some(cues) = &self.cues {
            cues.retire_expired(pts);
        }
        if let Some(surface) = head.surface.as_mut() {
            if let Some(cues) = &self.cues {
                cues.composite(surface, pts);
            }
            let rect = DisplayRect::fit(
                self.presenter.viewport(),
                (surface.width, surface.height),
                self.sample_aspect_ratio,
            );
            match self.presenter.present(surface, rect) {
                Ok(()) => self.health.record_presented(),
                Err(e) => warn!("Presentation: present failed at {:.3}s: {}", pts, e),
            }
        }
        pictures.advance(state);

        Duration::from_millis((wait * 1000.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessPresenter;
    use crate::display::headless::PresentedFrame;
    use crate::pipeline::types::{SubtitleCue, SubtitleRect, VideoFrame};
    use crate::utils::lock;
    use std::sync::Mutex;
    use std::sync::mpsc::{self, Sender};
    use std::thread;

    fn frame(luma: u8) -> VideoFrame {
        let mut data = vec![luma; 64];
        data.resize(VideoFrame::packed_len(8, 8), 128);
        VideoFrame {
            width: 8,
            height: 8,
            data,
            pts: None,
            repeat_pict: 0,
        }
    }

    struct Rig {
        sos: SignalOfStop,
        tx: Sender<PresentEvent>,
        pictures: Arc<PictureQueue>,
        cues: Arc<SubtitleQueue>,
        clock: Arc<MediaClock>,
        health: Arc<PipelineHealth>,
        log: Arc<Mutex<Vec<PresentedFrame>>>,
        presentation: Option<PresentationLoop<HeadlessPresenter>>,
    }

    fn rig(master: SyncMaster) -> Rig {
        let sos = SignalOfStop::new();
        let (tx, rx) = mpsc::channel();
        let pictures = Arc::new(PictureQueue::new(2, tx.clone(), sos.clone()));
        let cues = Arc::new(SubtitleQueue::new(1, sos.clone()));
        let clock = Arc::new(MediaClock::new(master));
        let health = Arc::new(PipelineHealth::new());
        let presenter = HeadlessPresenter::new((64, 48));
        let log = presenter.log();
        let presentation = PresentationLoop::new(
            presenter,
            rx,
            Some(Arc::clone(&pictures)),
            Some(Arc::clone(&cues)),
            None,
            Arc::clone(&clock),
            Arc::clone(&health),
            sos.clone(),
        );
        Rig {
            sos,
            tx,
            pictures,
            cues,
            clock,
            health,
            log,
            presentation: Some(presentation),
        }
    }

    fn feed(rig: &Rig, pictures: Vec<(u8, f64)>) -> thread::JoinHandle<()> {
        let generation = rig.clock.seek_generation();
        feed_stamped(rig, pictures.into_iter().map(|(l, p)| (l, p, generation)).collect())
    }

    fn feed_stamped(rig: &Rig, pictures: Vec<(u8, f64, u64)>) -> thread::JoinHandle<()> {
        let queue = Arc::clone(&rig.pictures);
        thread::spawn(move || {
            for (luma, pts, generation) in pictures {
                if queue.queue_picture(&frame(luma), pts, generation).is_err() {
                    return;
                }
            }
        })
    }

    #[test]
    fn test_pictures_presented_in_order_at_frame_rate() {
        let mut rig = rig(SyncMaster::Video);
        let pictures: Vec<_> = (0..10).map(|i| (10 + i as u8, i as f64 * 0.04)).collect();
        let producer = feed(&rig, pictures);
        let mut presentation = rig.presentation.take().unwrap();

        let started = Instant::now();
        let runner = thread::spawn(move || presentation.run());
        while rig.health.pictures_presented() < 10 {
            assert!(started.elapsed() < Duration::from_secs(3));
            thread::sleep(Duration::from_millis(5));
        }
        let elapsed = started.elapsed();
        rig.tx.send(PresentEvent::Quit { fatal: false }).unwrap();
        assert_eq!(runner.join().unwrap(), ExitReason::Quit);
        producer.join().unwrap();

        // ten pictures 40 ms apart, first one after 40 ms
        assert!(elapsed >= Duration::from_millis(350), "{:?}", elapsed);
        let log = lock(&rig.log);
        let lumas: Vec<u8> = log.iter().map(|f| f.mean_luma).collect();
        assert_eq!(lumas, (10..20).collect::<Vec<u8>>());
        // 8x8 picture in a 64x48 viewport: 48x48 centred
        assert_eq!(
            log[0].rect,
            DisplayRect {
                x: 8,
                y: 0,
                width: 48,
                height: 48
            }
        );
        assert!((rig.clock.video_current_pts() - 0.36).abs() < 1e-9);
    }

    #[test]
    fn test_late_video_catches_up_against_external_clock() {
        let mut rig = rig(SyncMaster::External);
        // external clock is already at 5 s, pictures start at 0
        rig.clock.reseed(5.0);
        let pictures: Vec<_> = (0..6).map(|i| (50, 4.0 + i as f64 * 0.04)).collect();
        let producer = feed(&rig, pictures);
        let mut presentation = rig.presentation.take().unwrap();
        let runner = thread::spawn(move || presentation.run());

        let started = Instant::now();
        while rig.health.pictures_presented() < 6 {
            assert!(started.elapsed() < Duration::from_secs(3));
            thread::sleep(Duration::from_millis(5));
        }
        rig.sos.cancel();
        rig.pictures.wake();
        assert_eq!(runner.join().unwrap(), ExitReason::Quit);
        producer.join().unwrap();

        assert!(rig.health.summary().video_catch_ups >= 5);
    }

    #[test]
    fn test_picture_from_before_seek_is_dropped() {
        let mut rig = rig(SyncMaster::Video);
        rig.clock.reseed(20.0);
        // the first picture was decoded before the seek landed
        let producer = feed_stamped(&rig, vec![(30, 1.0, 0), (60, 20.0, 1)]);
        let mut presentation = rig.presentation.take().unwrap();
        let runner = thread::spawn(move || presentation.run());

        let started = Instant::now();
        while rig.health.pictures_presented() < 1 {
            assert!(started.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(5));
        }
        rig.tx.send(PresentEvent::Quit { fatal: false }).unwrap();
        runner.join().unwrap();
        producer.join().unwrap();

        let lumas: Vec<u8> = lock(&rig.log).iter().map(|f| f.mean_luma).collect();
        assert_eq!(lumas, vec![60]);
        assert!(rig.clock.video_current_pts() >= 20.0);
    }

    #[test]
    fn test_due_subtitle_is_composited() {
        let mut rig = rig(SyncMaster::Video);
        rig.cues
            .push(SubtitleCue {
                pts: 0.0,
                start_display_ms: 0,
                end_display_ms: 1000,
                rects: vec![SubtitleRect {
                    x: 0,
                    y: 0,
                    width: 8,
                    height: 8,
                    pixels: vec![0; 64],
                    stride: 8,
                    palette: vec![0xff_eb_80_80],
                }],
            })
            .unwrap();
        let producer = feed(&rig, vec![(16, 0.0)]);
        let mut presentation = rig.presentation.take().unwrap();
        let runner = thread::spawn(move || presentation.run());

        let started = Instant::now();
        while rig.health.pictures_presented() < 1 {
            assert!(started.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(5));
        }
        rig.tx.send(PresentEvent::Quit { fatal: false }).unwrap();
        runner.join().unwrap();
        producer.join().unwrap();

        assert_eq!(lock(&rig.log)[0].mean_luma, 0xeb);
    }

    #[test]
    fn test_fatal_quit_reports_stream_error() {
        let mut rig = rig(SyncMaster::Video);
        let mut presentation = rig.presentation.take().unwrap();
        rig.tx.send(PresentEvent::Quit { fatal: true }).unwrap();
        assert_eq!(presentation.run(), ExitReason::StreamError);
    }

    #[test]
    fn test_no_video_polls_until_quit() {
        let sos = SignalOfStop::new();
        let (tx, rx) = mpsc::channel();
        let mut presentation = PresentationLoop::new(
            HeadlessPresenter::new((64, 48)),
            rx,
            None,
            None,
            None,
            Arc::new(MediaClock::new(SyncMaster::External)),
            Arc::new(PipelineHealth::new()),
            sos.clone(),
        );
        let runner = thread::spawn(move || presentation.run());
        thread::sleep(Duration::from_millis(250));
        sos.cancel();
        let _ = tx.send(PresentEvent::Quit { fatal: false });
        assert_eq!(runner.join().unwrap(), ExitReason::Quit);
    }
}
