//! Health counters for a playback session

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a playback session
///
/// Every swallowed error and every synchronization decision bumps one of
/// these counters, so a periodic summary tells whether the session is
/// keeping up. All fields use relaxed atomics.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    /// Packets routed into a track queue
    pub packets_queued: AtomicU64,

    /// Packets dropped (unopened track or queue allocation failure)
    pub packets_discarded: AtomicU64,

    /// Packets or frames the decoder or resampler rejected
    pub decode_failures: AtomicU64,

    /// Decoder resets triggered by a flush sentinel
    pub decoder_resets: AtomicU64,

    /// Pictures handed to the presenter
    pub pictures_presented: AtomicU64,

    /// Pictures shown immediately because video lagged the master
    pub video_catch_ups: AtomicU64,

    /// Pictures held twice as long because video led the master
    pub video_slowdowns: AtomicU64,

    /// Audio chunks stretched or shortened
    pub audio_corrections: AtomicU64,

    /// Drift beyond the no-sync threshold that reset the averaging state
    pub sync_resets: AtomicU64,

    /// Audio callbacks that found no decoded data and played silence
    pub audio_underruns: AtomicU64,

    pub seeks_completed: AtomicU64,
    pub seeks_failed: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self) {
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.packets_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decoder_reset(&self) {
        self.decoder_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_presented(&self) {
        self.pictures_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_catch_up(&self) {
        self.video_catch_ups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slowdown(&self) {
        self.video_slowdowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_correction(&self) {
        self.audio_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_reset(&self) {
        self.sync_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.audio_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_seek(&self, success: bool) {
        if success {
            self.seeks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.seeks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pictures_presented(&self) -> u64 {
        self.pictures_presented.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn decoder_resets(&self) -> u64 {
        self.decoder_resets.load(Ordering::Relaxed)
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HealthSummary {
            packets_queued: load(&self.packets_queued),
            packets_discarded: load(&self.packets_discarded),
            decode_failures: load(&self.decode_failures),
            decoder_resets: load(&self.decoder_resets),
            pictures_presented: load(&self.pictures_presented),
            video_catch_ups: load(&self.video_catch_ups),
            video_slowdowns: load(&self.video_slowdowns),
            audio_corrections: load(&self.audio_corrections),
            sync_resets: load(&self.sync_resets),
            audio_underruns: load(&self.audio_underruns),
            seeks_completed: load(&self.seeks_completed),
            seeks_failed: load(&self.seeks_failed),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub packets_queued: u64,
    pub packets_discarded: u64,
    pub decode_failures: u64,
    pub decoder_resets: u64,
    pub pictures_presented: u64,
    pub video_catch_ups: u64,
    pub video_slowdowns: u64,
    pub audio_corrections: u64,
    pub sync_resets: u64,
    pub audio_underruns: u64,
    pub seeks_completed: u64,
    pub seeks_failed: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} packets ({} discarded), {} pictures ({} caught up, {} slowed), \
             {} audio corrections, {} sync resets, {} underruns, {} decode failures, \
             {} decoder resets, seeks {} ok / {} failed",
            self.packets_queued,
            self.packets_discarded,
            self.pictures_presented,
            self.video_catch_ups,
            self.video_slowdowns,
            self.audio_corrections,
            self.sync_resets,
            self.audio_underruns,
            self.decode_failures,
            self.decoder_resets,
            self.seeks_completed,
            self.seeks_failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_counters() {
        let health = PipelineHealth::new();

        health.record_packet();
        health.record_packet();
        health.record_discard();
        health.record_presented();
        health.record_seek(true);
        health.record_seek(false);
        health.record_seek(false);

        let summary = health.summary();
        assert_eq!(summary.packets_queued, 2);
        assert_eq!(summary.packets_discarded, 1);
        assert_eq!(summary.pictures_presented, 1);
        assert_eq!(summary.seeks_completed, 1);
        assert_eq!(summary.seeks_failed, 2);
        assert_eq!(summary.decode_failures, 0);
    }

    #[test]
    fn test_summary_display() {
        let health = PipelineHealth::new();
        health.record_catch_up();
        health.record_underrun();

        let text = health.summary().to_string();
        assert!(text.starts_with("Health: 0 packets"));
        assert!(text.contains("1 caught up"));
        assert!(text.contains("1 underruns"));
    }
}
