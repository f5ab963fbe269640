//! Playback synchronization pipeline
//!
//! Compressed packets flow from the demux loop through one bounded queue per
//! track to the decode workers; decoded pictures and subtitle cues land in
//! small presentation rings, decoded audio is pulled by the output device.
//!
//! # Architecture
//!
//! - Every loop runs on its own OS thread and implements [`PipelineStage`]
//! - Queues and rings are one mutex plus one condition variable each
//! - [`MediaClock`] keeps the audio, video and external clocks and picks the master
//! - One [`SignalOfStop`](crate::utils::SignalOfStop) per session unblocks every wait at shutdown
//! - [`PipelineHealth`] counts what was skipped, corrected or reset

pub mod audio_sync;
pub mod clock;
pub mod coordinator;
pub mod demux;
pub mod health;
pub mod packet_queue;
pub mod picture_queue;
pub mod presentation;
pub mod ring;
pub mod seek;
pub mod stage;
pub mod state;
pub mod subtitle_queue;
pub mod types;
pub mod video_pacer;
pub mod workers;

pub use clock::{MediaClock, SyncMaster};
pub use coordinator::{Session, SessionHandle};
pub use health::{HealthSummary, PipelineHealth};
pub use presentation::ExitReason;
pub use stage::PipelineStage;
pub use state::PipelineState;
pub use types::{MediaKind, Packet, TimeBase};
