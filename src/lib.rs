//! Streaming audio/video playback synchronizer.
//!
//! A demux thread splits a container into per-track packet queues, decode
//! threads turn packets into pictures, PCM and subtitle cues, and the
//! presentation loop shows each picture when the master clock says so.

pub mod config;
pub mod decoder;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;
