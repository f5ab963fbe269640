//! Pipeline stage trait
//!
//! Every long-running loop of a session (demux, video decode, subtitle
//! decode) is a stage with its own OS thread. A stage returns when the quit
//! flag is raised or when it fails for good.

use crate::error::{PlayerError, Result};
use log::{error, info};
use std::io;
use std::thread::{self, JoinHandle};

/// A loop that owns its thread until shutdown
pub trait PipelineStage: Send {
    /// Run until the session quits; `Err(Quit)` is a clean exit too
    fn run(&mut self) -> Result<()>;

    /// Stage name used for the thread and in log lines
    fn name(&self) -> &'static str;
}

/// Spawn `stage` on a named thread, logging how it ended
pub fn spawn_stage<S>(mut stage: S) -> io::Result<JoinHandle<Result<()>>>
where
    S: PipelineStage + 'static,
{
    let name = stage.name();
    thread::Builder::new().name(name.to_string()).spawn(move || {
        info!("{}: started", name);
        let result = match stage.run() {
            Err(PlayerError::Quit) => Ok(()),
            other => other,
        };
        match &result {
            Ok(()) => info!("{}: stopped", name),
            Err(e) => error!("{}: failed: {}", name, e),
        }
        result
    })
}
