//! Presentation-side components: surfaces, compositing and output devices

pub mod audio_buffer;
pub mod audio_output;
pub mod headless;
pub mod overlay;
pub mod surface;

pub use audio_buffer::AudioChunk;
pub use audio_output::{AudioCallback, AudioOutput, NullAudioOutput};
pub use headless::HeadlessPresenter;
pub use surface::{DisplayRect, YuvSurface};

use crate::error::Result;

/// Display surface collaborator.
///
/// Lives on the presentation thread: surfaces are only ever allocated there,
/// in answer to an allocation request from the video worker.
pub trait Presenter {
    fn allocate_surface(&mut self, width: u32, height: u32) -> Result<YuvSurface>;

    fn present(&mut self, surface: &YuvSurface, rect: DisplayRect) -> Result<()>;

    /// Size of the output area in pixels
    fn viewport(&self) -> (u32, u32);
}
