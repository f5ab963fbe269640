use crate::display::surface::{DisplayRect, YuvSurface};
use crate::display::Presenter;
use crate::error::Result;
use log::trace;
use std::sync::{Arc, Mutex};

/// Record of one presented picture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentedFrame {
    pub handle: u64,
    pub rect: DisplayRect,
    /// Mean luma of the surface, cheap fingerprint of its content
    pub mean_luma: u8,
}

/// Presenter without a window: keeps a log of what would have been shown
pub struct HeadlessPresenter {
    viewport: (u32, u32),
    next_handle: u64,
    log: Arc<Mutex<Vec<PresentedFrame>>>,
}

impl HeadlessPresenter {
    pub fn new(viewport: (u32, u32)) -> Self {
        Self {
            viewport,
            next_handle: 1,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle on the presentation log
    pub fn log(&self) -> Arc<Mutex<Vec<PresentedFrame>>> {
        Arc::clone(&self.log)
    }
}

impl Presenter for HeadlessPresenter {
    fn allocate_surface(&mut self, width: u32, height: u32) -> Result<YuvSurface> {
        let handle = self.next_handle;
        self.next_handle += 1;
        trace!("HeadlessPresenter: surface #{} {}x{}", handle, width, height);
        Ok(YuvSurface::new(width, height, handle))
    }

    fn present(&mut self, surface: &YuvSurface, rect: DisplayRect) -> Result<()> {
        let luma = &surface.planes[0];
        let mean_luma = if luma.is_empty() {
            0
        } else {
            (luma.iter().map(|&b| b as u64).sum::<u64>() / luma.len() as u64) as u8
        };
        crate::utils::lock(&self.log).push(PresentedFrame {
            handle: surface.handle,
            rect,
            mean_luma,
        });
        Ok(())
    }

    fn viewport(&self) -> (u32, u32) {
        self.viewport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surfaces_get_distinct_handles() {
        let mut presenter = HeadlessPresenter::new((320, 240));
        let a = presenter.allocate_surface(16, 16).unwrap();
        let b = presenter.allocate_surface(16, 16).unwrap();
        assert_ne!(a.handle, b.handle);
    }

    #[test]
    fn test_present_is_logged() {
        let mut presenter = HeadlessPresenter::new((320, 240));
        let mut surface = presenter.allocate_surface(4, 4).unwrap();
        surface.planes[0].fill(90);
        let rect = DisplayRect::fit(presenter.viewport(), (4, 4), None);

        presenter.present(&surface, rect).unwrap();

        let log = presenter.log();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].mean_luma, 90);
        assert_eq!(log[0].handle, surface.handle);
    }
}
