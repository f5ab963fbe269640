//! Planar YUV surfaces and on-screen placement

use crate::pipeline::types::VideoFrame;

/// Planar YUV 4:2:0 pixel surface owned by a picture slot.
///
/// Only the presentation thread creates surfaces (see
/// [`Presenter::allocate_surface`](super::Presenter::allocate_surface)); the
/// video worker writes pixels into an already allocated one.
#[derive(Debug, Clone)]
pub struct YuvSurface {
    pub width: u32,
    pub height: u32,
    /// Y, U and V planes, each `strides[i]` bytes per row
    pub planes: [Vec<u8>; 3],
    pub strides: [usize; 3],
    /// Presenter-specific identifier
    pub handle: u64,
}

impl YuvSurface {
    pub fn new(width: u32, height: u32, handle: u64) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        Self {
            width,
            height,
            planes: [vec![0; w * h], vec![128; cw * ch], vec![128; cw * ch]],
            strides: [w, cw, cw],
            handle,
        }
    }

    pub fn chroma_size(&self) -> (usize, usize) {
        (
            (self.width as usize).div_ceil(2),
            (self.height as usize).div_ceil(2),
        )
    }

    /// Copy a packed YUV 4:2:0 frame into the planes, clipping to the
    /// smaller of the two sizes
    pub fn copy_from(&mut self, frame: &VideoFrame) {
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        let (fcw, fch) = (fw.div_ceil(2), fh.div_ceil(2));
        let y_len = fw * fh;
        let c_len = fcw * fch;
        if frame.data.len() < y_len + 2 * c_len {
            return;
        }

        let sources = [
            (&frame.data[..y_len], fw, fh),
            (&frame.data[y_len..y_len + c_len], fcw, fch),
            (&frame.data[y_len + c_len..y_len + 2 * c_len], fcw, fch),
        ];
        let (cw, ch) = self.chroma_size();
        let dims = [
            (self.width as usize, self.height as usize),
            (cw, ch),
            (cw, ch),
        ];

        for (i, (src, src_w, src_h)) in sources.into_iter().enumerate() {
            let stride = self.strides[i];
            let (dst_w, dst_h) = dims[i];
            let cols = src_w.min(dst_w);
            for row in 0..src_h.min(dst_h) {
                let from = row * src_w;
                let to = row * stride;
                self.planes[i][to..to + cols].copy_from_slice(&src[from..from + cols]);
            }
        }
    }
}

/// Destination rectangle inside the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DisplayRect {
    /// Largest rectangle with the picture's aspect ratio that fits the
    /// viewport height (or width, when too wide), centred, with both sides
    /// aligned down to a multiple of 4.
    pub fn fit(
        viewport: (u32, u32),
        picture: (u32, u32),
        sample_aspect_ratio: Option<(u32, u32)>,
    ) -> Self {
        let (vw, vh) = viewport;
        let (pw, ph) = picture;
        if pw == 0 || ph == 0 || vw == 0 || vh == 0 {
            return Self {
                x: 0,
                y: 0,
                width: vw,
                height: vh,
            };
        }

        let mut aspect = match sample_aspect_ratio {
            Some((num, den)) if num > 0 && den > 0 => {
                num as f64 / den as f64 * pw as f64 / ph as f64
            }
            _ => 0.0,
        };
        if aspect <= 0.0 {
            aspect = pw as f64 / ph as f64;
        }

        let mut height = vh;
        let mut width = ((height as f64 * aspect).round() as u32) & !3;
        if width > vw {
            width = vw & !3;
            height = ((width as f64 / aspect).round() as u32) & !3;
        }

        Self {
            x: (vw - width) / 2,
            y: (vh - height.min(vh)) / 2,
            width,
            height: height.min(vh),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> VideoFrame {
        let (w, h) = (width as usize, height as usize);
        let c = w.div_ceil(2) * h.div_ceil(2);
        let mut data = vec![y; w * h];
        data.extend(std::iter::repeat_n(u, c));
        data.extend(std::iter::repeat_n(v, c));
        VideoFrame {
            width,
            height,
            data,
            pts: None,
            repeat_pict: 0,
        }
    }

    #[test]
    fn test_copy_from_packed_frame() {
        let mut surface = YuvSurface::new(4, 2, 1);
        surface.copy_from(&frame(4, 2, 200, 10, 20));
        assert!(surface.planes[0].iter().all(|&b| b == 200));
        assert!(surface.planes[1].iter().all(|&b| b == 10));
        assert!(surface.planes[2].iter().all(|&b| b == 20));
    }

    #[test]
    fn test_copy_from_clips_larger_frame() {
        let mut surface = YuvSurface::new(2, 2, 1);
        surface.copy_from(&frame(6, 4, 50, 60, 70));
        assert_eq!(surface.planes[0], vec![50; 4]);
        assert_eq!(surface.planes[1], vec![60]);
    }

    #[test]
    fn test_fit_letterboxes_wide_picture() {
        // 16:9 into 640x480: width-bound
        let rect = DisplayRect::fit((640, 480), (1280, 720), None);
        assert_eq!(rect.width, 640);
        assert_eq!(rect.height, 360);
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 60);
    }

    #[test]
    fn test_fit_pillarboxes_narrow_picture() {
        // 4:3 into 1280x720: height-bound
        let rect = DisplayRect::fit((1280, 720), (640, 480), None);
        assert_eq!(rect.height, 720);
        assert_eq!(rect.width, 960);
        assert_eq!(rect.x, 160);
        assert_eq!(rect.y, 0);
    }

    #[test]
    fn test_fit_honours_sample_aspect_ratio() {
        // 720x576 anamorphic PAL with 16:15 pixels displays as 4:3
        let rect = DisplayRect::fit((800, 600), (720, 576), Some((16, 15)));
        assert_eq!(rect.height, 600);
        assert_eq!(rect.width, 800);
    }

    #[test]
    fn test_fit_degenerate_picture_fills_viewport() {
        let rect = DisplayRect::fit((320, 240), (0, 0), None);
        assert_eq!((rect.width, rect.height), (320, 240));
    }
}
