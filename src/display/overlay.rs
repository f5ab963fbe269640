//! Subtitle compositing onto YUV 4:2:0 pictures
//!
//! Palette entries are already YUVA (`0xAAYYUUVV`). Luma is blended per pixel;
//! each chroma sample covers a 2x2 luma block and is blended with the mean
//! colour of the covered pixels at a quarter of their summed alpha, so a block
//! only partly covered by the subtitle is only partly tinted.

use crate::display::surface::YuvSurface;
use crate::pipeline::types::SubtitleRect;

#[inline]
fn alpha_blend(alpha: u32, old: u32, new: u32) -> u8 {
    ((old * (255 - alpha) + new * alpha) / 255) as u8
}

#[inline]
fn unpack(color: u32) -> (u32, u32, u32, u32) {
    (
        (color >> 16) & 0xff,
        (color >> 8) & 0xff,
        color & 0xff,
        (color >> 24) & 0xff,
    )
}

/// Blend one palette-indexed rectangle onto `surface`, clipped to its bounds
pub fn blend_subrect(surface: &mut YuvSurface, rect: &SubtitleRect) {
    let (sw, sh) = (surface.width as i64, surface.height as i64);
    let x0 = (rect.x as i64).clamp(0, sw);
    let y0 = (rect.y as i64).clamp(0, sh);
    let x1 = (rect.x as i64 + rect.width as i64).clamp(0, sw);
    let y1 = (rect.y as i64 + rect.height as i64).clamp(0, sh);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let (cw, ch) = surface.chroma_size();
    // sums of u, v and alpha per chroma sample, plus covered pixel count
    let cx0 = (x0 / 2) as usize;
    let cy0 = (y0 / 2) as usize;
    let cx1 = (((x1 + 1) / 2) as usize).min(cw);
    let cy1 = (((y1 + 1) / 2) as usize).min(ch);
    let acc_w = cx1 - cx0;
    let mut acc = vec![(0u32, 0u32, 0u32, 0u32); acc_w * (cy1 - cy0)];

    let y_stride = surface.strides[0];
    for y in y0..y1 {
        let src_row = (y - rect.y as i64) as usize * rect.stride;
        for x in x0..x1 {
            let src = src_row + (x - rect.x as i64) as usize;
            let Some(&index) = rect.pixels.get(src) else {
                continue;
            };
            let color = rect.palette.get(index as usize).copied().unwrap_or(0);
            let (luma, u, v, alpha) = unpack(color);

            let dst = y as usize * y_stride + x as usize;
            let old = surface.planes[0][dst] as u32;
            surface.planes[0][dst] = alpha_blend(alpha, old, luma);

            let cell = (y as usize / 2 - cy0) * acc_w + (x as usize / 2 - cx0);
            let entry = &mut acc[cell];
            entry.0 += u;
            entry.1 += v;
            entry.2 += alpha;
            entry.3 += 1;
        }
    }

    for cy in cy0..cy1 {
        for cx in cx0..cx1 {
            let (u_sum, v_sum, a_sum, count) = acc[(cy - cy0) * acc_w + (cx - cx0)];
            if count == 0 || a_sum == 0 {
                continue;
            }
            let alpha = a_sum / 4;
            let u_dst = cy * surface.strides[1] + cx;
            let v_dst = cy * surface.strides[2] + cx;
            let old_u = surface.planes[1][u_dst] as u32;
            let old_v = surface.planes[2][v_dst] as u32;
            surface.planes[1][u_dst] = alpha_blend(alpha, old_u, u_sum / count);
            surface.planes[2][v_dst] = alpha_blend(alpha, old_v, v_sum / count);
        }
    }
}
