//! rendering — glow highlight over detected objects
//!
//! The box region is blurred, blended back over itself with weights that sum
//! to more than one (so bright areas wash out toward white), and stamped
//! with a pale filled circle at its centre. Boxes may lie partly or wholly
//! outside the frame; nothing outside the frame is ever touched.

use image::RgbImage;
use imageproc::filter::separable_filter_equal;

use crate::{detection::Detection, video::RgbFrame};

/// Weight of the blurred region in the blend.
const GLOW_WEIGHT: f32 = 1.5;
/// Weight of the original pixels in the blend.
const BASE_WEIGHT: f32 = 0.5;
/// Highlight colour of the centre dot.
pub const HIGHLIGHT_COLOR: [u8; 3] = [200, 255, 200];

/// Box corners as `(x1, y1, x2, y2)` in frame pixels.
pub type BoxCoords = (i32, i32, i32, i32);

impl From<&Detection> for BoxCoords {
    fn from(d: &Detection) -> Self {
        (d.x1, d.y1, d.x2, d.y2)
    }
}

/// Blur kernel size for a box of `box_width` pixels: a quarter of the width,
/// at least 1, rounded up to odd.
pub fn kernel_size(box_width: i64) -> u32 {
    let k = (box_width / 4).clamp(1, u32::MAX as i64 - 1) as u32;
    if k % 2 == 0 {
        k + 1
    } else {
        k
    }
}

/// Gaussian sigma implied by a kernel size when none is given explicitly.
pub fn auto_sigma(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Normalized 1-D Gaussian taps for an odd `kernel_size`.
///
/// The tap count is capped at `max_taps` (kept odd); sigma still follows
/// the full kernel size.
pub fn gaussian_kernel(kernel_size: u32, max_taps: u32) -> Vec<f32> {
    let sigma = auto_sigma(kernel_size);
    let taps = kernel_size.min(max_taps | 1).max(1);
    let radius = (taps / 2) as f32;
    let mut kernel: Vec<f32> = (0..taps)
        .map(|i| {
            let d = i as f32 - radius;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= sum);
    kernel
}

/// Blur with exactly `kernel_size` taps per axis.
fn blur(roi: &RgbImage, kernel_size: u32) -> RgbImage {
    // Taps beyond twice the region only ever sample clamped edge pixels.
    let max_taps = 2 * roi.width().max(roi.height()) + 1;
    let kernel = gaussian_kernel(kernel_size, max_taps);
    separable_filter_equal(roi, &kernel)
}

/// Clip `(x1, y1, x2, y2)` to the frame. `None` when nothing is left.
fn clip_box(frame: &RgbFrame, (x1, y1, x2, y2): BoxCoords) -> Option<(u32, u32, u32, u32)> {
    let w = frame.width as i32;
    let h = frame.height as i32;
    let cx1 = x1.clamp(0, w);
    let cy1 = y1.clamp(0, h);
    let cx2 = x2.clamp(0, w);
    let cy2 = y2.clamp(0, h);
    if cx1 >= cx2 || cy1 >= cy2 {
        return None;
    }
    Some((cx1 as u32, cy1 as u32, (cx2 - cx1) as u32, (cy2 - cy1) as u32))
}

/// Apply the glow effect for one box, in place.
///
/// Never fails: a box with no area inside the frame leaves the frame
/// untouched, and a malformed frame buffer is ignored.
pub fn apply_glow(frame: &mut RgbFrame, coords: BoxCoords) {
    if !frame.is_well_formed() {
        return;
    }
    let Some((rx, ry, rw, rh)) = clip_box(frame, coords) else {
        return;
    };
    // Geometry in i64: saturated boxes span the full i32 range.
    let (x1, y1, x2, y2) = (
        coords.0 as i64,
        coords.1 as i64,
        coords.2 as i64,
        coords.3 as i64,
    );

    // Copy only the region rows — O(box area), no full-frame clone.
    let src_stride = (frame.width * 3) as usize;
    let roi_stride = (rw * 3) as usize;
    let mut roi = Vec::with_capacity(roi_stride * rh as usize);
    for row in 0..rh as usize {
        let start = (ry as usize + row) * src_stride + rx as usize * 3;
        roi.extend_from_slice(&frame.data[start..start + roi_stride]);
    }
    let Some(roi) = RgbImage::from_raw(rw, rh, roi) else {
        return;
    };

    let k = kernel_size(x2 - x1);
    // A 1-tap kernel is the identity.
    let blurred = if k > 1 { blur(&roi, k) } else { roi };

    // Over-driven blend; float-to-u8 casts saturate at 0 and 255.
    let blurred = blurred.as_raw();
    for row in 0..rh as usize {
        let start = (ry as usize + row) * src_stride + rx as usize * 3;
        let dst = &mut frame.data[start..start + roi_stride];
        let glow = &blurred[row * roi_stride..(row + 1) * roi_stride];
        for (d, &g) in dst.iter_mut().zip(glow) {
            *d = (GLOW_WEIGHT * g as f32 + BASE_WEIGHT * *d as f32).round() as u8;
        }
    }

    let center = ((x1 + x2).div_euclid(2), (y1 + y2).div_euclid(2));
    let radius = (x2 - x1) / 4;
    draw_highlight(frame, center, radius);
}

/// Glow every detection in order.
pub fn apply_glow_all(frame: &mut RgbFrame, detections: &[Detection]) {
    for d in detections {
        apply_glow(frame, d.into());
    }
}

/// Filled disc `dx² + dy² <= r²`, clipped to the frame one row at a time so
/// the cost is bounded by the frame, not the radius.
fn draw_highlight(frame: &mut RgbFrame, (cx, cy): (i64, i64), radius: i64) {
    if radius < 0 {
        return;
    }
    let (w, h) = (frame.width as i64, frame.height as i64);
    let r2 = (radius as i128) * (radius as i128);
    let stride = (frame.width * 3) as usize;

    let y_lo = (cy - radius).max(0);
    let y_hi = (cy + radius).min(h - 1);
    for y in y_lo..=y_hi {
        let dy = (y - cy) as i128;
        let half = ((r2 - dy * dy) as f64).sqrt() as i64;
        let x_lo = (cx - half).max(0);
        let x_hi = (cx + half).min(w - 1);
        if x_lo > x_hi {
            continue;
        }
        let row = &mut frame.data[y as usize * stride..(y as usize + 1) * stride];
        for px in row[x_lo as usize * 3..(x_hi as usize + 1) * 3].chunks_exact_mut(3) {
            px.copy_from_slice(&HIGHLIGHT_COLOR);
        }
    }
}
