//! letterbox — aspect-preserving resize into the model's fixed input
//!
//! The frame is scaled uniformly until one side touches the target edge,
//! centred on a black canvas, and unpacked into a `[1, 3, H, W]` float
//! tensor in `[0, 1]`. `scale`, `pad_left` and `pad_top` are exactly what
//! [`crate::detection::decode`] needs to map boxes back to the source frame.

use anyhow::{ensure, Context, Result};
use fast_image_resize as fr;
use ndarray::Array4;
use rayon::prelude::*;

use crate::video::RgbFrame;

/// Output of [`letterbox`].
#[derive(Debug, Clone)]
pub struct LetterboxResult {
    /// NCHW float tensor, `[1, 3, target_h, target_w]`.
    pub tensor: Array4<f32>,
    /// Uniform resize factor applied to the source frame.
    pub scale: f32,
    pub pad_left: u32,
    pub pad_top: u32,
}

/// Placement of the resized frame on the target canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub scale: f32,
    pub scaled_w: u32,
    pub scaled_h: u32,
    pub pad_left: u32,
    pub pad_top: u32,
}

/// Compute the letterbox placement of a `src_w × src_h` frame inside a
/// `target_w × target_h` canvas.
pub fn geometry(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> Geometry {
    let scale = (target_w as f32 / src_w as f32).min(target_h as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale).round() as u32).clamp(1, target_w);
    let scaled_h = ((src_h as f32 * scale).round() as u32).clamp(1, target_h);
    Geometry {
        scale,
        scaled_w,
        scaled_h,
        pad_left: (target_w - scaled_w) / 2,
        pad_top: (target_h - scaled_h) / 2,
    }
}

/// Reusable letterbox context to avoid per-frame allocations.
pub struct Letterboxer {
    resizer: fr::Resizer,
    resize_buf: Vec<u8>,
    canvas: Vec<u8>,
}

impl Letterboxer {
    pub fn new() -> Self {
        Self {
            resizer: fr::Resizer::new(),
            resize_buf: Vec::new(),
            canvas: Vec::new(),
        }
    }

    pub fn apply(
        &mut self,
        frame: &RgbFrame,
        target_w: u32,
        target_h: u32,
    ) -> Result<LetterboxResult> {
        ensure!(
            frame.is_well_formed(),
            "frame buffer holds {} bytes, expected {}x{}x3",
            frame.data.len(),
            frame.width,
            frame.height
        );
        ensure!(target_w > 0 && target_h > 0, "target size must be non-zero");

        let g = geometry(frame.width, frame.height, target_w, target_h);

        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
                .context("failed to create fast_image_resize source for letterbox")?;

        let scaled_len = (g.scaled_w * g.scaled_h * 3) as usize;
        if self.resize_buf.len() != scaled_len {
            self.resize_buf.resize(scaled_len, 0);
        }
        let mut dst = fr::images::Image::from_vec_u8(
            g.scaled_w,
            g.scaled_h,
            std::mem::take(&mut self.resize_buf),
            fr::PixelType::U8x3,
        )
        .context("failed to create fast_image_resize destination for letterbox")?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .context("fast_image_resize letterbox scale failed")?;
        self.resize_buf = dst.into_vec();

        // Paste the scaled frame onto a black canvas.
        let canvas_stride = (target_w * 3) as usize;
        let scaled_stride = (g.scaled_w * 3) as usize;
        let canvas_len = canvas_stride * target_h as usize;
        self.canvas.clear();
        self.canvas.resize(canvas_len, 0);
        for row in 0..g.scaled_h as usize {
            let dst_start = (g.pad_top as usize + row) * canvas_stride + g.pad_left as usize * 3;
            let src_start = row * scaled_stride;
            self.canvas[dst_start..dst_start + scaled_stride]
                .copy_from_slice(&self.resize_buf[src_start..src_start + scaled_stride]);
        }

        let tensor = canvas_to_nchw(&self.canvas, target_w, target_h)?;

        Ok(LetterboxResult {
            tensor,
            scale: g.scale,
            pad_left: g.pad_left,
            pad_top: g.pad_top,
        })
    }
}

impl Default for Letterboxer {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot letterbox. Prefer a long-lived [`Letterboxer`] inside loops.
pub fn letterbox(frame: &RgbFrame, target_w: u32, target_h: u32) -> Result<LetterboxResult> {
    Letterboxer::new().apply(frame, target_w, target_h)
}

/// Packed HWC u8 → planar `[1, 3, H, W]` f32 in `[0, 1]`.
fn canvas_to_nchw(raw: &[u8], width: u32, height: u32) -> Result<Array4<f32>> {
    let size = (width * height) as usize;
    let mut tensor_data = vec![0f32; 3 * size];

    let (r_plane, gb_plane) = tensor_data.split_at_mut(size);
    let (g_plane, b_plane) = gb_plane.split_at_mut(size);
    rayon::join(
        || {
            r_plane
                .par_iter_mut()
                .enumerate()
                .for_each(|(idx, out)| *out = raw[idx * 3] as f32 / 255.0)
        },
        || {
            rayon::join(
                || {
                    g_plane
                        .par_iter_mut()
                        .enumerate()
                        .for_each(|(idx, out)| *out = raw[idx * 3 + 1] as f32 / 255.0)
                },
                || {
                    b_plane
                        .par_iter_mut()
                        .enumerate()
                        .for_each(|(idx, out)| *out = raw[idx * 3 + 2] as f32 / 255.0)
                },
            )
        },
    );

    Array4::from_shape_vec((1, 3, height as usize, width as usize), tensor_data)
        .context("failed to shape letterbox tensor")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_frame_into_square_pads_vertically() {
        let g = geometry(100, 50, 640, 640);
        assert!((g.scale - 6.4).abs() < 1e-6);
        assert_eq!((g.scaled_w, g.scaled_h), (640, 320));
        assert_eq!((g.pad_left, g.pad_top), (0, 160));
    }

    #[test]
    fn scaled_frame_fits_and_touches_one_edge() {
        let sizes = [
            (1920, 1080),
            (1080, 1920),
            (640, 640),
            (320, 240),
            (33, 17),
            (4000, 3),
            (3, 4000),
            (641, 639),
        ];
        for &(w, h) in &sizes {
            for &(tw, th) in &[(640, 640), (640, 384), (320, 512)] {
                let g = geometry(w, h, tw, th);
                assert!(g.scaled_w <= tw && g.scaled_h <= th, "{w}x{h} -> {tw}x{th}");
                assert!(g.scaled_w == tw || g.scaled_h == th, "{w}x{h} -> {tw}x{th}");
                // Equal padding on both sides, up to truncation.
                let right = tw - g.scaled_w - g.pad_left;
                let bottom = th - g.scaled_h - g.pad_top;
                assert!(right - g.pad_left <= 1 && bottom - g.pad_top <= 1);
            }
        }
    }

    #[test]
    fn tensor_has_black_bars_and_normalized_content() {
        let frame = RgbFrame::solid(100, 50, [255, 0, 51]);
        let lb = letterbox(&frame, 64, 64).unwrap();
        assert_eq!(lb.tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!((lb.pad_left, lb.pad_top), (0, 16));

        // Padding rows are zero in every channel.
        for c in 0..3 {
            assert_eq!(lb.tensor[[0, c, 0, 10]], 0.0);
            assert_eq!(lb.tensor[[0, c, 63, 10]], 0.0);
        }
        // Centre pixel carries the frame colour in RGB plane order.
        let centre = |c| lb.tensor[[0, c, 32, 32]];
        // Within one 8-bit step of the source colour.
        assert!((centre(0) - 1.0).abs() < 5e-3);
        assert!(centre(1).abs() < 5e-3);
        assert!((centre(2) - 0.2).abs() < 5e-3);
        assert!(lb.tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn upscales_small_frames() {
        let frame = RgbFrame::solid(10, 20, [9, 9, 9]);
        let lb = letterbox(&frame, 64, 64).unwrap();
        assert!((lb.scale - 3.2).abs() < 1e-6);
        assert_eq!((lb.pad_left, lb.pad_top), (16, 0));
    }

    #[test]
    fn reused_context_matches_one_shot() {
        let mut boxer = Letterboxer::new();
        let a = RgbFrame::solid(80, 40, [10, 20, 30]);
        let b = RgbFrame::solid(30, 90, [200, 100, 0]);
        let _ = boxer.apply(&a, 32, 32).unwrap();
        let reused = boxer.apply(&b, 32, 32).unwrap();
        let fresh = letterbox(&b, 32, 32).unwrap();
        assert_eq!(reused.tensor, fresh.tensor);
        assert_eq!((reused.pad_left, reused.pad_top), (fresh.pad_left, fresh.pad_top));
    }

    #[test]
    fn rejects_malformed_buffer() {
        let mut frame = RgbFrame::solid(4, 4, [0, 0, 0]);
        frame.data.truncate(10);
        assert!(letterbox(&frame, 8, 8).is_err());
    }
}
