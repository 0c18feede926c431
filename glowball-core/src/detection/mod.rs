//! detection — YOLOv8 inference boundary and output decoding
//!
//! The model is an opaque [`Inference`] capability: a `[1, 3, H, W]` tensor
//! goes in, a `[1, 84, N]` tensor comes out. [`OnnxSession`] is the ONNX
//! Runtime implementation; tests substitute stubs.
//!
//! [`decode`] turns the raw output into source-frame boxes for one target
//! class. It does not merge overlapping boxes; [`suppress_overlaps`] is an
//! explicit, opt-in step for callers that want that.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, ensure, Context, Result};
use ndarray::{Array3, Array4, ArrayView3};
use ort::session::Session;
use ort::value::Tensor;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::Error;

/// Leading box parameters per candidate: cx, cy, w, h.
const BOX_PARAMS: usize = 4;

// ── Public types ─────────────────────────────────────────────────────────────

/// Axis-aligned box in pixel coordinates of the source frame.
///
/// Coordinates are not clamped; they may fall outside the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    /// Widened so boxes spanning the whole `i32` range cannot overflow.
    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }
    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }
    /// IoU (intersection over union) with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.x1.max(other.x1) as i64;
        let iy1 = self.y1.max(other.y1) as i64;
        let ix2 = self.x2.min(other.x2) as i64;
        let iy2 = self.y2.min(other.y2) as i64;
        let inter = (ix2 - ix1).max(0) as f64 * (iy2 - iy1).max(0) as f64;
        if inter == 0.0 {
            return 0.0;
        }
        let area = |d: &Detection| d.width().max(0) as f64 * d.height().max(0) as f64;
        (inter / (area(self) + area(other) - inter)) as f32
    }
}

/// Opaque model capability: letterboxed tensor in, raw detections out.
///
/// Implementations must be safe to share across threads; `infer` takes
/// `&self` and exposes no mutable state.
pub trait Inference: Send + Sync {
    fn infer(&self, input: &Array4<f32>) -> Result<Array3<f32>>;

    /// Input size the model was built for, as `(width, height)`, when known.
    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }
}

// ── ONNX Runtime session ─────────────────────────────────────────────────────

/// Wraps a YOLOv8 ONNX session.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_name: String,
    input_width: u32,
    input_height: u32,
    model_path: PathBuf,
}

impl OnnxSession {
    /// Load the model named by `config.model_path`.
    ///
    /// A missing file is reported as [`Error::ModelNotFound`] before ONNX
    /// Runtime is touched. If the model declares a static input size it
    /// overrides `config.input_width`/`input_height`.
    pub fn load(config: &PipelineConfig) -> Result<Self, Error> {
        let model_path = config.model_path.clone();
        if !model_path.is_file() {
            return Err(Error::ModelNotFound(model_path));
        }

        let session = build_ort_session(&model_path, config.intra_threads).map_err(|source| {
            Error::ModelLoad {
                path: model_path.clone(),
                source,
            }
        })?;

        let input = session.inputs.first().ok_or_else(|| Error::ModelLoad {
            path: model_path.clone(),
            source: anyhow!("model declares no inputs"),
        })?;
        let input_name = input.name.clone();

        let (mut input_width, mut input_height) = (config.input_width, config.input_height);
        if let Some(shape) = input.input_type.tensor_shape() {
            // [batch, channels, height, width]; dynamic axes are negative.
            if shape.len() == 4 && shape[2] > 0 && shape[3] > 0 {
                input_height = shape[2] as u32;
                input_width = shape[3] as u32;
            }
        }

        info!(
            path = %model_path.display(),
            input = %input_name,
            input_width,
            input_height,
            "loaded detection model"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            input_width,
            input_height,
            model_path,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl Inference for OnnxSession {
    fn infer(&self, input: &Array4<f32>) -> Result<Array3<f32>> {
        let (n, c, h, w) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_array(([n, c, h, w], data.into_boxed_slice()))
            .context("failed to create YOLO input tensor")?
            .into_dyn();

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("YOLOv8 inference failed")?;

        // YOLOv8 output: [1, 84, N]  (84 = 4 box coords + 80 class scores)
        let value = outputs
            .iter()
            .next()
            .context("YOLOv8 produced no outputs")?
            .1;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .context("failed to extract YOLOv8 output tensor")?;
        ensure!(shape.len() == 3, "expected a 3-D output tensor, got {:?}", shape);
        ensure!(
            shape.iter().all(|&d| d >= 0),
            "output tensor has dynamic dimensions {:?}",
            shape
        );

        let dims = (shape[0] as usize, shape[1] as usize, shape[2] as usize);
        Array3::from_shape_vec(dims, data.to_vec()).context("output tensor shape mismatch")
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        Some((self.input_width, self.input_height))
    }
}

fn build_ort_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let mut builder = Session::builder().context("failed to create ORT session builder")?;
    builder = builder
        .with_intra_threads(intra_threads)
        .context("failed to set ORT intra threads")?;
    builder = builder
        .with_inter_threads(1)
        .context("failed to set ORT inter threads")?;
    builder = builder
        .with_parallel_execution(false)
        .context("failed to set ORT parallel execution")?;
    builder
        .commit_from_file(model_path)
        .context("failed to load YOLOv8 ONNX model")
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode a raw `[1, 4 + classes, N]` output into source-frame boxes.
///
/// A candidate is kept when its best class is `target_class` and that
/// class's score is strictly above `conf_threshold`. Boxes are mapped back
/// through the letterbox (`pad_*` then `scale`) and truncated toward zero.
/// The result is in candidate order. Malformed output yields no boxes.
pub fn decode(
    raw: ArrayView3<'_, f32>,
    scale: f32,
    pad_left: u32,
    pad_top: u32,
    target_class: usize,
    conf_threshold: f32,
) -> Vec<Detection> {
    let (batch, rows, num_proposals) = raw.dim();
    if batch == 0 || rows <= BOX_PARAMS || scale <= 0.0 {
        return Vec::new();
    }
    let num_classes = rows - BOX_PARAMS;
    if target_class >= num_classes {
        return Vec::new();
    }

    let pad_left = pad_left as f32;
    let pad_top = pad_top as f32;

    // Stored column-major across the rows: candidate i is raw[0, .., i].
    (0..num_proposals)
        .into_par_iter()
        .filter_map(|i| {
            let mut class_id = 0usize;
            let mut confidence = raw[[0, BOX_PARAMS, i]];
            for c in 1..num_classes {
                let s = raw[[0, BOX_PARAMS + c, i]];
                if s > confidence {
                    confidence = s;
                    class_id = c;
                }
            }

            if !(confidence > conf_threshold) || class_id != target_class {
                return None;
            }

            let cx = raw[[0, 0, i]];
            let cy = raw[[0, 1, i]];
            let w = raw[[0, 2, i]];
            let h = raw[[0, 3, i]];

            // Float-to-int `as` truncates toward zero.
            Some(Detection {
                x1: ((cx - w / 2.0 - pad_left) / scale) as i32,
                y1: ((cy - h / 2.0 - pad_top) / scale) as i32,
                x2: ((cx + w / 2.0 - pad_left) / scale) as i32,
                y2: ((cy + h / 2.0 - pad_top) / scale) as i32,
                confidence,
                class_id,
            })
        })
        .collect()
}

// ── Non-Maximum Suppression ──────────────────────────────────────────────────

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
///
/// Not part of [`decode`]; only applied when the pipeline is configured
/// with an IoU threshold.
pub fn suppress_overlaps(mut boxes: Vec<Detection>, iou_thresh: f32) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if boxes[i].iou(&boxes[j]) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }

    debug!(before = boxes.len(), after = kept.len(), "overlap suppression");
    kept
}
