//! config — explicit pipeline configuration
//!
//! Every knob the pipeline reads lives in [`PipelineConfig`]. Binaries build
//! one from their command line and pass it down; nothing here is global.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default model artifact, relative to the working directory.
pub const DEFAULT_MODEL_PATH: &str = "yolo_model/yolov8n.onnx";
/// YOLOv8 input size (square) used when the model does not declare one.
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// COCO class index for "sports ball".
pub const DEFAULT_TARGET_CLASS: usize = 32;
/// Confidence a candidate must strictly exceed to be kept.
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;

/// Output video codec. Both are muxed into an MP4 container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCodec {
    /// H.264 via libx264. Needs even frame dimensions.
    H264,
    /// MPEG-4 Part 2 ("mp4v"). Accepts any frame size.
    #[default]
    Mpeg4,
}

impl std::str::FromStr for OutputCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "mpeg4" | "mp4v" => Ok(Self::Mpeg4),
            other => Err(format!("unknown codec '{other}' (expected h264 or mpeg4)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_path: PathBuf,
    /// Model input width. Replaced by the model's declared width if static.
    pub input_width: u32,
    /// Model input height. Replaced by the model's declared height if static.
    pub input_height: u32,
    pub target_class: usize,
    pub conf_threshold: f32,
    /// Greedy NMS between decode and composite. `None` keeps every
    /// qualifying candidate, overlapping or not.
    pub nms_iou_threshold: Option<f32>,
    pub codec: OutputCodec,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            target_class: DEFAULT_TARGET_CLASS,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            nms_iou_threshold: None,
            codec: OutputCodec::default(),
            intra_threads: 1,
        }
    }
}

impl PipelineConfig {
    /// Clamp thresholds into `[0, 1]` and keep the remaining fields sane.
    pub fn normalized(mut self) -> Self {
        self.conf_threshold = self.conf_threshold.clamp(0.0, 1.0);
        self.nms_iou_threshold = self.nms_iou_threshold.map(|t| t.clamp(0.0, 1.0));
        self.input_width = self.input_width.max(1);
        self.input_height = self.input_height.max(1);
        self.intra_threads = self.intra_threads.max(1);
        self
    }
}
