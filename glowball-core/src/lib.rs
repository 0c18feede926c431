pub mod config;
pub mod detection;
pub mod error;
pub mod letterbox;
pub mod pipeline;
pub mod rendering;
pub mod runtime;
pub mod video;

// Callers only need `glowball_core::Error`
pub use error::{Error, Result};

pub use config::{OutputCodec, PipelineConfig};
pub use detection::{Detection, Inference, OnnxSession};
pub use pipeline::{process, process_with_progress, run, ProcessStats};
