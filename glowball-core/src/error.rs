//! error — typed failures surfaced by the pipeline driver
//!
//! The pure stages (letterbox, decode, glow) have no failure modes on
//! well-formed input. Everything here comes from the I/O-facing edges:
//! model loading, video open/write, and the inference call itself.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The model artifact does not exist. Fatal at startup.
    #[error("model not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    /// The model artifact exists but ONNX Runtime could not load it.
    #[error("failed to load model {}", path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The input video could not be opened or has no decodable video stream.
    #[error("could not open video source {}", path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The opaque inference call failed.
    #[error("inference failed")]
    Inference(#[source] anyhow::Error),

    /// The output sink could not be created, written, or finalized.
    #[error("failed to write video output")]
    Write(#[source] anyhow::Error),

    /// A frame buffer did not match its declared dimensions.
    #[error("malformed frame buffer")]
    Frame(#[source] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
