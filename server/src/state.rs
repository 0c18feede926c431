//! Application state for the glowball server
//!
//! One model session is loaded at startup and shared by every request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use glowball_core::{Inference, PipelineConfig};

/// Where uploads and results are stored.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub uploads_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            outputs_dir: PathBuf::from("outputs"),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub pipeline: PipelineConfig,
    /// Detection model, shared across concurrent jobs
    pub session: Arc<dyn Inference>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, pipeline: PipelineConfig, session: Arc<dyn Inference>) -> Self {
        Self {
            config,
            pipeline,
            session,
            started_at: Instant::now(),
        }
    }

    /// Create the upload and output directories if they are missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config.uploads_dir)?;
        std::fs::create_dir_all(&self.config.outputs_dir)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
