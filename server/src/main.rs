//! glowball HTTP server
//!
//! Accepts video uploads, runs the detection + glow pipeline on a blocking
//! worker and reports where the processed file was written.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use glowball_core::{
    config::{DEFAULT_CONF_THRESHOLD, DEFAULT_MODEL_PATH, DEFAULT_TARGET_CLASS},
    runtime::{configure_ort_dylib, rolling_log_appender},
    OnnxSession, OutputCodec, PipelineConfig,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::state::{AppState, ServerConfig};

/// glowball server
#[derive(Parser, Debug)]
#[command(name = "glowball-server")]
#[command(version)]
#[command(about = "HTTP API for highlighting objects in uploaded videos")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// YOLOv8 ONNX model path
    #[arg(long, env = "GLOWBALL_MODEL", default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// Where uploaded videos are stored
    #[arg(long, env = "GLOWBALL_UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,

    /// Where processed videos are written
    #[arg(long, env = "GLOWBALL_OUTPUTS_DIR", default_value = "outputs")]
    outputs_dir: PathBuf,

    /// Directory for the daily rotated log files
    #[arg(long, env = "GLOWBALL_LOGS_DIR", default_value = "logs")]
    logs_dir: PathBuf,

    /// COCO class index to highlight
    #[arg(long, default_value_t = DEFAULT_TARGET_CLASS)]
    class: usize,

    /// Minimum class score, exclusive
    #[arg(long, default_value_t = DEFAULT_CONF_THRESHOLD)]
    confidence: f32,

    /// Enable overlap suppression at this IoU
    #[arg(long)]
    nms_iou: Option<f32>,

    /// Output codec: h264 or mpeg4
    #[arg(long, default_value = "mpeg4")]
    codec: OutputCodec,

    /// Largest accepted upload, in MiB
    #[arg(long, default_value_t = 512)]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(&cli.logs_dir)?;

    let pipeline = PipelineConfig {
        model_path: cli.model,
        target_class: cli.class,
        conf_threshold: cli.confidence,
        nms_iou_threshold: cli.nms_iou,
        codec: cli.codec,
        ..PipelineConfig::default()
    }
    .normalized();

    let config = ServerConfig {
        uploads_dir: cli.uploads_dir,
        outputs_dir: cli.outputs_dir,
        max_upload_bytes: cli.max_upload_mb.saturating_mul(1024 * 1024),
    };

    info!("glowball server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Model:       {:?}", pipeline.model_path);
    info!("  Uploads dir: {:?}", config.uploads_dir);
    info!("  Outputs dir: {:?}", config.outputs_dir);
    info!("  Logs dir:    {:?}", cli.logs_dir);
    info!("  Class:       {} (> {:.2})", pipeline.target_class, pipeline.conf_threshold);

    // A missing model is fatal before we accept any request.
    configure_ort_dylib();
    let session = OnnxSession::load(&pipeline).context("failed to load detection model")?;

    let state = AppState::new(config, pipeline, Arc::new(session));
    state
        .ensure_dirs()
        .context("failed to create upload/output directories")?;

    let app = routes::router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Compact stderr output plus a rotating file under `logs_dir`.
fn init_logging(logs_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(rolling_log_appender(logs_dir)?);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}
