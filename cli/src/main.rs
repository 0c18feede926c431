use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glowball_core::{
    config::{DEFAULT_CONF_THRESHOLD, DEFAULT_MODEL_PATH, DEFAULT_TARGET_CLASS},
    runtime::{configure_ort_dylib, rolling_log_appender},
    video::{probe, total_frames},
    OnnxSession, OutputCodec, PipelineConfig,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "glowball",
    version,
    about = "Detect one object class in a video and make it glow",
    long_about = None
)]
struct Cli {
    /// Directory for the daily rotated log files
    #[arg(long, global = true, env = "GLOWBALL_LOGS_DIR", default_value = "logs")]
    logs_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection + glow over every frame and write a new video.
    Process {
        /// Input video path
        #[arg(short, long)]
        input: PathBuf,

        /// Output video path
        #[arg(short, long, default_value = "processed.mp4")]
        output: PathBuf,

        /// YOLOv8 ONNX model path
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,

        /// COCO class index to highlight (32 = sports ball)
        #[arg(long, default_value_t = DEFAULT_TARGET_CLASS)]
        class: usize,

        /// Minimum class score, exclusive (0–1)
        #[arg(long, default_value_t = DEFAULT_CONF_THRESHOLD)]
        confidence: f32,

        /// Enable overlap suppression at this IoU
        #[arg(long)]
        nms_iou: Option<f32>,

        /// Output codec: h264 or mpeg4
        #[arg(long, default_value = "mpeg4")]
        codec: OutputCodec,

        /// ONNX Runtime intra-op threads
        #[arg(long, default_value_t = 1)]
        threads: usize,
    },

    /// Print resolution, frame rate and frame count of a video.
    Probe {
        /// Input video path
        #[arg(short, long)]
        input: PathBuf,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.logs_dir)?;

    match cli.command {
        Commands::Process {
            input,
            output,
            model,
            class,
            confidence,
            nms_iou,
            codec,
            threads,
        } => {
            let config = PipelineConfig {
                model_path: model,
                target_class: class,
                conf_threshold: confidence,
                nms_iou_threshold: nms_iou,
                codec,
                intra_threads: threads,
                ..PipelineConfig::default()
            }
            .normalized();
            cmd_process(input, output, config)
        }
        Commands::Probe { input } => cmd_probe(input),
    }
}

// ── process ───────────────────────────────────────────────────────────────────

fn cmd_process(input: PathBuf, output: PathBuf, config: PipelineConfig) -> Result<()> {
    info!("glowball");
    info!("  input  : {}", input.display());
    info!("  output : {}", output.display());
    info!("  model  : {}", config.model_path.display());
    info!("  class  : {} (> {:.2})", config.target_class, config.conf_threshold);

    configure_ort_dylib();
    let session = OnnxSession::load(&config).context("failed to load detection model")?;

    let pb = progress_bar(total_frames(&input))?;
    let pb2 = pb.clone();

    let written = glowball_core::process_with_progress(
        &input,
        &output,
        &session,
        &config,
        move |current, total| {
            if total > 0 && pb2.length() != Some(total) {
                pb2.set_length(total);
            }
            pb2.set_position(current);
        },
    )
    .with_context(|| format!("failed to process {}", input.display()))?;

    pb.finish_with_message("Done.");
    info!("saved {}", written.display());
    Ok(())
}

// ── probe ─────────────────────────────────────────────────────────────────────

fn cmd_probe(input: PathBuf) -> Result<()> {
    let info = probe(&input).with_context(|| format!("failed to probe {}", input.display()))?;
    println!("{}", input.display());
    println!("  resolution : {}x{}", info.width, info.height);
    println!(
        "  frame rate : {}/{} ({:.3} fps)",
        info.frame_rate.num,
        info.frame_rate.den,
        info.frame_rate.as_f64()
    );
    if info.estimated_frames > 0 {
        println!("  frames     : ~{}", info.estimated_frames);
    } else {
        println!("  frames     : unknown");
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// stderr plus a rotating file under `logs_dir`. Respects RUST_LOG; default info.
fn init_logging(logs_dir: &Path) -> Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(rolling_log_appender(logs_dir)?);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Ok(guard)
}

fn progress_bar(total: u64) -> Result<ProgressBar> {
    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})",
            )?
            .progress_chars("=> "),
        );
        pb
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {pos} frames [{elapsed_precise}]")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        pb
    };
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    Ok(pb)
}
