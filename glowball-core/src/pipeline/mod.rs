//! pipeline — per-frame driver
//!
//! Each frame goes letterbox → infer → decode → glow, in read order, with no
//! state carried between frames. [`process`] wires the FFmpeg reader and
//! writer around that loop; [`run`] drives any source/sink pair.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::detection::{decode, suppress_overlaps, Detection, Inference};
use crate::error::{Error, Result};
use crate::letterbox::Letterboxer;
use crate::rendering::apply_glow_all;
use crate::video::{FrameSink, FrameSource, RgbFrame, VideoReader, VideoWriter};

/// Frames between timing log lines.
const PROFILE_INTERVAL: u64 = 300;

/// Totals for one processed video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub frames: u64,
    /// Number of glow applications, summed over all frames.
    pub detections: u64,
}

/// Runs detection and compositing on single frames.
pub struct FrameProcessor<'a> {
    session: &'a dyn Inference,
    config: &'a PipelineConfig,
    letterboxer: Letterboxer,
    input_width: u32,
    input_height: u32,
    prof_frames: u64,
    prof_preprocess: Duration,
    prof_infer: Duration,
    prof_composite: Duration,
}

impl<'a> FrameProcessor<'a> {
    pub fn new(session: &'a dyn Inference, config: &'a PipelineConfig) -> Self {
        let (input_width, input_height) = session
            .input_size()
            .unwrap_or((config.input_width, config.input_height));
        Self {
            session,
            config,
            letterboxer: Letterboxer::new(),
            input_width,
            input_height,
            prof_frames: 0,
            prof_preprocess: Duration::ZERO,
            prof_infer: Duration::ZERO,
            prof_composite: Duration::ZERO,
        }
    }

    /// Detect target-class objects in `frame`, in source-frame coordinates.
    pub fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        let preprocess_start = Instant::now();
        let lb = self
            .letterboxer
            .apply(frame, self.input_width, self.input_height)
            .map_err(Error::Frame)?;
        self.prof_preprocess += preprocess_start.elapsed();

        let infer_start = Instant::now();
        let raw = self.session.infer(&lb.tensor).map_err(Error::Inference)?;
        self.prof_infer += infer_start.elapsed();

        let detections = decode(
            raw.view(),
            lb.scale,
            lb.pad_left,
            lb.pad_top,
            self.config.target_class,
            self.config.conf_threshold,
        );

        Ok(match self.config.nms_iou_threshold {
            Some(iou) => suppress_overlaps(detections, iou),
            None => detections,
        })
    }

    /// Detect and glow in place. Returns the boxes that were drawn.
    pub fn process_frame(&mut self, frame: &mut RgbFrame) -> Result<Vec<Detection>> {
        let detections = self.detect(frame)?;

        let composite_start = Instant::now();
        apply_glow_all(frame, &detections);
        self.prof_composite += composite_start.elapsed();

        self.prof_frames += 1;
        if self.prof_frames % PROFILE_INTERVAL == 0 {
            self.log_timings();
        }
        if !detections.is_empty() {
            debug!(pts = frame.pts, count = detections.len(), "glow applied");
        }
        Ok(detections)
    }

    fn log_timings(&self) {
        let per_frame = |d: Duration| {
            format!(
                "{:.2}",
                d.as_secs_f64() * 1000.0 / self.prof_frames.max(1) as f64
            )
        };
        info!(
            frames = self.prof_frames,
            preprocess_ms_per_frame = per_frame(self.prof_preprocess),
            infer_ms_per_frame = per_frame(self.prof_infer),
            composite_ms_per_frame = per_frame(self.prof_composite),
            "pipeline timings"
        );
    }
}

/// Drive every frame of `source` through the pipeline into `sink`, in order.
///
/// The source ending (or failing mid-stream) stops the loop cleanly; the
/// sink is finished after the last frame. `progress` receives
/// `(frames_done, estimated_total)` after each written frame.
pub fn run<S, K>(
    source: &mut S,
    sink: &mut K,
    session: &dyn Inference,
    config: &PipelineConfig,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<ProcessStats>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
{
    let total = source.info().estimated_frames;
    let mut processor = FrameProcessor::new(session, config);
    let mut stats = ProcessStats::default();

    loop {
        let mut frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(frames = stats.frames, "stopping at unreadable frame: {e:#}");
                break;
            }
        };

        let detections = processor.process_frame(&mut frame)?;
        stats.detections += detections.len() as u64;

        sink.write_frame(&frame).map_err(Error::Write)?;
        stats.frames += 1;
        progress(stats.frames, total);
    }

    sink.finish().map_err(Error::Write)?;
    if stats.frames >= PROFILE_INTERVAL {
        processor.log_timings();
    }
    Ok(stats)
}

/// Process `input_path` into `output_path` and return the output path.
pub fn process<P, Q>(
    input_path: P,
    output_path: Q,
    session: &dyn Inference,
    config: &PipelineConfig,
) -> Result<PathBuf>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    process_with_progress(input_path, output_path, session, config, |_, _| {})
}

/// Same as [`process`] but calls `progress_fn(current_frame, total_frames)`
/// after every encoded frame.
pub fn process_with_progress<P, Q, G>(
    input_path: P,
    output_path: Q,
    session: &dyn Inference,
    config: &PipelineConfig,
    mut progress_fn: G,
) -> Result<PathBuf>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    G: FnMut(u64, u64),
{
    let input_path = input_path.as_ref();
    let output_path = output_path.as_ref();
    info!(input = %input_path.display(), "starting video processing");

    let mut source = VideoReader::open(input_path).map_err(|source| Error::SourceOpen {
        path: input_path.to_path_buf(),
        source,
    })?;
    let info = source.info();

    let mut sink = VideoWriter::create(output_path, &info, config.codec).map_err(|e| {
        Error::Write(e.context(format!("could not create {}", output_path.display())))
    })?;

    let result = run(&mut source, &mut sink, session, config, &mut progress_fn);
    // Release the encoder and demuxer before touching the output file.
    drop(sink);
    drop(source);

    match result {
        Ok(stats) => {
            info!(
                frames = stats.frames,
                detections = stats.detections,
                output = %output_path.display(),
                "finished video processing"
            );
            Ok(output_path.to_path_buf())
        }
        Err(e) => {
            warn!(output = %output_path.display(), "processing failed, removing partial output");
            if let Err(rm) = std::fs::remove_file(output_path) {
                debug!("could not remove partial output: {rm}");
            }
            Err(e)
        }
    }
}
