use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use glowball_core::video::{FrameRate, FrameSink, FrameSource, RgbFrame, VideoInfo};
use glowball_core::{run, Error, Inference, PipelineConfig, ProcessStats};
use ndarray::{Array3, Array4};

const BALL: usize = 32;

// ── Test doubles ─────────────────────────────────────────────────────────────

struct VecSource {
    info: VideoInfo,
    frames: VecDeque<Result<RgbFrame>>,
}

impl VecSource {
    fn new(frames: Vec<RgbFrame>) -> Self {
        let (width, height) = frames.first().map_or((0, 0), |f| (f.width, f.height));
        Self {
            info: VideoInfo {
                width,
                height,
                frame_rate: FrameRate { num: 30, den: 1 },
                estimated_frames: frames.len() as u64,
            },
            frames: frames.into_iter().map(Ok).collect(),
        }
    }
}

impl FrameSource for VecSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<Option<RgbFrame>> {
        self.frames.pop_front().transpose()
    }
}

#[derive(Default)]
struct VecSink {
    frames: Vec<RgbFrame>,
    finished: usize,
}

impl FrameSink for VecSink {
    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished += 1;
        Ok(())
    }
}

/// Rejects every frame; counts `finish` calls.
#[derive(Default)]
struct FailingSink {
    attempts: usize,
    finished: usize,
}

impl FrameSink for FailingSink {
    fn write_frame(&mut self, _frame: &RgbFrame) -> Result<()> {
        self.attempts += 1;
        Err(anyhow!("disk full"))
    }

    fn finish(&mut self) -> Result<()> {
        self.finished += 1;
        Ok(())
    }
}

/// Returns the same raw output for every frame and records input shapes.
struct FixedModel {
    output: Array3<f32>,
    input_size: Option<(u32, u32)>,
    calls: AtomicUsize,
    shapes: Mutex<Vec<Vec<usize>>>,
}

impl FixedModel {
    fn new(output: Array3<f32>) -> Self {
        Self {
            output,
            input_size: None,
            calls: AtomicUsize::new(0),
            shapes: Mutex::new(Vec::new()),
        }
    }
}

impl Inference for FixedModel {
    fn infer(&self, input: &Array4<f32>) -> Result<Array3<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.shapes.lock().unwrap().push(input.shape().to_vec());
        Ok(self.output.clone())
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        self.input_size
    }
}

struct FailingModel;

impl Inference for FailingModel {
    fn infer(&self, _input: &Array4<f32>) -> Result<Array3<f32>> {
        Err(anyhow!("device lost"))
    }
}

/// `[1, 84, n]` output from `(cx, cy, w, h, class, score)` candidates.
fn raw_output(candidates: &[(f32, f32, f32, f32, usize, f32)]) -> Array3<f32> {
    let mut raw = Array3::zeros((1, 84, candidates.len()));
    for (i, &(cx, cy, w, h, class, score)) in candidates.iter().enumerate() {
        raw[[0, 0, i]] = cx;
        raw[[0, 1, i]] = cy;
        raw[[0, 2, i]] = w;
        raw[[0, 3, i]] = h;
        raw[[0, 4 + class, i]] = score;
    }
    raw
}

/// 64×64 model input keeps the letterbox at scale 1 for 64-wide frames.
fn small_config() -> PipelineConfig {
    PipelineConfig {
        input_width: 64,
        input_height: 64,
        ..PipelineConfig::default()
    }
}

fn numbered_frames(n: usize, width: u32, height: u32) -> Vec<RgbFrame> {
    (0..n)
        .map(|i| {
            let mut f = RgbFrame::solid(width, height, [10 * i as u8, 100, 200]);
            f.pts = i as i64;
            f
        })
        .collect()
}

fn drive(
    source: &mut VecSource,
    sink: &mut VecSink,
    model: &dyn Inference,
    config: &PipelineConfig,
) -> glowball_core::Result<ProcessStats> {
    run(source, sink, model, config, &mut |_, _| {})
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn frames_without_detections_pass_through_unchanged() {
    let frames = numbered_frames(3, 64, 48);
    let mut source = VecSource::new(frames.clone());
    let mut sink = VecSink::default();
    let model = FixedModel::new(raw_output(&[]));

    let stats = drive(&mut source, &mut sink, &model, &small_config()).unwrap();

    assert_eq!(
        stats,
        ProcessStats {
            frames: 3,
            detections: 0
        }
    );
    assert_eq!(sink.frames, frames);
    assert_eq!(sink.finished, 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn one_detection_glows_only_its_footprint() {
    let frame = RgbFrame::solid(64, 48, [30, 60, 90]);
    let mut source = VecSource::new(vec![frame.clone()]);
    let mut sink = VecSink::default();
    // 64x48 into 64x64: scale 1, pad_top 8. Box (24, 16)-(40, 32) in the frame.
    let model = FixedModel::new(raw_output(&[(32.0, 32.0, 16.0, 16.0, BALL, 0.9)]));

    let stats = drive(&mut source, &mut sink, &model, &small_config()).unwrap();
    assert_eq!(stats.detections, 1);

    let out = &sink.frames[0];
    assert_eq!((out.width, out.height), (64, 48));
    let (x1, y1, x2, y2) = (24, 16, 40, 32);
    let (cx, cy, r) = ((x1 + x2) / 2, (y1 + y2) / 2, (x2 - x1) / 4);
    let mut changed = 0;
    for y in 0..48u32 {
        for x in 0..64u32 {
            if out.pixel(x, y) == frame.pixel(x, y) {
                continue;
            }
            changed += 1;
            let (xi, yi) = (x as i32, y as i32);
            let in_box = xi >= x1 && xi < x2 && yi >= y1 && yi < y2;
            let in_dot = (xi - cx).pow(2) + (yi - cy).pow(2) <= (r + 1).pow(2);
            assert!(in_box || in_dot, "({x}, {y}) changed outside the glow footprint");
        }
    }
    assert!(changed > 0);
    assert_eq!(out.pixel(cx as u32, cy as u32), [200, 255, 200]);
}

#[test]
fn other_classes_and_weak_scores_are_ignored() {
    let frame = RgbFrame::solid(64, 48, [30, 60, 90]);
    let mut source = VecSource::new(vec![frame.clone()]);
    let mut sink = VecSink::default();
    let model = FixedModel::new(raw_output(&[
        (32.0, 32.0, 16.0, 16.0, 0, 0.95),
        (20.0, 20.0, 8.0, 8.0, BALL, 0.5),
    ]));

    let stats = drive(&mut source, &mut sink, &model, &small_config()).unwrap();
    assert_eq!(stats.detections, 0);
    assert_eq!(sink.frames[0], frame);
}

#[test]
fn overlapping_boxes_are_all_drawn_unless_suppression_is_enabled() {
    let candidates = [
        (32.0, 32.0, 16.0, 16.0, BALL, 0.9),
        (33.0, 32.0, 16.0, 16.0, BALL, 0.8),
    ];

    let mut source = VecSource::new(vec![RgbFrame::solid(64, 48, [1, 2, 3])]);
    let mut sink = VecSink::default();
    let model = FixedModel::new(raw_output(&candidates));
    let stats = drive(&mut source, &mut sink, &model, &small_config()).unwrap();
    assert_eq!(stats.detections, 2);

    let config = PipelineConfig {
        nms_iou_threshold: Some(0.5),
        ..small_config()
    };
    let mut source = VecSource::new(vec![RgbFrame::solid(64, 48, [1, 2, 3])]);
    let mut sink = VecSink::default();
    let stats = drive(&mut source, &mut sink, &model, &config).unwrap();
    assert_eq!(stats.detections, 1);
}

#[test]
fn inference_failure_is_reported_as_inference_error() {
    let mut source = VecSource::new(numbered_frames(2, 32, 32));
    let mut sink = VecSink::default();

    let err = drive(&mut source, &mut sink, &FailingModel, &small_config()).unwrap_err();
    assert!(matches!(err, Error::Inference(_)), "{err:?}");
    assert!(sink.frames.is_empty());
    assert_eq!(sink.finished, 0);
}

#[test]
fn sink_failure_is_a_write_error_and_skips_finish() {
    let mut source = VecSource::new(numbered_frames(3, 32, 32));
    let mut sink = FailingSink::default();
    let model = FixedModel::new(raw_output(&[]));

    let err = run(&mut source, &mut sink, &model, &small_config(), &mut |_, _| {}).unwrap_err();
    assert!(matches!(err, Error::Write(_)), "{err:?}");
    assert_eq!(sink.attempts, 1);
    assert_eq!(sink.finished, 0);
    assert_eq!(source.frames.len(), 2);
}

#[test]
fn mid_stream_read_error_ends_the_stream() {
    let mut source = VecSource::new(numbered_frames(3, 32, 32));
    source.frames[1] = Err(anyhow!("corrupt packet"));
    let mut sink = VecSink::default();
    let model = FixedModel::new(raw_output(&[]));

    let stats = drive(&mut source, &mut sink, &model, &small_config()).unwrap();
    assert_eq!(stats.frames, 1);
    assert_eq!(sink.frames.len(), 1);
    assert_eq!(sink.finished, 1);
}

#[test]
fn model_input_size_overrides_config() {
    let mut source = VecSource::new(numbered_frames(1, 40, 20));
    let mut sink = VecSink::default();
    let mut model = FixedModel::new(raw_output(&[]));
    model.input_size = Some((32, 48));

    drive(&mut source, &mut sink, &model, &small_config()).unwrap();
    assert_eq!(model.shapes.lock().unwrap()[0], vec![1, 3, 48, 32]);
}

#[test]
fn progress_reports_every_frame() {
    let mut source = VecSource::new(numbered_frames(4, 16, 16));
    let mut sink = VecSink::default();
    let model = FixedModel::new(raw_output(&[]));
    let mut seen = Vec::new();

    run(&mut source, &mut sink, &model, &small_config(), &mut |done, total| {
        seen.push((done, total))
    })
    .unwrap();
    assert_eq!(seen, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
}

#[test]
fn missing_input_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let model = FixedModel::new(raw_output(&[]));

    let err = glowball_core::process(
        dir.path().join("does-not-exist.mp4"),
        &output,
        &model,
        &small_config(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SourceOpen { .. }), "{err:?}");
    assert!(!output.exists());
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}
