use std::path::Path;

use anyhow::{anyhow, Result};
use glowball_core::video::{probe, FrameRate, FrameSink, FrameSource, RgbFrame, VideoInfo, VideoReader, VideoWriter};
use glowball_core::{process, Error, Inference, OutputCodec, PipelineConfig};
use ndarray::{Array3, Array4};

const FILL: [u8; 3] = [40, 120, 200];

/// Never detects anything.
struct EmptyModel;

impl Inference for EmptyModel {
    fn infer(&self, _input: &Array4<f32>) -> Result<Array3<f32>> {
        Ok(Array3::zeros((1, 84, 0)))
    }
}

struct BrokenModel;

impl Inference for BrokenModel {
    fn infer(&self, _input: &Array4<f32>) -> Result<Array3<f32>> {
        Err(anyhow!("device lost"))
    }
}

fn write_solid_video(path: &Path, width: u32, height: u32, frames: usize, codec: OutputCodec) {
    let info = VideoInfo {
        width,
        height,
        frame_rate: FrameRate { num: 30, den: 1 },
        estimated_frames: 0,
    };
    let mut writer = VideoWriter::create(path, &info, codec).unwrap();
    let frame = RgbFrame::solid(width, height, FILL);
    for _ in 0..frames {
        writer.write_frame(&frame).unwrap();
    }
    writer.finish().unwrap();
}

fn read_all(path: &Path) -> (VideoInfo, Vec<RgbFrame>) {
    let mut reader = VideoReader::open(path).unwrap();
    let info = reader.info();
    let mut frames = Vec::new();
    while let Some(frame) = reader.read_frame().unwrap() {
        frames.push(frame);
    }
    (info, frames)
}

fn small_config() -> PipelineConfig {
    PipelineConfig {
        input_width: 64,
        input_height: 64,
        ..PipelineConfig::default()
    }
}

#[test]
fn processed_file_keeps_size_rate_and_frame_count() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_solid_video(&input, 64, 48, 3, OutputCodec::Mpeg4);

    let written = process(&input, &output, &EmptyModel, &small_config()).unwrap();
    assert_eq!(written, output);

    let info = probe(&output).unwrap();
    assert_eq!((info.width, info.height), (64, 48));
    assert!((info.frame_rate.as_f64() - 30.0).abs() < 0.01, "{:?}", info.frame_rate);
    assert_eq!(info.estimated_frames, 3);

    let (read_info, frames) = read_all(&output);
    assert_eq!((read_info.width, read_info.height), (64, 48));
    assert_eq!(frames.len(), 3);
    for frame in &frames {
        assert_eq!((frame.width, frame.height), (64, 48));
        assert!(frame.is_well_formed());
        // Lossy codec: the fill colour survives within a small margin.
        let px = frame.pixel(32, 24);
        for (got, want) in px.iter().zip(FILL) {
            assert!(got.abs_diff(want) <= 16, "{px:?} vs {FILL:?}");
        }
    }
}

#[test]
fn odd_sized_frames_round_trip_with_either_codec() {
    let dir = tempfile::tempdir().unwrap();
    for codec in [OutputCodec::default(), OutputCodec::H264] {
        let input = dir.path().join(format!("odd-{codec:?}.mp4"));
        let output = dir.path().join(format!("odd-{codec:?}-out.mp4"));
        write_solid_video(&input, 33, 17, 2, codec);

        let config = PipelineConfig {
            codec,
            ..small_config()
        };
        process(&input, &output, &EmptyModel, &config).unwrap();

        let (info, frames) = read_all(&output);
        assert_eq!((info.width, info.height), (33, 17), "{codec:?}");
        assert_eq!(frames.len(), 2, "{codec:?}");
        assert!(frames.iter().all(|f| (f.width, f.height) == (33, 17)));
    }
}

#[test]
fn failed_run_removes_the_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_solid_video(&input, 64, 48, 2, OutputCodec::Mpeg4);

    let err = process(&input, &output, &BrokenModel, &small_config()).unwrap_err();
    assert!(matches!(err, Error::Inference(_)), "{err:?}");
    assert!(!output.exists());
    assert!(input.exists());
}

#[test]
fn unwritable_output_is_a_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    write_solid_video(&input, 64, 48, 1, OutputCodec::Mpeg4);

    let output = dir.path().join("missing-dir").join("out.mp4");
    let err = process(&input, &output, &EmptyModel, &small_config()).unwrap_err();
    assert!(matches!(err, Error::Write(_)), "{err:?}");
}
