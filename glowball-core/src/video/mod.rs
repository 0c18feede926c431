//! video — FFmpeg bridge
//!
//! [`VideoReader`] pulls decoded RGB24 frames one at a time and
//! [`VideoWriter`] encodes them back into an MP4 at the source's resolution
//! and frame rate. The driver only sees the [`FrameSource`] / [`FrameSink`]
//! traits, so tests can substitute in-memory implementations.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{
    codec, decoder, encoder, format, frame, media, software::scaling, util::rational::Rational,
    Packet,
};
use tracing::{debug, info, warn};

use crate::config::OutputCodec;

/// Output pixel format for the encoder (YUV420p is universally compatible).
const ENCODE_FORMAT: format::Pixel = format::Pixel::YUV420P;
/// Scaling flags — bilinear is fast and good enough for the decode→encode path.
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;
/// Used when the container reports no usable frame rate.
const FALLBACK_FRAME_RATE: FrameRate = FrameRate { num: 25, den: 1 };
/// Bit rate for the MPEG-4 Part 2 encoder, which has no CRF mode.
const MPEG4_BIT_RATE: usize = 8_000_000;

/// A single decoded video frame in RGB24 format, along with its presentation
/// timestamp (in the source stream's time-base units).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub data: Vec<u8>, // packed RGB24, row-major
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

impl RgbFrame {
    /// A frame filled with a single color.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Self {
            data,
            width,
            height,
            pts: 0,
        }
    }

    /// Whether `data` holds exactly `width * height` packed RGB pixels.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 3
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Frames per second as an exact ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: i32,
    pub den: i32,
}

impl FrameRate {
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    fn to_rational(self) -> Rational {
        Rational::new(self.num, self.den)
    }

    fn from_rational(r: Rational) -> Self {
        Self {
            num: r.numerator(),
            den: r.denominator(),
        }
    }
}

/// Geometry and timing a sink must reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Approximate frame count; 0 when the container does not say.
    pub estimated_frames: u64,
}

/// Sequential frame reader.
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next frame in decode order, or `None` once the source is exhausted.
    fn read_frame(&mut self) -> Result<Option<RgbFrame>>;
}

/// Sequential frame writer.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()>;

    /// Flush buffered output. Called exactly once after the last frame.
    fn finish(&mut self) -> Result<()>;
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Decodes the best video stream of a file into [`RgbFrame`]s.
pub struct VideoReader {
    ictx: format::context::Input,
    decoder: decoder::Video,
    to_rgb: scaling::Context,
    stream_index: usize,
    decoded: frame::Video,
    rgb: frame::Video,
    info: VideoInfo,
    drained: bool,
    frames_read: u64,
}

impl VideoReader {
    pub fn open<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        ffmpeg::init().context("failed to initialise FFmpeg")?;

        let ictx = format::input(&input_path).context("could not open input file")?;

        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .context("no video stream found in input")?;
        let stream_index = stream.index();
        let frame_rate = stream_frame_rate(&stream);
        let estimated_frames = estimate_frames(&stream);

        let decoder_ctx = codec::context::Context::from_parameters(stream.parameters())
            .context("failed to build decoder context")?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("failed to open video decoder")?;

        let width = decoder.width();
        let height = decoder.height();
        if width == 0 || height == 0 {
            bail!("video stream reports zero-sized frames");
        }
        let src_pixel_fmt = decoder.format();

        info!(
            width,
            height,
            fps = frame_rate.as_f64(),
            estimated_frames,
            ?src_pixel_fmt,
            "opened input video stream"
        );

        // Scaler: decoded frame → RGB24 at the source size
        let to_rgb = scaling::Context::get(
            src_pixel_fmt,
            width,
            height,
            format::Pixel::RGB24,
            width,
            height,
            SCALE_FLAGS,
        )
        .context("failed to create to-RGB scaler")?;

        Ok(Self {
            ictx,
            decoder,
            to_rgb,
            stream_index,
            decoded: frame::Video::empty(),
            rgb: frame::Video::empty(),
            info: VideoInfo {
                width,
                height,
                frame_rate,
                estimated_frames,
            },
            drained: false,
            frames_read: 0,
        })
    }

    fn take_decoded(&mut self) -> Result<RgbFrame> {
        self.to_rgb
            .run(&self.decoded, &mut self.rgb)
            .context("to-RGB scaling failed")?;

        // Compact to a plain Vec<u8> (remove stride padding if any)
        let width = self.info.width as usize;
        let height = self.info.height as usize;
        let stride = self.rgb.stride(0);
        let raw = self.rgb.data(0);
        let mut data = Vec::with_capacity(width * height * 3);
        for row in 0..height {
            let start = row * stride;
            data.extend_from_slice(&raw[start..start + width * 3]);
        }

        let pts = self.decoded.pts().unwrap_or(self.frames_read as i64);
        self.frames_read += 1;

        Ok(RgbFrame {
            data,
            width: self.info.width,
            height: self.info.height,
            pts,
        })
    }
}

impl FrameSource for VideoReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<Option<RgbFrame>> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return self.take_decoded().map(Some);
            }
            if self.drained {
                debug!(frames = self.frames_read, "input exhausted");
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .context("decoder send_packet")?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    // Flush frames still buffered in the decoder.
                    self.decoder.send_eof().context("decoder send_eof")?;
                    self.drained = true;
                }
                Err(e) => return Err(e).context("failed to read input packet"),
            }
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Encodes [`RgbFrame`]s into an MP4 file at a fixed size and frame rate.
pub struct VideoWriter {
    octx: format::context::Output,
    encoder: encoder::Video,
    to_yuv: scaling::Context,
    rgb_frame: frame::Video,
    yuv_frame: frame::Video,
    stream_index: usize,
    time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
    finished: bool,
    path: PathBuf,
}

impl VideoWriter {
    pub fn create<P: AsRef<Path>>(output_path: P, info: &VideoInfo, codec: OutputCodec) -> Result<Self> {
        ffmpeg::init().context("failed to initialise FFmpeg")?;

        let path = output_path.as_ref().to_path_buf();
        let VideoInfo { width, height, .. } = *info;
        if width == 0 || height == 0 {
            bail!("cannot encode zero-sized frames");
        }
        let codec = effective_codec(codec, width, height);
        let frame_rate = if info.frame_rate.is_valid() {
            info.frame_rate
        } else {
            FALLBACK_FRAME_RATE
        };
        // One tick per frame; pts is simply the output frame index.
        let time_base = frame_rate.to_rational().invert();

        let mut octx = format::output_as(&path, "mp4").context("could not create output context")?;

        let global_header = octx
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let encoder_codec = match codec {
            OutputCodec::H264 => encoder::find(codec::Id::H264)
                .context("H.264 encoder not found; is FFmpeg built with libx264?")?,
            OutputCodec::Mpeg4 => {
                encoder::find(codec::Id::MPEG4).context("MPEG-4 encoder not found")?
            }
        };

        let mut video_out_stream = octx.add_stream(encoder_codec)?;
        let encoder_ctx = codec::context::Context::new_with_codec(encoder_codec);
        let mut builder = encoder_ctx.encoder().video()?;

        builder.set_width(width);
        builder.set_height(height);
        builder.set_format(ENCODE_FORMAT);
        builder.set_time_base(time_base);
        builder.set_frame_rate(Some(frame_rate.to_rational()));
        if global_header {
            builder.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let options = match codec {
            OutputCodec::H264 => {
                ffmpeg::Dictionary::from_iter([("crf", "18"), ("preset", "fast")])
            }
            OutputCodec::Mpeg4 => {
                builder.set_bit_rate(MPEG4_BIT_RATE);
                ffmpeg::Dictionary::new()
            }
        };
        let encoder = builder
            .open_as_with(encoder_codec, options)
            .with_context(|| format!("failed to open {codec:?} encoder"))?;

        video_out_stream.set_parameters(&encoder);
        video_out_stream.set_time_base(time_base);
        let stream_index = video_out_stream.index();

        let to_yuv = scaling::Context::get(
            format::Pixel::RGB24,
            width,
            height,
            ENCODE_FORMAT,
            width,
            height,
            SCALE_FLAGS,
        )
        .context("failed to create to-YUV scaler")?;

        info!(width, height, fps = frame_rate.as_f64(), ?codec, "writing output header");
        octx.write_header().context("failed to write output header")?;

        Ok(Self {
            octx,
            encoder,
            to_yuv,
            rgb_frame: frame::Video::new(format::Pixel::RGB24, width, height),
            yuv_frame: frame::Video::empty(),
            stream_index,
            time_base,
            width,
            height,
            next_pts: 0,
            finished: false,
            path,
        })
    }

    fn drain_packets(&mut self) -> Result<()> {
        flush_encoder(
            &mut self.encoder,
            &mut self.octx,
            self.stream_index,
            self.time_base,
        )
    }
}

impl FrameSink for VideoWriter {
    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()> {
        if self.finished {
            bail!("write after finish");
        }
        if frame.width != self.width || frame.height != self.height || !frame.is_well_formed() {
            bail!(
                "frame is {}x{} but the output stream is {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            );
        }

        let row_len = self.width as usize * 3;
        let out_stride = self.rgb_frame.stride(0);
        let plane_data = self.rgb_frame.data_mut(0);
        for row in 0..self.height as usize {
            let dst_start = row * out_stride;
            let src_start = row * row_len;
            plane_data[dst_start..dst_start + row_len]
                .copy_from_slice(&frame.data[src_start..src_start + row_len]);
        }

        // Convert RGB24 → YUV420P for encoder
        self.to_yuv
            .run(&self.rgb_frame, &mut self.yuv_frame)
            .context("to-YUV scaling failed")?;
        self.yuv_frame.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&self.yuv_frame)
            .context("encoder send_frame")?;
        self.drain_packets()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.encoder.send_eof().context("encoder send_eof")?;
        self.drain_packets()?;
        self.octx
            .write_trailer()
            .context("failed to write output trailer")?;

        info!(frames = self.next_pts, path = %self.path.display(), "output finalized");
        Ok(())
    }
}

/// libx264 with YUV420P rejects odd dimensions; those sizes go to MPEG-4.
fn effective_codec(requested: OutputCodec, width: u32, height: u32) -> OutputCodec {
    if requested == OutputCodec::H264 && (width % 2 == 1 || height % 2 == 1) {
        warn!(width, height, "H.264 needs even dimensions; encoding MPEG-4 instead");
        return OutputCodec::Mpeg4;
    }
    requested
}

/// Drain all pending packets from the encoder and write them to the muxer.
fn flush_encoder(
    encoder: &mut encoder::Video,
    octx: &mut format::context::Output,
    stream_index: usize,
    time_base: Rational,
) -> Result<()> {
    let stream_time_base = octx
        .stream(stream_index)
        .context("output stream disappeared")?
        .time_base();
    let mut encoded = Packet::empty();
    while encoder.receive_packet(&mut encoded).is_ok() {
        encoded.set_stream(stream_index);
        encoded.rescale_ts(time_base, stream_time_base);
        encoded
            .write_interleaved(octx)
            .context("failed to write encoded packet")?;
    }
    Ok(())
}

// ── Probing ──────────────────────────────────────────────────────────────────

/// Read a file's video geometry and timing without decoding any frames.
pub fn probe<P: AsRef<Path>>(input_path: P) -> Result<VideoInfo> {
    ffmpeg::init().context("failed to initialise FFmpeg")?;
    let ictx = format::input(&input_path).context("could not open input file")?;
    let stream = ictx
        .streams()
        .best(media::Type::Video)
        .context("no video stream found in input")?;
    let params = codec::context::Context::from_parameters(stream.parameters())
        .context("failed to read stream parameters")?;
    let decoder = params
        .decoder()
        .video()
        .context("failed to open video decoder")?;
    Ok(VideoInfo {
        width: decoder.width(),
        height: decoder.height(),
        frame_rate: stream_frame_rate(&stream),
        estimated_frames: estimate_frames(&stream),
    })
}

/// Return the approximate total frame count for a video file (used for
/// progress reporting).  Falls back to 0 if the count cannot be determined.
pub fn total_frames<P: AsRef<Path>>(input_path: P) -> u64 {
    probe(input_path).map(|i| i.estimated_frames).unwrap_or(0)
}

fn stream_frame_rate(stream: &ffmpeg::Stream<'_>) -> FrameRate {
    [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .map(FrameRate::from_rational)
        .find(FrameRate::is_valid)
        .unwrap_or(FALLBACK_FRAME_RATE)
}

fn estimate_frames(stream: &ffmpeg::Stream<'_>) -> u64 {
    // nb_frames is set by most muxers; fall back to duration × fps estimate.
    let nb = stream.frames();
    if nb > 0 {
        return nb as u64;
    }
    let dur = stream.duration(); // in stream time-base units
    let tb = stream.time_base();
    let fps = stream.avg_frame_rate();
    if dur > 0 && tb.denominator() > 0 && fps.numerator() > 0 && fps.denominator() > 0 {
        let seconds = dur as f64 * tb.numerator() as f64 / tb.denominator() as f64;
        let fps_f = fps.numerator() as f64 / fps.denominator() as f64;
        return (seconds * fps_f).round() as u64;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_frame_is_well_formed() {
        let f = RgbFrame::solid(4, 3, [1, 2, 3]);
        assert!(f.is_well_formed());
        assert_eq!(f.data.len(), 36);
        assert_eq!(f.pixel(3, 2), [1, 2, 3]);
    }

    #[test]
    fn truncated_buffer_is_not_well_formed() {
        let mut f = RgbFrame::solid(4, 3, [0, 0, 0]);
        f.data.pop();
        assert!(!f.is_well_formed());
    }

    #[test]
    fn frame_rate_ratio() {
        let ntsc = FrameRate { num: 30000, den: 1001 };
        assert!((ntsc.as_f64() - 29.97).abs() < 0.01);
        assert!(!FrameRate { num: 0, den: 0 }.is_valid());
        assert_eq!(FrameRate { num: 0, den: 0 }.as_f64(), 0.0);
    }

    #[test]
    fn odd_sizes_never_reach_x264() {
        assert_eq!(effective_codec(OutputCodec::H264, 33, 17), OutputCodec::Mpeg4);
        assert_eq!(effective_codec(OutputCodec::H264, 64, 17), OutputCodec::Mpeg4);
        assert_eq!(effective_codec(OutputCodec::H264, 64, 48), OutputCodec::H264);
        assert_eq!(effective_codec(OutputCodec::Mpeg4, 33, 17), OutputCodec::Mpeg4);
    }

    #[test]
    fn opening_missing_file_fails() {
        assert!(VideoReader::open("/nonexistent/clip.mp4").is_err());
        assert_eq!(total_frames("/nonexistent/clip.mp4"), 0);
    }
}
