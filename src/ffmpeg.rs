//! FFmpeg-backed video decoding.

extern crate ffmpeg_next as ffmpeg;

use ffmpeg::format::{context::Input, input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use image::RgbImage;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{ConvertError, Result};
use crate::frame_extractor::{VideoBackend, VideoInfo, VideoStream};

// Gaps up to this many frames are decoded through instead of seeking
const SEEK_THRESHOLD: u64 = 48;

// FFmpeg's AV_TIME_BASE, the unit of container-level seek timestamps
const AV_TIME_BASE: f64 = 1_000_000.0;

/// Container timestamp (in `AV_TIME_BASE` units) of 0-based frame `index`
/// for a stream whose first frame is presented at `start_seconds`.
fn seek_timestamp(index: u64, fps: f64, start_seconds: f64) -> i64 {
    ((index as f64 / fps + start_seconds) * AV_TIME_BASE).round() as i64
}

fn init() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| ConvertError::video(PathBuf::new(), format!("ffmpeg init failed: {}", e)))
}

#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        init()?;
        Ok(Self)
    }
}

impl VideoBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoStream>> {
        Ok(Box::new(FfmpegStream::open(path)?))
    }
}

struct FfmpegStream {
    path: PathBuf,
    input: Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    stream_index: usize,
    time_base: f64,
    start_pts: i64,
    info: VideoInfo,
    /// 0-based index of the next frame the decoder will return; `None` right
    /// after a seek until a timestamp has been observed.
    position: Option<u64>,
    eof_sent: bool,
}

impl FfmpegStream {
    fn open(path: &Path) -> Result<Self> {
        let err = |e: ffmpeg::Error| ConvertError::video(path, e);

        let input = input(&path).map_err(err)?;
        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| err(ffmpeg::Error::StreamNotFound))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        // AV_NOPTS_VALUE
        let start_pts = match stream.start_time() {
            i64::MIN => 0,
            ts => ts,
        };
        let fps = f64::from(stream.avg_frame_rate());
        let stream_frames = stream.frames();
        let stream_duration = stream.duration();

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(err)?;
        let decoder = context.decoder().video().map_err(err)?;
        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .map_err(err)?;

        let duration = if stream_duration > 0 {
            stream_duration as f64 * time_base
        } else if input.duration() > 0 {
            input.duration() as f64 / AV_TIME_BASE
        } else {
            0.0
        };
        let total_frames = if stream_frames > 0 {
            stream_frames as u64
        } else if fps > 0.0 {
            (duration * fps).round() as u64
        } else {
            0
        };

        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames,
            duration,
        };
        debug!("Opened {} ({:?})", path.display(), info);

        Ok(Self {
            path: path.to_path_buf(),
            input,
            decoder,
            scaler,
            stream_index,
            time_base,
            start_pts,
            info,
            position: Some(0),
            eof_sent: false,
        })
    }

    fn video_error(&self, e: impl ToString) -> ConvertError {
        ConvertError::video(&self.path, e)
    }

    /// Pull the next decoded frame, feeding packets as needed.
    fn decode_next(&mut self) -> Result<Option<VideoFrame>> {
        let mut decoded = VideoFrame::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut fed = false;
            while let Some((stream, packet)) = self.input.packets().next() {
                if stream.index() == self.stream_index {
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| ConvertError::video(&self.path, e))?;
                    fed = true;
                    break;
                }
            }
            if !fed {
                self.decoder
                    .send_eof()
                    .map_err(|e| ConvertError::video(&self.path, e))?;
                self.eof_sent = true;
            }
        }
    }

    fn frame_index(&self, frame: &VideoFrame) -> Option<u64> {
        let pts = frame.timestamp().or_else(|| frame.pts())?;
        let seconds = (pts - self.start_pts) as f64 * self.time_base;
        Some((seconds * self.info.fps).round().max(0.0) as u64)
    }

    /// Reposition on the keyframe at or before 0-based `index`.
    fn seek_to(&mut self, index: u64) -> Result<()> {
        if self.info.fps <= 0.0 || index < SEEK_THRESHOLD {
            return self.rewind();
        }
        let start_seconds = self.start_pts as f64 * self.time_base;
        let target = seek_timestamp(index, self.info.fps, start_seconds);
        if let Err(e) = self.input.seek(target, ..target) {
            debug!(
                "Seek to frame {} failed in {}: {}; rewinding",
                index,
                self.path.display(),
                e
            );
            return self.rewind();
        }
        self.decoder.flush();
        self.eof_sent = false;
        self.position = None;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        *self = Self::open(&self.path)?;
        Ok(())
    }

    fn to_rgb(&mut self, frame: &VideoFrame) -> Result<RgbImage> {
        let mut rgb = VideoFrame::empty();
        self.scaler
            .run(frame, &mut rgb)
            .map_err(|e| self.video_error(e))?;

        let (width, height) = (rgb.width(), rgb.height());
        let stride = rgb.stride(0);
        let row_len = width as usize * 3;
        let data = rgb.data(0);
        let mut buf = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            buf.extend_from_slice(&data[start..start + row_len]);
        }
        RgbImage::from_raw(width, height, buf)
            .ok_or_else(|| self.video_error("decoded frame has an unexpected size"))
    }
}

impl VideoStream for FfmpegStream {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<RgbImage>> {
        let needs_seek = match self.position {
            Some(position) => index < position || index > position + SEEK_THRESHOLD,
            None => true,
        };
        if needs_seek {
            self.seek_to(index)?;
        }

        loop {
            let Some(frame) = self.decode_next()? else {
                return Ok(None);
            };
            let current = match self.position {
                Some(position) => position,
                None => match self.frame_index(&frame) {
                    Some(current) if current <= index => current,
                    // Landed past the target or no timestamp to place the
                    // seek; decode from the start instead.
                    _ => {
                        self.rewind()?;
                        continue;
                    }
                },
            };
            self.position = Some(current + 1);

            if current == index {
                return self.to_rgb(&frame).map(Some);
            }
            if current > index {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::{codec, encoder, format, frame, Packet, Rational};

    const WIDTH: u32 = 128;
    const HEIGHT: u32 = 32;
    const FPS: i32 = 25;
    const FRAMES: u32 = 120;

    // Each frame carries its index as 8 black/white blocks of 16px, which
    // survive lossy encoding.
    fn paint(frame: &mut frame::Video, index: u32) {
        let stride = frame.stride(0);
        let luma = frame.data_mut(0);
        for row in 0..HEIGHT as usize {
            for col in 0..WIDTH as usize {
                let bit = (index >> (col / 16)) & 1;
                luma[row * stride + col] = if bit == 1 { 235 } else { 16 };
            }
        }
        for plane in 1..3 {
            let stride = frame.stride(plane);
            let chroma = frame.data_mut(plane);
            for row in 0..(HEIGHT / 2) as usize {
                chroma[row * stride..row * stride + (WIDTH / 2) as usize].fill(128);
            }
        }
    }

    fn decode_index(image: &RgbImage) -> u32 {
        (0..8)
            .filter(|bit| image.get_pixel(bit * 16 + 8, HEIGHT / 2)[0] > 128)
            .map(|bit| 1 << bit)
            .sum()
    }

    fn drain(
        encoder: &mut encoder::Video,
        output: &mut format::context::Output,
        stream_index: usize,
        time_base: Rational,
    ) {
        let mut packet = Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(stream_index);
            packet.rescale_ts(Rational(1, FPS), time_base);
            packet.write_interleaved(output).unwrap();
        }
    }

    fn write_clip(path: &Path) {
        init().unwrap();
        let mut output = format::output(&path).unwrap();
        let codec = encoder::find(codec::Id::MPEG4).unwrap();
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut stream = output.add_stream(codec).unwrap();
        let stream_index = stream.index();
        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .unwrap();
        video.set_width(WIDTH);
        video.set_height(HEIGHT);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(Rational(1, FPS));
        video.set_frame_rate(Some(Rational(FPS, 1)));
        video.set_gop(12);
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let mut encoder = video.open_as(codec).unwrap();
        stream.set_parameters(&encoder);
        stream.set_time_base(Rational(1, FPS));

        output.write_header().unwrap();
        let time_base = output.stream(stream_index).unwrap().time_base();

        for index in 0..FRAMES {
            let mut frame = frame::Video::new(Pixel::YUV420P, WIDTH, HEIGHT);
            paint(&mut frame, index);
            frame.set_pts(Some(i64::from(index)));
            encoder.send_frame(&frame).unwrap();
            drain(&mut encoder, &mut output, stream_index, time_base);
        }
        encoder.send_eof().unwrap();
        drain(&mut encoder, &mut output, stream_index, time_base);
        output.write_trailer().unwrap();
    }

    #[test]
    fn test_seek_timestamp_includes_stream_start() {
        assert_eq!(seek_timestamp(50, 25.0, 0.0), 2_000_000);
        assert_eq!(seek_timestamp(50, 25.0, -0.08), 1_920_000);
        assert_eq!(seek_timestamp(50, 25.0, 1.5), 3_500_000);
    }

    #[test]
    fn test_read_frames_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        write_clip(&path);

        let mut stream = FfmpegBackend::new().unwrap().open(&path).unwrap();
        let info = stream.info();
        assert_eq!((info.width, info.height), (WIDTH, HEIGHT));
        assert_eq!(info.total_frames, u64::from(FRAMES));

        // Forward steps, a jump past the seek threshold, backward seeks,
        // and the last frame.
        for index in [0, 5, 6, 90, 91, 30, 2, 100, 60, 119] {
            let image = stream.read_frame(index).unwrap().unwrap();
            assert_eq!(decode_index(&image), index as u32, "frame {}", index);
        }
        assert!(stream.read_frame(u64::from(FRAMES) + 10).unwrap().is_none());
    }

    #[test]
    fn test_extract_batch_with_ffmpeg_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        write_clip(&path);

        let extractor = crate::frame_extractor::FrameExtractor::ffmpeg().unwrap();
        let frames = extractor.extract_batch(&path, [120, 1, 61, 121]).unwrap();
        let decoded: Vec<(u32, Option<u32>)> = frames
            .iter()
            .map(|(&frame, image)| (frame, image.as_ref().map(decode_index)))
            .collect();
        assert_eq!(
            decoded,
            vec![(1, Some(0)), (61, Some(60)), (120, Some(119)), (121, None)]
        );
    }
}
