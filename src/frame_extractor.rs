//! Random access to decoded video frames.
//!
//! Frame numbers are 1-indexed at this module's public API, matching the
//! annotation export. Decoders behind [`VideoStream`] use 0-indexed frames;
//! [`FrameExtractor::extract_batch`] is the only place that translates.

use image::RgbImage;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::Result;

/// Basic properties of a video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: u64,
    /// Seconds
    pub duration: f64,
}

/// An open video handle. Dropping it releases the underlying decoder.
pub trait VideoStream {
    fn info(&self) -> VideoInfo;

    /// Decode the frame at 0-based `index`. `Ok(None)` means the decoder ran
    /// out of frames before reaching it.
    fn read_frame(&mut self, index: u64) -> Result<Option<RgbImage>>;
}

/// Opens video files for decoding.
pub trait VideoBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoStream>>;
}

pub struct FrameExtractor {
    backend: Box<dyn VideoBackend>,
}

impl FrameExtractor {
    pub fn new(backend: impl VideoBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Extractor backed by FFmpeg.
    #[cfg(feature = "ffmpeg")]
    pub fn ffmpeg() -> Result<Self> {
        Ok(Self::new(crate::ffmpeg::FfmpegBackend::new()?))
    }

    /// Decode every requested frame through a single handle, reading in
    /// ascending order. Each requested frame number maps to `None` when it is
    /// out of range or fails to decode; only failing to open the video is an
    /// error.
    pub fn extract_batch<I>(
        &self,
        video_path: &Path,
        frame_numbers: I,
    ) -> Result<BTreeMap<u32, Option<RgbImage>>>
    where
        I: IntoIterator<Item = u32>,
    {
        let requested: BTreeSet<u32> = frame_numbers.into_iter().collect();
        let mut frames = BTreeMap::new();
        if requested.is_empty() {
            return Ok(frames);
        }

        let mut stream = self.backend.open(video_path)?;
        let total_frames = stream.info().total_frames;
        let video_name = video_path.display();

        for frame_number in requested {
            if frame_number < 1 || u64::from(frame_number) > total_frames {
                warn!(
                    "Frame {} out of range for video {} (valid range: 1-{})",
                    frame_number, video_name, total_frames
                );
                frames.insert(frame_number, None);
                continue;
            }

            let frame = match stream.read_frame(u64::from(frame_number) - 1) {
                Ok(Some(frame)) => Some(frame),
                Ok(None) => {
                    warn!("Cannot read frame {} from {}", frame_number, video_name);
                    None
                }
                Err(e) => {
                    warn!(
                        "Error extracting frame {} from {}: {}",
                        frame_number, video_name, e
                    );
                    None
                }
            };
            frames.insert(frame_number, frame);
        }

        debug!(
            "Decoded {}/{} requested frames from {}",
            frames.values().filter(|f| f.is_some()).count(),
            frames.len(),
            video_name
        );
        Ok(frames)
    }

    /// Decode a single 1-indexed frame.
    pub fn extract_frame(&self, video_path: &Path, frame_number: u32) -> Result<Option<RgbImage>> {
        Ok(self
            .extract_batch(video_path, [frame_number])?
            .remove(&frame_number)
            .flatten())
    }

    pub fn video_info(&self, video_path: &Path) -> Result<VideoInfo> {
        Ok(self.backend.open(video_path)?.info())
    }
}
