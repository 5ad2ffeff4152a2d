//! Keyframe video annotations to YOLO / COCO dataset converter
//!
//! This library turns sparse, keyframe-based video bounding-box exports into
//! dense per-frame object detection datasets: it matches annotation records to
//! local video files, extracts the referenced frames, and writes them with
//! labels in YOLO or COCO format.

pub mod coco;
pub mod config;
pub mod conversion;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame_extractor;
pub mod processor;
pub mod types;
pub mod utils;
pub mod video_matcher;
pub mod yolo;

// Re-export commonly used types and functions
pub use config::{Args, Format, ProcessorOptions, DEFAULT_BATCH_SIZE};
pub use conversion::DatasetConverter;
pub use error::{ConvertError, Result};
pub use frame_extractor::{FrameExtractor, VideoBackend, VideoInfo, VideoStream};
pub use processor::{build_frame_index, validate_class_mappings, AnnotationProcessor};
pub use types::{
    AnnotationRecord, BoxAnnotation, BoxTrack, ClassMapping, FrameAnnotationIndex, Keyframe,
    ProcessingStats, VideoWork,
};
pub use video_matcher::{MatchStrategy, VideoMatcher};

pub use coco::{CocoConverter, CocoFile};
pub use yolo::YoloConverter;
