use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::error::{ConvertError, Result};

// Supported video container extensions
pub const VIDEO_FORMATS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv"];

// Precomputed HashSet of video extensions for fast lookup
pub static VIDEO_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the video extensions set
pub fn get_video_extensions_set() -> &'static HashSet<String> {
    VIDEO_EXTENSIONS_SET.get_or_init(|| VIDEO_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// One explicit bounding-box sample of a track. Geometry is in percent of the
/// frame size, `frame` is 1-indexed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Keyframe {
    #[serde(default)]
    pub frame: Option<u32>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl Keyframe {
    /// Frame number of a visible detection, or `None` for disabled
    /// interpolation control points and frameless entries.
    pub fn visible_frame(&self) -> Option<u32> {
        if self.enabled == Some(false) {
            return None;
        }
        self.frame
    }
}

// A single-class track of keyframes within one video
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoxTrack {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub frames_count: u64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub sequence: Vec<Keyframe>,
}

impl BoxTrack {
    /// The track's class; exports carry a single label per box.
    pub fn class_name(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }
}

// One exported task: a video reference and all its tracks
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub video: String,
    #[serde(rename = "box", default)]
    pub tracks: Vec<BoxTrack>,
}

impl AnnotationRecord {
    /// `framesCount` of the record, taken from its first track.
    pub fn frames_count(&self) -> u64 {
        self.tracks.first().map_or(0, |t| t.frames_count)
    }

    /// `duration` of the record, taken from its first track.
    pub fn duration(&self) -> f64 {
        self.tracks.first().map_or(0.0, |t| t.duration)
    }
}

/// Bijective mapping from class name to class id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassMapping {
    ids: BTreeMap<String, u32>,
}

impl ClassMapping {
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut ids = BTreeMap::new();
        let mut seen = HashSet::new();
        for (name, id) in entries {
            let name = name.into();
            if !seen.insert(id) {
                return Err(ConvertError::InvalidClassMapping(format!(
                    "class id {} is assigned to more than one class",
                    id
                )));
            }
            if ids.insert(name.clone(), id).is_some() {
                return Err(ConvertError::InvalidClassMapping(format!(
                    "class '{}' is listed more than once",
                    name
                )));
            }
        }
        Ok(Self { ids })
    }

    /// Parse a mapping given as a JSON object, e.g. `{"cyclist":0,"person":1}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let entries = deserialize_class_entries(&mut deserializer)
            .and_then(|entries| deserializer.end().map(|()| entries))
            .map_err(|e| {
                ConvertError::InvalidClassMapping(format!(
                    "expected a JSON object of class name to non-negative integer: {}",
                    e
                ))
            })?;
        Self::new(entries)
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(name, id)` pairs ordered by ascending id.
    pub fn sorted_by_id(&self) -> Vec<(&str, u32)> {
        let mut sorted: Vec<_> = self.ids.iter().map(|(n, &id)| (n.as_str(), id)).collect();
        sorted.sort_by_key(|&(_, id)| id);
        sorted
    }

    /// Class names ordered by ascending id.
    pub fn names_by_id(&self) -> Vec<&str> {
        self.sorted_by_id().into_iter().map(|(name, _)| name).collect()
    }
}

/// Read a JSON object as `(name, id)` pairs in document order, keeping
/// repeated keys so [`ClassMapping::new`] can reject them.
fn deserialize_class_entries<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ClassEntriesVisitor;

    impl<'de> Visitor<'de> for ClassEntriesVisitor {
        type Value = Vec<(String, u32)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of class name to class id")
        }

        fn visit_map<V>(self, mut map: V) -> std::result::Result<Self::Value, V::Error>
        where
            V: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, u32>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(ClassEntriesVisitor)
}

/// A bounding box active on one frame, ready for a converter.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxAnnotation {
    pub class_id: u32,
    pub class_name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub frame: u32,
    pub time: f64,
}

/// Frame number to every box active on that frame, in track order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnnotationIndex {
    frames: BTreeMap<u32, Vec<BoxAnnotation>>,
}

impl FrameAnnotationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, annotation: BoxAnnotation) {
        self.frames
            .entry(annotation.frame)
            .or_default()
            .push(annotation);
    }

    pub fn get(&self, frame: u32) -> Option<&[BoxAnnotation]> {
        self.frames.get(&frame).map(Vec::as_slice)
    }

    /// Frame numbers in ascending order.
    pub fn frames(&self) -> Vec<u32> {
        self.frames.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn box_count(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    /// Ascending frame numbers split into chunks of at most `batch_size`.
    pub fn batches(&self, batch_size: usize) -> Vec<Vec<u32>> {
        self.frames()
            .chunks(batch_size.max(1))
            .map(<[u32]>::to_vec)
            .collect()
    }
}

// A matched video together with the frames it contributes
#[derive(Debug, Clone)]
pub struct VideoWork {
    pub video_file: PathBuf,
    pub index: FrameAnnotationIndex,
    pub frames_count: u64,
    pub duration: f64,
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    pub records_total: usize,
    pub videos_matched: usize,
    pub videos_unmatched: usize,
    pub videos_failed: usize,
    pub videos_duplicate: usize,
    pub frames_requested: usize,
    pub frames_written: usize,
    pub frames_skipped: usize,
    pub boxes_written: usize,
    pub cancelled: bool,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_summary(&self) {
        log::info!("=== Processing Summary ===");
        log::info!("Annotation records: {}", self.records_total);
        log::info!("Videos matched: {}", self.videos_matched);
        log::info!("Frames requested: {}", self.frames_requested);
        log::info!("Frames written: {}", self.frames_written);
        log::info!("Boxes written: {}", self.boxes_written);

        let skipped = self.videos_unmatched + self.videos_failed + self.videos_duplicate;
        if skipped > 0 {
            log::warn!(
                "Skipped videos: {} (no matching file: {}, unreadable: {}, duplicate name: {})",
                skipped,
                self.videos_unmatched,
                self.videos_failed,
                self.videos_duplicate
            );
        }
        if self.frames_skipped > 0 {
            log::warn!("Skipped frames (out of range or undecodable): {}", self.frames_skipped);
        }
        if self.cancelled {
            log::warn!("Run was cancelled before all batches completed");
        }
    }
}
