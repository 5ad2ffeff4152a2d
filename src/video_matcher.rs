//! Resolve annotation video references to files on disk.
//!
//! Exported references look like `/data/upload/4/3b780495-20250514_ride.mp4`:
//! the upload path and hash prefix are added by the labeling tool, while the
//! local copy is usually named `20250514_ride.mp4`. Matching tries a series of
//! increasingly loose strategies and the first hit wins.

use jwalk::WalkDir;
use log::{debug, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{ConvertError, Result};
use crate::types::get_video_extensions_set;

// Stems at or below this length are too short for the cleaned-stem fallback
const MIN_FUZZY_STEM_LEN: usize = 10;

fn hash_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(.+)$").expect("valid regex"))
}

fn hex_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]+-").expect("valid regex"))
}

/// The strategy that resolved a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    ExactName,
    SuffixAfterHash,
    Substring,
    CleanedStem,
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    name: String,
    stem: String,
}

impl Candidate {
    fn new(path: PathBuf) -> Self {
        let name = file_name(&path);
        let stem = file_stem(&path);
        Self { path, name, stem }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// Substring containment in either direction, ignoring empty strings
fn overlaps(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// Matches annotation video references against the videos of one directory.
#[derive(Debug, Clone)]
pub struct VideoMatcher {
    candidates: Vec<Candidate>,
}

impl VideoMatcher {
    /// Scan `video_dir` recursively for video files.
    pub fn new(video_dir: &Path) -> Result<Self> {
        if !video_dir.is_dir() {
            return Err(ConvertError::MissingDirectory {
                path: video_dir.to_path_buf(),
            });
        }

        let extensions = get_video_extensions_set();
        let paths: Vec<PathBuf> = WalkDir::new(video_dir)
            .sort(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
                    .unwrap_or(false)
            })
            .collect();

        debug!(
            "Found {} video files under {}",
            paths.len(),
            video_dir.display()
        );
        Ok(Self::from_paths(paths))
    }

    /// Build a matcher over an explicit list of candidate files.
    pub fn from_paths<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            candidates: paths.into_iter().map(Candidate::new).collect(),
        }
    }

    pub fn video_files(&self) -> impl Iterator<Item = &Path> {
        self.candidates.iter().map(|c| c.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Resolve a reference to a local video, or `None` when every strategy fails.
    pub fn resolve(&self, reference: &str, prefer_exact: bool) -> Option<PathBuf> {
        self.resolve_with_strategy(reference, prefer_exact)
            .map(|(path, _)| path)
    }

    /// Like [`resolve`](Self::resolve), also reporting which strategy matched.
    pub fn resolve_with_strategy(
        &self,
        reference: &str,
        prefer_exact: bool,
    ) -> Option<(PathBuf, MatchStrategy)> {
        let ref_name = file_name(Path::new(reference));

        // Exact name is always tried first; `prefer_exact` only records intent.
        if let Some(c) = self.candidates.iter().find(|c| c.name == ref_name) {
            return Some((c.path.clone(), MatchStrategy::ExactName));
        }
        if prefer_exact {
            debug!(
                "No exact match for {}, falling back to fuzzy strategies",
                ref_name
            );
        }

        let rest = hash_suffix_regex()
            .captures(&ref_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());

        if let Some(rest) = rest {
            if let Some(c) = self.candidates.iter().find(|c| c.name == rest) {
                return Some((c.path.clone(), MatchStrategy::SuffixAfterHash));
            }

            let rest_stem = file_stem(Path::new(rest));
            if let Some(c) = self
                .candidates
                .iter()
                .find(|c| overlaps(&rest_stem, &c.stem))
            {
                return Some((c.path.clone(), MatchStrategy::Substring));
            }
        }

        let ref_stem = file_stem(Path::new(&ref_name));
        if ref_stem.chars().count() > MIN_FUZZY_STEM_LEN {
            let cleaned = hex_prefix_regex().replace(&ref_stem, "");
            if let Some(c) = self
                .candidates
                .iter()
                .find(|c| overlaps(&cleaned, &c.stem))
            {
                return Some((c.path.clone(), MatchStrategy::CleanedStem));
            }
        }

        let available: Vec<&str> = self.candidates.iter().map(|c| c.name.as_str()).collect();
        warn!(
            "No match found for: {} (tried exact name, suffix after hash, substring, cleaned stem). Available video files: {:?}",
            reference, available
        );
        None
    }
}
