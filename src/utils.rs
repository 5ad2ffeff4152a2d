use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::types::AnnotationRecord;

/// Read the exported annotation document: a JSON array with one record per video.
/// The document is parsed straight from the file stream.
pub fn load_annotations(path: &Path) -> Result<Vec<AnnotationRecord>> {
    let file = fs::File::open(path).map_err(|e| ConvertError::AnnotationLoad {
        path: path.to_path_buf(),
        source: Box::new(e),
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|e| ConvertError::AnnotationLoad {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}

/// Sanitized file stem of a video, the part frame names are keyed on.
pub fn video_file_stem(video_path: &Path) -> String {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_filename::sanitize(stem)
}

/// Output name (without extension) for one frame of a video:
/// `frame_<video stem>_<frame:06>`.
pub fn frame_file_stem(video_path: &Path, frame_number: u32) -> String {
    format!("frame_{}_{:06}", video_file_stem(video_path), frame_number)
}

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Create an output directory if needed. Existing content is kept: runs only
/// ever add files.
pub fn create_output_directory(path: &Path) -> std::io::Result<PathBuf> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}
