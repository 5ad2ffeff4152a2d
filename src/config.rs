use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::error::{ConvertError, Result};
use crate::types::ClassMapping;

/// Frames decoded per extraction batch unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Command-line arguments for converting keyframe video annotations to a
/// YOLO or COCO dataset.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Output format: 'yolo' or 'coco'
    #[arg(short = 'f', long = "format", value_enum, default_value = "yolo")]
    pub format: Format,

    /// Class mappings as a JSON object, e.g. '{"cyclist":0,"person":1}'
    #[arg(short = 'c', long = "classes")]
    pub classes: String,

    /// Directory where the dataset will be written
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Project directory holding json_file/annotations.json and video_files/
    #[arg(short = 'p', long = "project", default_value = ".")]
    pub project: PathBuf,

    /// Annotation export file (default: <project>/json_file/annotations.json)
    #[arg(long = "annotations")]
    pub annotations: Option<PathBuf>,

    /// Directory containing the source videos (default: <project>/video_files)
    #[arg(long = "videos")]
    pub videos: Option<PathBuf>,

    /// Prefer exact file name matches when resolving videos
    #[arg(long = "exact-match")]
    pub exact_match: bool,

    /// Number of frames decoded per batch
    #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = validate_batch_size)]
    pub batch_size: usize,
}

impl Args {
    pub fn annotations_file(&self) -> PathBuf {
        self.annotations
            .clone()
            .unwrap_or_else(|| self.project.join("json_file").join("annotations.json"))
    }

    pub fn video_dir(&self) -> PathBuf {
        self.videos
            .clone()
            .unwrap_or_else(|| self.project.join("video_files"))
    }

    pub fn class_mapping(&self) -> Result<ClassMapping> {
        ClassMapping::from_json(&self.classes)
    }

    pub fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            prefer_exact: self.exact_match,
            batch_size: self.batch_size,
        }
    }

    /// Check input paths before any processing starts.
    pub fn validate_paths(&self) -> Result<()> {
        let annotations = self.annotations_file();
        if !annotations.is_file() {
            return Err(ConvertError::AnnotationLoad {
                source: format!("annotations file not found at {}", annotations.display()).into(),
                path: annotations,
            });
        }
        let videos = self.video_dir();
        if !videos.is_dir() {
            return Err(ConvertError::MissingDirectory { path: videos });
        }
        Ok(())
    }
}

// Output dataset encoding
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum Format {
    Yolo,
    Coco,
}

/// Knobs for one conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub prefer_exact: bool,
    pub batch_size: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            prefer_exact: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// Batches must hold at least one frame
fn validate_batch_size(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(val) if val >= 1 => Ok(val),
        _ => Err("BATCH_SIZE must be a positive integer".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_size() {
        assert_eq!(validate_batch_size("500"), Ok(500));
        assert_eq!(validate_batch_size("1"), Ok(1));
        assert!(validate_batch_size("0").is_err());
        assert!(validate_batch_size("-3").is_err());
        assert!(validate_batch_size("abc").is_err());
    }

    #[test]
    fn test_default_paths() {
        let args = Args::parse_from([
            "video2dataset",
            "--classes",
            r#"{"cyclist":0}"#,
            "--output",
            "out",
            "--project",
            "/work",
        ]);
        assert_eq!(args.format, Format::Yolo);
        assert_eq!(
            args.annotations_file(),
            PathBuf::from("/work/json_file/annotations.json")
        );
        assert_eq!(args.video_dir(), PathBuf::from("/work/video_files"));
        assert_eq!(args.processor_options(), ProcessorOptions::default());
        assert_eq!(args.class_mapping().unwrap().get("cyclist"), Some(0));
    }

    #[test]
    fn test_explicit_paths_and_format() {
        let args = Args::parse_from([
            "video2dataset",
            "-f",
            "coco",
            "-c",
            "{}",
            "-o",
            "out",
            "--annotations",
            "/a/export.json",
            "--videos",
            "/v",
            "--exact-match",
            "--batch-size",
            "64",
        ]);
        assert_eq!(args.format, Format::Coco);
        assert_eq!(args.annotations_file(), PathBuf::from("/a/export.json"));
        assert_eq!(args.video_dir(), PathBuf::from("/v"));
        assert_eq!(
            args.processor_options(),
            ProcessorOptions {
                prefer_exact: true,
                batch_size: 64
            }
        );
    }

    #[test]
    fn test_validate_paths() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project = temp_dir.path().to_str().unwrap().to_string();
        let args = Args::parse_from(["video2dataset", "-c", "{}", "-o", "out", "-p", &project]);
        assert!(matches!(
            args.validate_paths(),
            Err(ConvertError::AnnotationLoad { .. })
        ));

        std::fs::create_dir_all(temp_dir.path().join("json_file")).unwrap();
        std::fs::write(temp_dir.path().join("json_file/annotations.json"), "[]").unwrap();
        assert!(matches!(
            args.validate_paths(),
            Err(ConvertError::MissingDirectory { .. })
        ));

        std::fs::create_dir_all(temp_dir.path().join("video_files")).unwrap();
        assert!(args.validate_paths().is_ok());
    }
}
