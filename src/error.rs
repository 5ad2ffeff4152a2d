//! Error types for the annotation-to-dataset pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a conversion run, or a single video within it.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The annotation document is missing, unreadable, or not valid JSON
    #[error("Error loading annotations from {path:?}: {source}")]
    AnnotationLoad {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Class names referenced by the annotations but absent from the mapping
    #[error("Missing class mappings for: {}", .missing.join(", "))]
    MissingClassMappings { missing: Vec<String> },

    /// The caller-supplied class mapping is malformed
    #[error("Invalid class mapping: {0}")]
    InvalidClassMapping(String),

    /// A required input directory does not exist
    #[error("Directory not found: {path:?}")]
    MissingDirectory { path: PathBuf },

    /// A video could not be opened or probed
    #[error("Video error ({path:?}): {message}")]
    Video { path: PathBuf, message: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvertError {
    pub fn video(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ConvertError::Video {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
