use std::path::Path;

use crate::config::Format;
use crate::error::Result;
use crate::types::BoxAnnotation;

/// A dataset encoding that receives extracted frames one at a time.
///
/// The processor writes each frame image into [`images_dir`](Self::images_dir)
/// as `<frame_stem>.jpg` before handing the frame's annotations over.
pub trait DatasetConverter {
    fn format(&self) -> Format;

    fn images_dir(&self) -> &Path;

    /// Record every box of one frame; returns the number of boxes written.
    fn add_frame(
        &mut self,
        frame_stem: &str,
        width: u32,
        height: u32,
        annotations: &[BoxAnnotation],
    ) -> Result<usize>;

    /// Write the run-level files once every video has been processed.
    fn finalize(&mut self) -> Result<()>;
}
