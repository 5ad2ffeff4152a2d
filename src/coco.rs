//! COCO format data structures and utilities
//!
//! This module converts per-frame keyframe boxes into a single COCO object
//! detection file. Boxes only: segmentation is always empty.

use chrono::Datelike;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Format;
use crate::conversion::DatasetConverter;
use crate::error::Result;
use crate::types::{BoxAnnotation, ClassMapping};
use crate::utils::create_output_directory;

/// COCO dataset information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub description: String,
    pub version: String,
    pub year: i32,
    pub contributor: String,
    pub date_created: String,
}

impl Default for Info {
    fn default() -> Self {
        let now = chrono::Utc::now();
        Self {
            description: "Video annotation dataset converted from keyframe exports".to_string(),
            version: "1.0".to_string(),
            year: now.year(),
            contributor: "video2dataset".to_string(),
            date_created: now.to_rfc3339(),
        }
    }
}

/// COCO license information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: u32,
    pub name: String,
    pub url: String,
}

impl Default for License {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Unknown".to_string(),
            url: String::new(),
        }
    }
}

/// COCO category information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

/// COCO image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub file_name: String,
    pub license: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_captured: Option<String>,
}

impl Image {
    pub fn new(id: u32, file_name: String, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            file_name,
            license: 1,
            date_captured: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// COCO annotation information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    pub bbox: [f64; 4], // [x, y, width, height]
    pub area: f64,
    pub segmentation: Vec<Vec<f64>>,
    pub iscrowd: u32,
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoFile {
    pub info: Info,
    pub licenses: Vec<License>,
    pub categories: Vec<Category>,
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
}

impl Default for CocoFile {
    fn default() -> Self {
        Self {
            info: Info::default(),
            licenses: vec![License::default()],
            categories: Vec::new(),
            images: Vec::new(),
            annotations: Vec::new(),
        }
    }
}

/// Convert a percentage box to pixel `[x, y, width, height]` that never
/// leaves the image canvas. Width and height are clamped against the already
/// clamped origin and are at least one pixel.
pub fn convert_box(
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    img_width: u32,
    img_height: u32,
) -> [f64; 4] {
    let img_w = img_width as f64;
    let img_h = img_height as f64;

    let x_px = (x / 100.0 * img_w).min(img_w - 1.0).max(0.0);
    let y_px = (y / 100.0 * img_h).min(img_h - 1.0).max(0.0);
    let w_px = (width / 100.0 * img_w).min(img_w - x_px).max(1.0);
    let h_px = (height / 100.0 * img_h).min(img_h - y_px).max(1.0);

    [x_px, y_px, w_px, h_px]
}

/// Accumulates images and annotations for the whole run and writes
/// `annotations.json` on finalize. Image and annotation ids start at 1.
pub struct CocoConverter {
    output_dir: PathBuf,
    images_dir: PathBuf,
    coco: CocoFile,
    next_image_id: u32,
    next_annotation_id: u32,
}

impl CocoConverter {
    /// Create `images/` under `output_dir` and one category per class.
    pub fn new(class_mapping: &ClassMapping, output_dir: &Path) -> Result<Self> {
        let images_dir = create_output_directory(&output_dir.join("images"))?;
        let categories = class_mapping
            .sorted_by_id()
            .into_iter()
            .map(|(name, id)| Category {
                id,
                name: name.to_string(),
                supercategory: "object".to_string(),
            })
            .collect();

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            images_dir,
            coco: CocoFile {
                categories,
                ..CocoFile::default()
            },
            next_image_id: 1,
            next_annotation_id: 1,
        })
    }

    pub fn coco_file(&self) -> &CocoFile {
        &self.coco
    }

    /// Add one image entry and an annotation per box; returns the image id.
    pub fn add_image_with_annotations(
        &mut self,
        file_name: String,
        width: u32,
        height: u32,
        annotations: &[BoxAnnotation],
    ) -> u32 {
        let image_id = self.next_image_id;
        self.next_image_id += 1;
        self.coco
            .images
            .push(Image::new(image_id, file_name, width, height));

        for annotation in annotations {
            let bbox = convert_box(
                annotation.x,
                annotation.y,
                annotation.width,
                annotation.height,
                width,
                height,
            );
            self.coco.annotations.push(Annotation {
                id: self.next_annotation_id,
                image_id,
                category_id: annotation.class_id,
                bbox,
                area: bbox[2] * bbox[3],
                segmentation: Vec::new(),
                iscrowd: 0,
            });
            self.next_annotation_id += 1;
        }

        image_id
    }

    pub fn save_coco_file(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.coco)?;
        writer.flush()?;
        info!(
            "COCO file saved with {} images and {} annotations: {}",
            self.coco.images.len(),
            self.coco.annotations.len(),
            path.display()
        );
        Ok(())
    }
}

impl DatasetConverter for CocoConverter {
    fn format(&self) -> Format {
        Format::Coco
    }

    fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    fn add_frame(
        &mut self,
        frame_stem: &str,
        width: u32,
        height: u32,
        annotations: &[BoxAnnotation],
    ) -> Result<usize> {
        self.add_image_with_annotations(format!("{}.jpg", frame_stem), width, height, annotations);
        Ok(annotations.len())
    }

    fn finalize(&mut self) -> Result<()> {
        self.save_coco_file(&self.output_dir.join("annotations.json"))
    }
}
