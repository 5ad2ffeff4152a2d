//! YOLO dataset output: one label file per frame with normalized
//! center-based boxes, plus `classes.txt` and `data.yaml`.

use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Format;
use crate::conversion::DatasetConverter;
use crate::error::Result;
use crate::types::{BoxAnnotation, ClassMapping};
use crate::utils::create_output_directory;

/// Convert a percentage top-left box into YOLO's normalized
/// `(center_x, center_y, width, height)`, each clamped to `[0, 1]`.
pub fn convert_box(x: f64, y: f64, width: f64, height: f64) -> (f64, f64, f64, f64) {
    let x_norm = x / 100.0;
    let y_norm = y / 100.0;
    let width_norm = width / 100.0;
    let height_norm = height / 100.0;

    let center_x = x_norm + width_norm / 2.0;
    let center_y = y_norm + height_norm / 2.0;

    (
        center_x.clamp(0.0, 1.0),
        center_y.clamp(0.0, 1.0),
        width_norm.clamp(0.0, 1.0),
        height_norm.clamp(0.0, 1.0),
    )
}

/// Render one `class_id cx cy w h` line per box, in arrival order.
pub fn convert_to_yolo_format(annotations: &[BoxAnnotation]) -> String {
    annotations
        .iter()
        .map(|a| {
            let (center_x, center_y, width, height) = convert_box(a.x, a.y, a.width, a.height);
            format!(
                "{} {:.6} {:.6} {:.6} {:.6}",
                a.class_id, center_x, center_y, width, height
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct YoloConverter {
    class_mapping: ClassMapping,
    output_dir: PathBuf,
    images_dir: PathBuf,
    labels_dir: PathBuf,
}

impl YoloConverter {
    /// Create `images/` and `labels/` under `output_dir`.
    pub fn new(class_mapping: ClassMapping, output_dir: &Path) -> Result<Self> {
        let images_dir = create_output_directory(&output_dir.join("images"))?;
        let labels_dir = create_output_directory(&output_dir.join("labels"))?;
        Ok(Self {
            class_mapping,
            output_dir: output_dir.to_path_buf(),
            images_dir,
            labels_dir,
        })
    }

    pub fn labels_dir(&self) -> &Path {
        &self.labels_dir
    }

    /// Class names, one per line, ordered by class id.
    pub fn create_classes_file(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(self.class_mapping.names_by_id().join("\n").as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Dataset descriptor for YOLO training. The data is not split, so
    /// train/val/test all point at the same image directory.
    pub fn create_dataset_yaml(&self, path: &Path) -> Result<()> {
        let names = self.class_mapping.names_by_id();
        let mut yaml_content = String::from("path: .\ntrain: images\nval: images\ntest: images\n\n");
        yaml_content.push_str(&format!("nc: {}\n", names.len()));
        yaml_content.push_str("names:\n");
        for name in &names {
            // JSON strings are valid YAML scalars
            yaml_content.push_str(&format!("  - {}\n", serde_json::to_string(name)?));
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(yaml_content.as_bytes())?;
        writer.flush()?;

        info!("YAML config saved: {}", path.display());
        info!("   - Classes: {}", names.len());
        info!("   - Names: {}", names.join(", "));
        Ok(())
    }
}

impl DatasetConverter for YoloConverter {
    fn format(&self) -> Format {
        Format::Yolo
    }

    fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    fn add_frame(
        &mut self,
        frame_stem: &str,
        _width: u32,
        _height: u32,
        annotations: &[BoxAnnotation],
    ) -> Result<usize> {
        let label_path = self.labels_dir.join(format!("{}.txt", frame_stem));
        let mut writer = BufWriter::new(File::create(&label_path)?);
        writer.write_all(convert_to_yolo_format(annotations).as_bytes())?;
        writer.flush()?;
        Ok(annotations.len())
    }

    fn finalize(&mut self) -> Result<()> {
        self.create_classes_file(&self.output_dir.join("classes.txt"))?;
        self.create_dataset_yaml(&self.output_dir.join("data.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(class_id: u32, x: f64, y: f64, width: f64, height: f64) -> BoxAnnotation {
        BoxAnnotation {
            class_id,
            class_name: format!("class{}", class_id),
            x,
            y,
            width,
            height,
            frame: 100,
            time: 4.0,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    #[test]
    fn test_convert_box() {
        let (cx, cy, w, h) = convert_box(10.0, 20.0, 30.0, 40.0);
        assert_close(cx, 0.25);
        assert_close(cy, 0.40);
        assert_close(w, 0.30);
        assert_close(h, 0.40);
    }

    #[test]
    fn test_convert_box_clamps_each_value() {
        let (cx, cy, w, h) = convert_box(95.0, -10.0, 20.0, 120.0);
        assert_close(cx, 1.0);
        assert_close(cy, 0.5);
        assert_close(w, 0.2);
        assert_close(h, 1.0);
    }

    #[test]
    fn test_convert_to_yolo_format() {
        let annotations = vec![
            annotation(0, 10.0, 20.0, 30.0, 40.0),
            annotation(2, 50.0, 60.0, 25.0, 35.0),
        ];
        assert_eq!(
            convert_to_yolo_format(&annotations),
            "0 0.250000 0.400000 0.300000 0.400000\n2 0.625000 0.775000 0.250000 0.350000"
        );
        assert_eq!(convert_to_yolo_format(&[]), "");
    }

    #[test]
    fn test_classes_and_yaml_ordered_by_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mapping =
            ClassMapping::new([("scooter-roller", 2), ("cyclist", 0), ("person", 1)]).unwrap();
        let mut converter = YoloConverter::new(mapping, temp_dir.path()).unwrap();
        converter.finalize().unwrap();

        let classes = std::fs::read_to_string(temp_dir.path().join("classes.txt")).unwrap();
        assert_eq!(classes, "cyclist\nperson\nscooter-roller");

        let yaml = std::fs::read_to_string(temp_dir.path().join("data.yaml")).unwrap();
        assert!(yaml.contains("path: .\n"));
        assert!(yaml.contains("train: images\n"));
        assert!(yaml.contains("val: images\n"));
        assert!(yaml.contains("test: images\n"));
        assert!(yaml.contains("nc: 3\n"));
        assert!(yaml.contains("names:\n  - \"cyclist\"\n  - \"person\"\n  - \"scooter-roller\"\n"));
    }
}
