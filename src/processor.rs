//! The annotation-to-dataset pipeline.
//!
//! Loads the exported records, checks every class against the mapping,
//! matches each record to a local video, fans keyframes out into a per-frame
//! index, and streams the referenced frames through a [`DatasetConverter`] in
//! bounded batches.

use image::ImageFormat;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::coco::CocoConverter;
use crate::config::{Format, ProcessorOptions};
use crate::conversion::DatasetConverter;
use crate::error::{ConvertError, Result};
use crate::frame_extractor::FrameExtractor;
use crate::types::{
    AnnotationRecord, BoxAnnotation, ClassMapping, FrameAnnotationIndex, ProcessingStats,
    VideoWork,
};
use crate::utils::{
    create_output_directory, create_progress_bar, frame_file_stem, load_annotations,
    video_file_stem,
};
use crate::video_matcher::VideoMatcher;
use crate::yolo::YoloConverter;

/// Fail unless every label used by any track has a class id.
/// Returns the set of labels found.
pub fn validate_class_mappings(
    records: &[AnnotationRecord],
    class_mapping: &ClassMapping,
) -> Result<BTreeSet<String>> {
    let annotation_classes: BTreeSet<String> = records
        .iter()
        .flat_map(|record| record.tracks.iter())
        .flat_map(|track| track.labels.iter().cloned())
        .collect();

    let missing: Vec<String> = annotation_classes
        .iter()
        .filter(|name| !class_mapping.contains(name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ConvertError::MissingClassMappings { missing });
    }

    info!(
        "Validated class mappings for classes: {:?}",
        annotation_classes
    );
    Ok(annotation_classes)
}

/// Fan every visible keyframe of every track into a frame-keyed index.
/// Boxes on a frame keep the order their tracks appear in the record.
pub fn build_frame_index(
    record: &AnnotationRecord,
    class_mapping: &ClassMapping,
) -> FrameAnnotationIndex {
    let mut index = FrameAnnotationIndex::new();

    for track in &record.tracks {
        let Some(class_name) = track.class_name() else {
            warn!("Skipping unlabeled track in {}", record.video);
            continue;
        };
        let Some(class_id) = class_mapping.get(class_name) else {
            warn!("Skipping track with unmapped class '{}' in {}", class_name, record.video);
            continue;
        };

        for keyframe in &track.sequence {
            let Some(frame) = keyframe.visible_frame() else {
                continue;
            };
            index.push(BoxAnnotation {
                class_id,
                class_name: class_name.to_string(),
                x: keyframe.x,
                y: keyframe.y,
                width: keyframe.width,
                height: keyframe.height,
                frame,
                time: keyframe.time,
            });
        }
    }

    index
}

pub struct AnnotationProcessor {
    annotations: Vec<AnnotationRecord>,
    class_mapping: ClassMapping,
    video_matcher: VideoMatcher,
    frame_extractor: FrameExtractor,
    options: ProcessorOptions,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl AnnotationProcessor {
    /// Load and validate the annotation document, then index `video_dir`.
    /// Fails before touching the video directory or any output.
    pub fn new(
        annotations_file: &Path,
        video_dir: &Path,
        class_mapping: ClassMapping,
        frame_extractor: FrameExtractor,
        options: ProcessorOptions,
    ) -> Result<Self> {
        let annotations = load_annotations(annotations_file)?;
        info!(
            "Loaded {} annotation records from {}",
            annotations.len(),
            annotations_file.display()
        );
        validate_class_mappings(&annotations, &class_mapping)?;
        let video_matcher = VideoMatcher::new(video_dir)?;

        Ok(Self {
            annotations,
            class_mapping,
            video_matcher,
            frame_extractor,
            options,
            cancel_flag: None,
        })
    }

    /// Build a processor from already-loaded records.
    pub fn from_records(
        annotations: Vec<AnnotationRecord>,
        video_matcher: VideoMatcher,
        class_mapping: ClassMapping,
        frame_extractor: FrameExtractor,
        options: ProcessorOptions,
    ) -> Result<Self> {
        validate_class_mappings(&annotations, &class_mapping)?;
        Ok(Self {
            annotations,
            class_mapping,
            video_matcher,
            frame_extractor,
            options,
            cancel_flag: None,
        })
    }

    /// Stop the run at the next batch boundary once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn annotations(&self) -> &[AnnotationRecord] {
        &self.annotations
    }

    pub fn class_mapping(&self) -> &ClassMapping {
        &self.class_mapping
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Match every record to a video and build its frame index. Records
    /// without a matching video are skipped and counted in `stats`.
    pub fn process_annotations(&self, stats: &mut ProcessingStats) -> Vec<VideoWork> {
        let mut works = Vec::new();
        stats.records_total += self.annotations.len();

        for record in &self.annotations {
            let Some(video_file) = self
                .video_matcher
                .resolve(&record.video, self.options.prefer_exact)
            else {
                warn!("No matching video found for {}, skipping record", record.video);
                stats.videos_unmatched += 1;
                continue;
            };
            stats.videos_matched += 1;

            let index = build_frame_index(record, &self.class_mapping);
            info!(
                "Collected annotations for {} unique frames from {} (framesCount: {}, duration: {:.2}s)",
                index.len(),
                video_file.display(),
                record.frames_count(),
                record.duration()
            );

            works.push(VideoWork {
                video_file,
                index,
                frames_count: record.frames_count(),
                duration: record.duration(),
            });
        }

        works
    }

    /// Convert to `format` under `output_dir`.
    pub fn convert(&self, output_dir: &Path, format: Format) -> Result<ProcessingStats> {
        match format {
            Format::Yolo => self.convert_to_yolo(output_dir),
            Format::Coco => self.convert_to_coco(output_dir),
        }
    }

    pub fn convert_to_yolo(&self, output_dir: &Path) -> Result<ProcessingStats> {
        info!("Converting to YOLO format...");
        create_output_directory(output_dir)?;
        let mut converter = YoloConverter::new(self.class_mapping.clone(), output_dir)?;
        self.run(&mut converter)
    }

    pub fn convert_to_coco(&self, output_dir: &Path) -> Result<ProcessingStats> {
        info!("Converting to COCO format...");
        create_output_directory(output_dir)?;
        let mut converter = CocoConverter::new(&self.class_mapping, output_dir)?;
        self.run(&mut converter)
    }

    /// Drive every matched video through `converter` and finalize it.
    /// Frame files are named after the video stem, so only the first video
    /// with a given stem is written; later ones are skipped.
    pub fn run(&self, converter: &mut dyn DatasetConverter) -> Result<ProcessingStats> {
        let mut stats = ProcessingStats::new();
        let works = self.process_annotations(&mut stats);
        let mut written_stems = HashSet::new();

        for work in &works {
            let stem = video_file_stem(&work.video_file);
            if !written_stems.insert(stem.clone()) {
                warn!(
                    "Skipping {}: frames named after '{}' were already written by another video",
                    work.video_file.display(),
                    stem
                );
                stats.videos_duplicate += 1;
                continue;
            }
            self.process_video(work, converter, &mut stats)?;
            if stats.cancelled {
                break;
            }
        }

        converter.finalize()?;
        info!(
            "{:?} conversion complete! Processed {} frames total",
            converter.format(),
            stats.frames_written
        );
        stats.print_summary();
        Ok(stats)
    }

    fn process_video(
        &self,
        work: &VideoWork,
        converter: &mut dyn DatasetConverter,
        stats: &mut ProcessingStats,
    ) -> Result<()> {
        let video_file = &work.video_file;
        let video_name = video_file
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let frame_count = work.index.len();
        stats.frames_requested += frame_count;
        info!("Processing {} frames from {}...", frame_count, video_name);

        let batches = work.index.batches(self.options.batch_size);
        let pb = create_progress_bar(frame_count as u64, &video_name);
        let mut written = 0;
        let mut done = 0;

        for (batch_number, batch) in batches.iter().enumerate() {
            if self.is_cancelled() {
                warn!(
                    "Cancelled before batch {} of {}",
                    batch_number + 1,
                    video_name
                );
                stats.cancelled = true;
                break;
            }
            debug!(
                "Processing batch {}: frames {}-{} of {}",
                batch_number + 1,
                done + 1,
                done + batch.len(),
                frame_count
            );

            let mut extracted = match self
                .frame_extractor
                .extract_batch(video_file, batch.iter().copied())
            {
                Ok(extracted) => extracted,
                Err(e) => {
                    warn!("Skipping video {}: {}", video_file.display(), e);
                    stats.videos_failed += 1;
                    stats.frames_skipped += frame_count - done;
                    pb.abandon();
                    return Ok(());
                }
            };

            for &frame_number in batch {
                done += 1;
                pb.inc(1);
                let Some(frame_image) = extracted.remove(&frame_number).flatten() else {
                    debug!("Skipping frame {} of {}", frame_number, video_name);
                    stats.frames_skipped += 1;
                    continue;
                };
                let annotations = work.index.get(frame_number).unwrap_or_default();

                let frame_stem = frame_file_stem(video_file, frame_number);
                let image_path = converter.images_dir().join(format!("{}.jpg", frame_stem));
                frame_image.save_with_format(&image_path, ImageFormat::Jpeg)?;

                stats.boxes_written += converter.add_frame(
                    &frame_stem,
                    frame_image.width(),
                    frame_image.height(),
                    annotations,
                )?;
                stats.frames_written += 1;
                written += 1;
            }
        }

        pb.finish_and_clear();
        info!(
            "Successfully processed {}/{} frames from {}",
            written, frame_count, video_name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoxTrack, Keyframe};

    fn keyframe(frame: Option<u32>, x: f64, enabled: Option<bool>) -> Keyframe {
        Keyframe {
            frame,
            x,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            time: 0.0,
            enabled,
        }
    }

    fn track(label: &str, sequence: Vec<Keyframe>) -> BoxTrack {
        BoxTrack {
            labels: vec![label.to_string()],
            frames_count: 100,
            duration: 4.0,
            sequence,
        }
    }

    fn mapping() -> ClassMapping {
        ClassMapping::new([("cyclist", 0), ("person", 1)]).unwrap()
    }

    #[test]
    fn test_missing_class_mapping() {
        let records = vec![AnnotationRecord {
            video: "a.mp4".to_string(),
            tracks: vec![track("dog", vec![]), track("cat", vec![]), track("person", vec![])],
        }];
        match validate_class_mappings(&records, &mapping()) {
            Err(ConvertError::MissingClassMappings { missing }) => {
                assert_eq!(missing, vec!["cat".to_string(), "dog".to_string()])
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_build_frame_index() {
        let record = AnnotationRecord {
            video: "a.mp4".to_string(),
            tracks: vec![
                track(
                    "person",
                    vec![
                        keyframe(Some(1), 1.0, Some(true)),
                        keyframe(Some(2), 2.0, Some(false)),
                        keyframe(None, 3.0, None),
                        keyframe(Some(3), 4.0, None),
                    ],
                ),
                track("cyclist", vec![keyframe(Some(3), 5.0, None)]),
            ],
        };

        let index = build_frame_index(&record, &mapping());
        assert_eq!(index.frames(), vec![1, 3]);
        assert!(index.get(2).is_none());

        let frame3 = index.get(3).unwrap();
        assert_eq!(frame3.len(), 2);
        assert_eq!((frame3[0].class_id, frame3[0].x), (1, 4.0));
        assert_eq!((frame3[1].class_name.as_str(), frame3[1].x), ("cyclist", 5.0));
        assert_eq!(index.box_count(), 3);
    }
}
