use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use video2dataset::{AnnotationProcessor, Args, FrameExtractor, Result};

#[cfg(feature = "ffmpeg")]
fn frame_extractor() -> Result<FrameExtractor> {
    FrameExtractor::ffmpeg()
}

#[cfg(not(feature = "ffmpeg"))]
fn frame_extractor() -> Result<FrameExtractor> {
    Err(video2dataset::ConvertError::video(
        std::path::PathBuf::new(),
        "built without the `ffmpeg` feature; no video decoder available",
    ))
}

fn run(args: &Args) -> Result<()> {
    args.validate_paths()?;
    let class_mapping = args.class_mapping()?;

    let processor = AnnotationProcessor::new(
        &args.annotations_file(),
        &args.video_dir(),
        class_mapping,
        frame_extractor()?,
        args.processor_options(),
    )?;

    info!("Starting annotation processing...");
    processor.convert(&args.output, args.format)?;
    info!(
        "{:?} dataset created successfully at {}",
        args.format,
        args.output.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error during processing: {}", e);
            ExitCode::FAILURE
        }
    }
}
