//! One video, or a folder of them, from decoded frames to a trimmed output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use clipsift_decoder::{Backend, Configuration, FrameError, VideoMetadata};

use crate::annotate::BoxAnnotator;
use crate::cancel::StopFlag;
use crate::driver::{DetectionDriver, DriverConfig, RunState};
use crate::error::{PipelineError, PipelineResult};
use crate::export::{ExportConfig, ExportSummary, Overlay, SegmentExporter};
use crate::model::DetectionModel;
use crate::pipeline::{BatchPipeline, PipelineConfig};
use crate::ranges::{RangeSettings, plan_ranges, total_frames};

const OUTPUT_SUFFIX: &str = "_processed";
const VIDEO_EXTENSION: &str = "mp4";

/// Which half of a run a progress value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Detect,
    Export,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Backend and mock settings; the input path is filled in per video.
    pub decoder: Configuration,
    pub pipeline: PipelineConfig,
    pub driver: DriverConfig,
    pub ranges: RangeSettings,
    pub export: ExportConfig,
    pub annotation: Option<BoxAnnotator>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Exported {
        output: PathBuf,
        summary: ExportSummary,
    },
    /// Nothing was detected, so no output was written.
    NoDetections,
    Cancelled,
}

/// `<stem>_processed.mp4` next to `input`.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    input.with_file_name(format!("{stem}{OUTPUT_SUFFIX}.{VIDEO_EXTENSION}"))
}

/// Decoder settings for `input`: environment overrides first, then
/// `backend` when one is named.
pub fn input_configuration(input: &Path, backend: Option<&str>) -> PipelineResult<Configuration> {
    let mut config = Configuration::from_env()?;
    if let Some(name) = backend {
        config.backend = Backend::from_str(name)?;
    }
    config.input = Some(input.to_path_buf());
    Ok(config)
}

/// Container metadata of the configured input, read without decoding.
///
/// Fails with [`PipelineError::CannotOpen`] when the file is missing or the
/// backend cannot read files.
pub fn inspect_input(config: &Configuration) -> PipelineResult<VideoMetadata> {
    let path = config
        .input
        .as_deref()
        .ok_or_else(|| FrameError::configuration("no input path configured"))?;
    let label = path.display().to_string();
    if !path.is_file() {
        return Err(PipelineError::cannot_open(
            label,
            FrameError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such video file",
            )),
        ));
    }
    match config.backend {
        #[cfg(feature = "backend-ffmpeg")]
        Backend::Ffmpeg => clipsift_decoder::backends::ffmpeg::read_metadata(path)
            .map_err(|err| PipelineError::cannot_open(label, err)),
        #[cfg(not(feature = "backend-ffmpeg"))]
        Backend::Ffmpeg => Err(PipelineError::cannot_open(
            label,
            FrameError::unsupported("ffmpeg"),
        )),
        Backend::Mock => Err(PipelineError::cannot_open(
            label,
            FrameError::configuration("the mock backend does not read video files"),
        )),
    }
}

/// Detects on every frame of `input` and exports the ranges around the
/// detections to `output`, or to [`default_output_path`] when `None`.
pub fn process_video<M, F>(
    model: Arc<M>,
    input: &Path,
    output: Option<&Path>,
    config: &ProcessConfig,
    cancel: &StopFlag,
    mut progress: F,
) -> PipelineResult<ProcessOutcome>
where
    M: DetectionModel,
    F: FnMut(Phase, u8),
{
    let decoder = Configuration {
        input: Some(input.to_path_buf()),
        ..config.decoder.clone()
    };
    let mut pipeline =
        BatchPipeline::open(&decoder, config.pipeline, Arc::clone(&model), cancel)?;
    let metadata = pipeline.metadata();
    log::info!(
        "detecting in {} ({} workers, batch size {})",
        input.display(),
        pipeline.workers(),
        pipeline.batch_size()
    );

    let mut driver = DetectionDriver::new(config.driver);
    let report = driver.run(&mut pipeline, &model, cancel, |p| progress(Phase::Detect, p));
    pipeline.close();
    let report = report?;

    if report.state == RunState::Cancelled {
        log::info!("processing of {} cancelled", input.display());
        return Ok(ProcessOutcome::Cancelled);
    }
    if report.frames_with_detections.is_empty() {
        log::info!("no detections in {}; skipping export", input.display());
        return Ok(ProcessOutcome::NoDetections);
    }

    let fps = metadata.fps.unwrap_or_else(|| {
        log::warn!("{} has no frame rate; range buffers are ignored", input.display());
        0.0
    });
    let seen = report.frame_indices.last().map_or(0, |last| last + 1);
    let video_length = metadata.calculate_total_frames().unwrap_or(0).max(seen);
    let ranges = plan_ranges(&report.frames_with_detections, &config.ranges, fps, video_length);
    let output = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
    log::info!(
        "{} ranges ({} of {video_length} frames) selected for {}",
        ranges.len(),
        total_frames(&ranges),
        output.display()
    );

    let detections = report.into_log();
    let overlay = config.annotation.as_ref().map(|annotator| Overlay {
        detections: &detections,
        annotator,
    });
    let summary = SegmentExporter::new(config.export.clone()).export(
        input,
        &output,
        &ranges,
        overlay,
        |p| progress(Phase::Export, p),
    )?;
    Ok(ProcessOutcome::Exported { output, summary })
}

/// `.mp4` files directly inside `dir`, sorted, leaving out earlier outputs.
pub fn videos_in(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_video = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(VIDEO_EXTENSION));
        let is_output = path
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy().ends_with(OUTPUT_SUFFIX));
        if is_video && !is_output {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}

/// Runs [`process_video`] on each of [`videos_in`]`(dir)` with default
/// output paths. Stops at the first error or cancellation.
pub fn process_folder<M, F>(
    model: Arc<M>,
    dir: &Path,
    config: &ProcessConfig,
    cancel: &StopFlag,
    mut progress: F,
) -> PipelineResult<Vec<(PathBuf, ProcessOutcome)>>
where
    M: DetectionModel,
    F: FnMut(&Path, Phase, u8),
{
    let videos = videos_in(dir)?;
    log::info!("processing {} videos in {}", videos.len(), dir.display());
    let mut outcomes = Vec::with_capacity(videos.len());
    for video in videos {
        if cancel.is_stopped() {
            break;
        }
        let outcome = process_video(
            Arc::clone(&model),
            &video,
            None,
            config,
            cancel,
            |phase, p| progress(&video, phase, p),
        )?;
        let cancelled = outcome == ProcessOutcome::Cancelled;
        outcomes.push((video, outcome));
        if cancelled {
            break;
        }
    }
    Ok(outcomes)
}
