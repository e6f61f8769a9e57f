use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clipsift::cli::{CliArgs, parse_cli};
use clipsift::export::{ExportSummary, Overlay, SegmentExporter};
use clipsift::process::{input_configuration, inspect_input};
use clipsift::progress::{percent_bar, percent_reporter};
use clipsift::ranges::{plan_ranges, total_frames};
use clipsift::settings::{ConfigError, EffectiveSettings, resolve_settings};
use clipsift::{DetectionLog, PipelineError};
use clipsift_decoder::{Backend, Configuration};
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to read detections from {path}: {source}")]
    DetectionsIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse detections from {path}: {source}")]
    DetectionsParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("missing required argument: {0}")]
    Missing(&'static str),
    #[error("video frame rate is unknown")]
    UnknownFrameRate,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (cli, sources) = parse_cli();
    if cli.list_backends {
        print_available_backends();
        return ExitCode::SUCCESS;
    }

    let result = resolve_settings(&cli, &sources)
        .map_err(AppError::from)
        .and_then(|settings| run(&cli, &settings));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &CliArgs, settings: &EffectiveSettings) -> Result<(), AppError> {
    if let Some(path) = &settings.config_path {
        log::debug!("using config file {}", path.display());
    }
    let input = cli.input.as_deref().ok_or(AppError::Missing("INPUT"))?;
    let detections_path = cli
        .detections
        .as_deref()
        .ok_or(AppError::Missing("--detections"))?;
    let output = cli.output.as_deref().ok_or(AppError::Missing("--output"))?;

    let decoder = input_configuration(input, settings.backend.as_deref())?;
    let metadata = inspect_input(&decoder)?;
    let fps = metadata.fps.ok_or(AppError::UnknownFrameRate)?;
    let detections = read_detections(detections_path)?.filtered(settings.min_confidence);
    let video_length = metadata
        .calculate_total_frames()
        .or_else(|| detections.frame_indices.last().map(|last| last + 1))
        .unwrap_or(detections.predictions.len() as u64);

    let ranges = plan_ranges(
        &detections.frames_with_detections,
        &settings.ranges,
        fps,
        video_length,
    );
    if ranges.is_empty() {
        log::info!("no detections in {}; nothing to export", input.display());
        return Ok(());
    }
    log::info!(
        "exporting {} ranges ({} of {} frames) to {}",
        ranges.len(),
        total_frames(&ranges),
        video_length,
        output.display()
    );

    let exporter = SegmentExporter::new(settings.export.clone());
    let overlay = settings.annotation.as_ref().map(|annotator| Overlay {
        detections: &detections,
        annotator,
    });
    let bar = percent_bar("export");
    let summary = exporter.export(input, output, &ranges, overlay, percent_reporter(&bar));
    bar.finish_and_clear();
    let ExportSummary {
        ranges,
        frames_written,
    } = summary?;
    log::info!("wrote {frames_written} frames from {ranges} ranges");
    Ok(())
}

fn read_detections(path: &Path) -> Result<DetectionLog, AppError> {
    let contents = fs::read_to_string(path).map_err(|source| AppError::DetectionsIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| AppError::DetectionsParse {
        path: path.to_path_buf(),
        source,
    })
}

fn print_available_backends() {
    let names: Vec<&str> = Configuration::available_backends()
        .iter()
        .map(Backend::as_str)
        .collect();
    if names.is_empty() {
        println!("no backends compiled");
    } else {
        println!("available backends: {}", names.join(", "));
    }
}
