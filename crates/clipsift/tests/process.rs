mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clipsift::process::{ProcessConfig, ProcessOutcome, process_folder, process_video};
use clipsift::{DriverConfig, Phase, PipelineConfig, StopFlag};
use clipsift_decoder::MockOptions;
use common::{MockModel, mock_config, shared};

fn mock_process_config(frames: u64) -> ProcessConfig {
    ProcessConfig {
        decoder: mock_config(MockOptions::with_frames(frames)),
        pipeline: PipelineConfig {
            batch_size: 4,
            queue_capacity: 2,
            workers: 2,
            max_frames: None,
            poll_interval: Duration::from_millis(5),
        },
        driver: DriverConfig {
            poll_timeout: Duration::from_millis(20),
            ..DriverConfig::default()
        },
        ..ProcessConfig::default()
    }
}

#[test]
fn video_without_detections_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty_reef.mp4");
    fs::write(&input, b"").unwrap();
    let model = shared(MockModel::default());
    let mut phases = Vec::new();

    let outcome = process_video(
        Arc::clone(&model),
        &input,
        None,
        &mock_process_config(24),
        &StopFlag::new(),
        |phase, p| phases.push((phase, p)),
    )
    .unwrap();

    assert_eq!(outcome, ProcessOutcome::NoDetections);
    assert!(!dir.path().join("empty_reef_processed.mp4").exists());
    assert_eq!(phases.last(), Some(&(Phase::Detect, 100)));
    assert!(phases.iter().all(|(phase, _)| *phase == Phase::Detect));
    assert_eq!(model.released(), 1);
}

#[test]
fn cancelled_video_is_not_exported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("long.mp4");
    let model = shared(MockModel::with_hits(0..10_000));
    let cancel = StopFlag::new();
    let trigger = cancel.clone();

    let outcome = process_video(
        model,
        &input,
        None,
        &mock_process_config(10_000),
        &cancel,
        move |_, _| trigger.stop(),
    )
    .unwrap();

    assert_eq!(outcome, ProcessOutcome::Cancelled);
    assert!(!dir.path().join("long_processed.mp4").exists());
}

#[test]
fn export_failure_surfaces_after_detection() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.mp4");
    let output = dir.path().join("out.mp4");
    let model = shared(MockModel::with_hits([3, 4]));
    let mut phases = Vec::new();

    let result = process_video(
        Arc::clone(&model),
        &input,
        Some(&output),
        &mock_process_config(12),
        &StopFlag::new(),
        |phase, p| phases.push((phase, p)),
    );

    assert!(result.is_err());
    assert!(!output.exists());
    assert!(phases.contains(&(Phase::Detect, 100)));
    assert!(!phases.iter().any(|(phase, _)| *phase == Phase::Export));
    assert_eq!(model.released(), 1);
}

#[test]
fn folder_runs_every_video_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.mp4", "a.mp4", "a_processed.mp4", "readme.md"] {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    let model = shared(MockModel::default());
    let mut seen = Vec::new();

    let outcomes = process_folder(
        Arc::clone(&model),
        dir.path(),
        &mock_process_config(8),
        &StopFlag::new(),
        |path, _, p| {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if p == 100 && seen.last() != Some(&name) {
                seen.push(name);
            }
        },
    )
    .unwrap();

    let names: Vec<_> = outcomes
        .iter()
        .map(|(path, _)| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.mp4", "b.mp4"]);
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| *outcome == ProcessOutcome::NoDetections));
    assert_eq!(seen, vec!["a.mp4", "b.mp4"]);
    assert_eq!(model.released(), 2);
}

#[test]
fn cancelled_folder_stops_early() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "b.mp4"] {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    let cancel = StopFlag::new();
    cancel.stop();

    let outcomes = process_folder(
        shared(MockModel::default()),
        dir.path(),
        &mock_process_config(8),
        &cancel,
        |_, _, _| {},
    )
    .unwrap();
    assert!(outcomes.is_empty());
}
