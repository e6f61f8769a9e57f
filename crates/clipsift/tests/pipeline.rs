mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clipsift::pipeline::{FailureSlot, FrameSource, SourceOptions};
use clipsift::{BatchPipeline, PipelineConfig, PipelineError, StopFlag};
use clipsift_decoder::{DynFrameReader, FrameError, FrameResult, MockOptions, MockReader};
use common::{MockModel, mock_config, shared};

fn config(batch_size: usize, queue_capacity: usize, workers: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        queue_capacity,
        workers,
        max_frames: None,
        poll_interval: Duration::from_millis(5),
    }
}

fn drain(pipeline: &mut BatchPipeline<MockModel>) -> Vec<(u64, Vec<u64>)> {
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut batches = Vec::new();
    while !pipeline.is_done() {
        assert!(Instant::now() < deadline, "pipeline did not finish");
        if let Some(batch) = pipeline.next_batch(Duration::from_millis(50)).unwrap() {
            batches.push((batch.sequence_index, batch.tensor));
        }
    }
    batches
}

#[test]
fn batches_arrive_in_order_despite_worker_jitter() {
    let model = MockModel {
        max_prepare_delay: Some(Duration::from_millis(3)),
        ..MockModel::default()
    };
    let mut pipeline = BatchPipeline::open(
        &mock_config(MockOptions::with_frames(203)),
        config(4, 2, 4),
        shared(model),
        &StopFlag::new(),
    )
    .unwrap();
    assert_eq!(pipeline.workers(), 4);
    assert_eq!(pipeline.total_frames(), Some(203));

    let batches = drain(&mut pipeline);
    assert_eq!(batches.len(), 51);
    for (expected, (sequence, _)) in batches.iter().enumerate() {
        assert_eq!(*sequence, expected as u64);
    }
    let frames: Vec<u64> = batches.into_iter().flat_map(|(_, tensor)| tensor).collect();
    assert_eq!(frames, (0..203).collect::<Vec<_>>());
}

#[test]
fn loader_blocks_when_nobody_consumes() {
    let reads = Arc::new(AtomicU64::new(0));
    let mut options = MockOptions::with_frames(10_000);
    options.read_counter = Some(Arc::clone(&reads));
    let stop = StopFlag::new();
    let source_options = SourceOptions {
        batch_size: 4,
        queue_capacity: 2,
        max_frames: None,
        poll_interval: Duration::from_millis(5),
    };
    let mut source = FrameSource::open(
        &mock_config(options),
        source_options,
        stop.clone(),
        FailureSlot::default(),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(200));
    let settled = reads.load(Ordering::SeqCst);
    assert!(settled <= 12, "loader read {settled} frames past the bound");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(reads.load(Ordering::SeqCst), settled);
    assert!(!source.is_completed());

    stop.stop();
    source.join();
    assert!(source.has_exited());
}

#[test]
fn empty_input_is_done_immediately() {
    let pipeline = BatchPipeline::open(
        &mock_config(MockOptions::with_frames(0)),
        config(8, 4, 2),
        shared(MockModel::default()),
        &StopFlag::new(),
    )
    .unwrap();
    assert!(pipeline.is_done());
}

#[test]
fn max_frames_caps_the_pass() {
    let mut pipeline_config = config(4, 2, 2);
    pipeline_config.max_frames = Some(10);
    let mut pipeline = BatchPipeline::open(
        &mock_config(MockOptions::with_frames(100)),
        pipeline_config,
        shared(MockModel::default()),
        &StopFlag::new(),
    )
    .unwrap();
    assert_eq!(pipeline.total_frames(), Some(10));

    let frames: Vec<u64> = drain(&mut pipeline)
        .into_iter()
        .flat_map(|(_, tensor)| tensor)
        .collect();
    assert_eq!(frames, (0..10).collect::<Vec<_>>());
}

#[test]
fn skipped_frames_keep_their_slot() {
    let mut options = MockOptions::with_frames(12);
    options.unreadable = [2, 5].into_iter().collect();
    let mut pipeline = BatchPipeline::open(
        &mock_config(options),
        config(4, 2, 2),
        shared(MockModel::default()),
        &StopFlag::new(),
    )
    .unwrap();

    let frames: Vec<u64> = drain(&mut pipeline)
        .into_iter()
        .flat_map(|(_, tensor)| tensor)
        .collect();
    assert_eq!(frames, vec![0, 1, 3, 4, 6, 7, 8, 9, 10, 11]);
    assert_eq!(pipeline.skipped_frames(), 2);
}

#[test]
fn open_failure_is_cannot_open() {
    let result = BatchPipeline::with_reader(
        "missing.mp4",
        || Err(FrameError::configuration("no such file")),
        config(4, 2, 2),
        shared(MockModel::default()),
        &StopFlag::new(),
    );
    match result {
        Err(PipelineError::CannotOpen { path, .. }) => assert_eq!(path, "missing.mp4"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected the open to fail"),
    }
}

#[test]
fn close_is_idempotent_and_releases_once() {
    let model = shared(MockModel::default());
    let mut pipeline = BatchPipeline::with_reader(
        "mock",
        || -> FrameResult<DynFrameReader> {
            Ok(Box::new(MockReader::new(MockOptions::with_frames(1_000))))
        },
        config(4, 2, 3),
        Arc::clone(&model),
        &StopFlag::new(),
    )
    .unwrap();
    let _ = pipeline.next_batch(Duration::from_millis(100)).unwrap();

    pipeline.close();
    pipeline.close();
    assert_eq!(model.released(), 1);
    drop(pipeline);
    assert_eq!(model.released(), 1);
}

#[test]
fn dropping_an_unfinished_pipeline_joins_threads() {
    let model = shared(MockModel::default());
    let pipeline = BatchPipeline::open(
        &mock_config(MockOptions::with_frames(50_000)),
        config(8, 2, 2),
        Arc::clone(&model),
        &StopFlag::new(),
    )
    .unwrap();
    thread::sleep(Duration::from_millis(20));
    drop(pipeline);
    assert_eq!(model.released(), 1);
    assert_eq!(Arc::strong_count(&model), 1);
}

#[test]
fn closing_does_not_raise_the_callers_flag() {
    let cancel = StopFlag::new();
    let mut pipeline = BatchPipeline::open(
        &mock_config(MockOptions::with_frames(64)),
        config(4, 2, 2),
        shared(MockModel::default()),
        &cancel,
    )
    .unwrap();
    pipeline.close();
    assert!(!cancel.is_stopped());
}
