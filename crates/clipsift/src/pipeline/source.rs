use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clipsift_decoder::{
    Configuration, DynFrameReader, FrameResult, RawFrame, ReadOutcome, VideoMetadata,
};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use super::{Batch, FailureSlot};
use crate::cancel::StopFlag;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    pub batch_size: usize,
    /// Bound on batches waiting between the loader and the workers.
    pub queue_capacity: usize,
    /// Stop after this many frame slots (decoded or skipped).
    pub max_frames: Option<u64>,
    pub poll_interval: Duration,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            queue_capacity: 4,
            max_frames: None,
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl SourceOptions {
    fn normalized(self) -> Self {
        Self {
            batch_size: self.batch_size.max(1),
            queue_capacity: self.queue_capacity.max(1),
            ..self
        }
    }
}

#[derive(Debug, Default)]
struct SourceStatus {
    produced_batches: AtomicU64,
    decoded_frames: AtomicU64,
    skipped_frames: AtomicU64,
    completed: AtomicBool,
    exited: AtomicBool,
}

/// Marks the loader as exited even when it unwinds.
struct ExitGuard(Arc<SourceStatus>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.exited.store(true, Ordering::Release);
    }
}

/// Background decode loop that groups frames into batches.
pub struct FrameSource {
    receiver: Receiver<Batch>,
    handle: Option<JoinHandle<()>>,
    status: Arc<SourceStatus>,
    metadata: VideoMetadata,
    total_frames: Option<u64>,
    batch_size: usize,
}

impl FrameSource {
    /// Opens the configured backend on the loader thread.
    pub fn open(
        config: &Configuration,
        options: SourceOptions,
        stop: StopFlag,
        failure: FailureSlot,
    ) -> PipelineResult<Self> {
        let label = config
            .input
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| format!("<{}>", config.backend));
        let config = config.clone();
        Self::spawn(label, move || config.create_reader(), options, stop, failure)
    }

    /// Runs `open` on a fresh loader thread and waits until the reader is
    /// ready.
    pub fn spawn<F>(
        label: impl Into<String>,
        open: F,
        options: SourceOptions,
        stop: StopFlag,
        failure: FailureSlot,
    ) -> PipelineResult<Self>
    where
        F: FnOnce() -> FrameResult<DynFrameReader> + Send + 'static,
    {
        let label = label.into();
        let options = options.normalized();
        let (tx, rx) = crossbeam_channel::bounded(options.queue_capacity);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let status = Arc::new(SourceStatus::default());

        let thread_status = Arc::clone(&status);
        let handle = thread::Builder::new()
            .name("clipsift-loader".into())
            .spawn(move || {
                let _guard = ExitGuard(Arc::clone(&thread_status));
                let reader = match open() {
                    Ok(reader) => reader,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let metadata = reader.metadata();
                let total_frames = declared_frames(reader.total_frames(), options.max_frames);
                if ready_tx.send(Ok((metadata, total_frames))).is_err() {
                    return;
                }
                let loader = Loader {
                    reader,
                    tx,
                    options,
                    total_frames,
                    stop,
                    failure,
                    status: thread_status,
                };
                loader.run();
            })
            .map_err(|err| PipelineError::thread("clipsift-loader", err.to_string()))?;

        let (metadata, total_frames) = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(PipelineError::cannot_open(label, err));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(PipelineError::thread(
                    "clipsift-loader",
                    format!("exited before opening {label}"),
                ));
            }
        };
        log::debug!(
            "frame source opened {label}: {} frames declared, batch size {}",
            total_frames.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            options.batch_size
        );

        Ok(Self {
            receiver: rx,
            handle: Some(handle),
            status,
            metadata,
            total_frames,
            batch_size: options.batch_size,
        })
    }

    pub fn receiver(&self) -> Receiver<Batch> {
        self.receiver.clone()
    }

    pub fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batch count implied by the declared frame total.
    pub fn declared_batches(&self) -> Option<u64> {
        self.total_frames
            .map(|frames| frames.div_ceil(self.batch_size as u64))
    }

    pub fn produced_batches(&self) -> u64 {
        self.status.produced_batches.load(Ordering::Acquire)
    }

    pub fn decoded_frames(&self) -> u64 {
        self.status.decoded_frames.load(Ordering::Acquire)
    }

    pub fn skipped_frames(&self) -> u64 {
        self.status.skipped_frames.load(Ordering::Acquire)
    }

    /// True once the input was exhausted and the final batch emitted.
    pub fn is_completed(&self) -> bool {
        self.status.completed.load(Ordering::Acquire)
    }

    pub fn has_exited(&self) -> bool {
        self.status.exited.load(Ordering::Acquire)
    }

    /// Waits for the loader thread. The reader is dropped before it exits.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("frame loader thread panicked");
            }
        }
    }
}

fn declared_frames(reported: Option<u64>, max_frames: Option<u64>) -> Option<u64> {
    match (reported, max_frames) {
        (Some(total), Some(limit)) => Some(total.min(limit)),
        (Some(total), None) => Some(total),
        (None, limit) => limit,
    }
}

struct Loader {
    reader: DynFrameReader,
    tx: Sender<Batch>,
    options: SourceOptions,
    total_frames: Option<u64>,
    stop: StopFlag,
    failure: FailureSlot,
    status: Arc<SourceStatus>,
}

impl Loader {
    fn run(mut self) {
        let mut sequence_index = 0u64;
        let mut frames: Vec<RawFrame> = Vec::with_capacity(self.options.batch_size);
        let mut consumed = 0u64;

        loop {
            if self.stop.is_stopped() {
                log::debug!("frame source stopped after {sequence_index} batches");
                return;
            }
            if self.options.max_frames.is_some_and(|limit| consumed >= limit) {
                break;
            }
            let outcome = match self.reader.read_frame() {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::error!("frame source failed after {consumed} frames: {err}");
                    self.failure.record(PipelineError::Decoder(err));
                    return;
                }
            };
            match outcome {
                ReadOutcome::Frame(mut frame) => {
                    frame.set_frame_index(Some(consumed));
                    consumed += 1;
                    self.status.decoded_frames.fetch_add(1, Ordering::AcqRel);
                    frames.push(frame);
                }
                ReadOutcome::Unreadable { reason } => {
                    log::debug!("skipping unreadable frame {consumed}: {reason}");
                    consumed += 1;
                    self.status.skipped_frames.fetch_add(1, Ordering::AcqRel);
                    if self.total_frames.is_some_and(|total| consumed >= total) {
                        break;
                    }
                    continue;
                }
                ReadOutcome::EndOfStream => break,
            }

            if frames.len() >= self.options.batch_size {
                let batch = Batch {
                    sequence_index,
                    frames: std::mem::replace(
                        &mut frames,
                        Vec::with_capacity(self.options.batch_size),
                    ),
                };
                if !self.send(batch) {
                    return;
                }
                sequence_index += 1;
            }
        }

        if !frames.is_empty() {
            let batch = Batch {
                sequence_index,
                frames,
            };
            if !self.send(batch) {
                return;
            }
            sequence_index += 1;
        }

        let skipped = self.status.skipped_frames.load(Ordering::Acquire);
        if skipped > 0 {
            log::warn!("frame source skipped {skipped} unreadable frames");
        }
        log::debug!("frame source exhausted after {sequence_index} batches");
        self.status.completed.store(true, Ordering::Release);
    }

    /// Waits for queue space while re-checking the stop flag.
    fn send(&self, mut batch: Batch) -> bool {
        loop {
            match self.tx.send_timeout(batch, self.options.poll_interval) {
                Ok(()) => {
                    self.status.produced_batches.fetch_add(1, Ordering::AcqRel);
                    return true;
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.stop.is_stopped() {
                        return false;
                    }
                    batch = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}
