//! Concurrent decode and preprocessing stages feeding the detection driver.
//!
//! A single loader thread groups decoded frames into [`Batch`]es on a bounded
//! channel, a fixed worker pool turns each into a [`PreparedBatch`], and an
//! [`OrderedQueue`] hands them back in sequence order.

mod batch;
pub mod ordered;
pub mod pool;
pub mod source;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clipsift_types::RawFrame;

pub use batch::BatchPipeline;
pub use ordered::OrderedQueue;
pub use pool::{PreprocessWorkerPool, default_workers};
pub use source::{FrameSource, SourceOptions};

use crate::error::PipelineError;

/// Frames decoded for one sequence index.
#[derive(Debug)]
pub struct Batch {
    pub sequence_index: u64,
    pub frames: Vec<RawFrame>,
}

/// A batch after the model's `prepare` step.
#[derive(Debug)]
pub struct PreparedBatch<T> {
    pub sequence_index: u64,
    pub tensor: T,
    pub frames: Vec<RawFrame>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_frames: Option<u64>,
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            queue_capacity: 4,
            workers: default_workers(),
            max_frames: None,
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl PipelineConfig {
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            batch_size: self.batch_size,
            queue_capacity: self.queue_capacity,
            max_frames: self.max_frames,
            poll_interval: self.poll_interval,
        }
    }
}

/// First error raised by any pipeline thread.
#[derive(Debug, Clone, Default)]
pub struct FailureSlot(Arc<Mutex<Option<PipelineError>>>);

impl FailureSlot {
    pub fn record(&self, err: PipelineError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take(&self) -> Option<PipelineError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
