use std::sync::Arc;
use std::time::Duration;

use clipsift_decoder::{Configuration, DynFrameReader, FrameResult, VideoMetadata};

use super::ordered::OrderedQueue;
use super::pool::PreprocessWorkerPool;
use super::source::FrameSource;
use super::{FailureSlot, PipelineConfig, PreparedBatch};
use crate::cancel::StopFlag;
use crate::error::{PipelineError, PipelineResult};
use crate::model::DetectionModel;

/// Owns one decode pass: the loader thread, the worker pool, and the ordered
/// hand-off between them.
///
/// Dropping the pipeline performs the same teardown as [`close`](Self::close).
pub struct BatchPipeline<M: DetectionModel> {
    model: Arc<M>,
    source: FrameSource,
    pool: PreprocessWorkerPool,
    queue: Arc<OrderedQueue<PreparedBatch<M::Tensor>>>,
    stop: StopFlag,
    failure: FailureSlot,
    delivered: u64,
    closed: bool,
}

impl<M: DetectionModel> BatchPipeline<M> {
    /// Opens the configured decoder. `cancel` is observed but never raised
    /// by the pipeline itself.
    pub fn open(
        decoder: &Configuration,
        config: PipelineConfig,
        model: Arc<M>,
        cancel: &StopFlag,
    ) -> PipelineResult<Self> {
        let stop = cancel.child();
        let failure = FailureSlot::default();
        let source = FrameSource::open(
            decoder,
            config.source_options(),
            stop.clone(),
            failure.clone(),
        )?;
        Self::start(source, config, model, stop, failure)
    }

    /// Like [`open`](Self::open) with a caller supplied reader factory, which
    /// runs on the loader thread.
    pub fn with_reader<F>(
        label: impl Into<String>,
        open: F,
        config: PipelineConfig,
        model: Arc<M>,
        cancel: &StopFlag,
    ) -> PipelineResult<Self>
    where
        F: FnOnce() -> FrameResult<DynFrameReader> + Send + 'static,
    {
        let stop = cancel.child();
        let failure = FailureSlot::default();
        let source = FrameSource::spawn(
            label,
            open,
            config.source_options(),
            stop.clone(),
            failure.clone(),
        )?;
        Self::start(source, config, model, stop, failure)
    }

    fn start(
        mut source: FrameSource,
        config: PipelineConfig,
        model: Arc<M>,
        stop: StopFlag,
        failure: FailureSlot,
    ) -> PipelineResult<Self> {
        let queue = Arc::new(OrderedQueue::new(config.queue_capacity));
        let pool = match PreprocessWorkerPool::spawn(
            config.workers,
            Arc::clone(&model),
            source.receiver(),
            Arc::clone(&queue),
            stop.clone(),
            failure.clone(),
            config.poll_interval,
        ) {
            Ok(pool) => pool,
            Err(err) => {
                stop.stop();
                source.join();
                model.release_device_memory();
                return Err(err);
            }
        };
        Ok(Self {
            model,
            source,
            pool,
            queue,
            stop,
            failure,
            delivered: 0,
            closed: false,
        })
    }

    /// Waits up to `timeout` for the next batch in sequence order.
    ///
    /// `Ok(None)` means nothing arrived in time, not end of stream; check
    /// [`is_done`](Self::is_done).
    pub fn next_batch(
        &mut self,
        timeout: Duration,
    ) -> PipelineResult<Option<PreparedBatch<M::Tensor>>> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        if let Some((_, batch)) = self.queue.pop_timeout(timeout) {
            self.delivered += 1;
            return Ok(Some(batch));
        }
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        if self.source.has_exited() && !self.source.is_completed() && !self.stop.is_stopped() {
            return Err(PipelineError::thread(
                "clipsift-loader",
                "exited before the input was exhausted",
            ));
        }
        Ok(None)
    }

    /// True once every batch has been handed out, judged by the declared
    /// frame total or, when frames were skipped, by what the loader produced.
    pub fn is_done(&self) -> bool {
        if self
            .source
            .declared_batches()
            .is_some_and(|total| self.delivered >= total)
        {
            return true;
        }
        self.source.is_completed() && self.delivered >= self.source.produced_batches()
    }

    pub fn take_failure(&self) -> Option<PipelineError> {
        self.failure.take()
    }

    /// Asks loader and workers to stop without waiting for them.
    pub fn request_stop(&self) {
        self.stop.stop();
    }

    pub fn metadata(&self) -> VideoMetadata {
        self.source.metadata()
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.source.total_frames()
    }

    pub fn batch_size(&self) -> usize {
        self.source.batch_size()
    }

    pub fn skipped_frames(&self) -> u64 {
        self.source.skipped_frames()
    }

    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    /// Stops and joins every thread, then releases model device memory.
    /// Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.stop();
        self.queue.close();
        self.source.join();
        self.pool.join();
        self.model.release_device_memory();
        log::debug!(
            "pipeline closed after {} batches ({} frames decoded, {} skipped)",
            self.delivered,
            self.source.decoded_frames(),
            self.source.skipped_frames()
        );
    }
}

impl<M: DetectionModel> Drop for BatchPipeline<M> {
    fn drop(&mut self) {
        self.close();
    }
}
