use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::ordered::OrderedQueue;
use super::{Batch, FailureSlot, PreparedBatch};
use crate::cancel::StopFlag;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::model::DetectionModel;

/// Default pool size: half the logical cores, at least one.
pub fn default_workers() -> usize {
    (num_cpus::get() / 2).max(1)
}

/// Fixed set of threads turning raw batches into model input.
pub struct PreprocessWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

struct WorkerContext<M: DetectionModel> {
    model: Arc<M>,
    input: Receiver<Batch>,
    output: Arc<OrderedQueue<PreparedBatch<M::Tensor>>>,
    stop: StopFlag,
    failure: FailureSlot,
    poll_interval: Duration,
}

impl PreprocessWorkerPool {
    pub fn spawn<M: DetectionModel>(
        workers: usize,
        model: Arc<M>,
        input: Receiver<Batch>,
        output: Arc<OrderedQueue<PreparedBatch<M::Tensor>>>,
        stop: StopFlag,
        failure: FailureSlot,
        poll_interval: Duration,
    ) -> PipelineResult<Self> {
        let mut pool = Self {
            handles: Vec::with_capacity(workers.max(1)),
        };
        for id in 0..workers.max(1) {
            let context = WorkerContext {
                model: Arc::clone(&model),
                input: input.clone(),
                output: Arc::clone(&output),
                stop: stop.clone(),
                failure: failure.clone(),
                poll_interval,
            };
            let name = format!("clipsift-prep-{id}");
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(context));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    stop.stop();
                    pool.join();
                    return Err(PipelineError::thread(name, err.to_string()));
                }
            }
        }
        log::debug!("started {} preprocess workers", pool.handles.len());
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Joins every worker; returns how many panicked.
    pub fn join(&mut self) -> usize {
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            log::error!("{panicked} preprocess workers panicked");
        }
        panicked
    }
}

/// Records a failure if the worker unwinds mid-batch, since the missing
/// sequence index would otherwise stall the ordered queue forever.
struct PanicGuard<'a> {
    stop: &'a StopFlag,
    failure: &'a FailureSlot,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let name = thread::current().name().unwrap_or("worker").to_string();
            self.failure
                .record(PipelineError::thread(name, "panicked while preparing a batch"));
            self.stop.stop();
        }
    }
}

fn run_worker<M: DetectionModel>(context: WorkerContext<M>) {
    let _guard = PanicGuard {
        stop: &context.stop,
        failure: &context.failure,
    };
    loop {
        if context.stop.is_stopped() {
            break;
        }
        let batch = match context.input.recv_timeout(context.poll_interval) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let Batch {
            sequence_index,
            frames,
        } = batch;
        match context.model.prepare(&frames) {
            Ok(tensor) => {
                let prepared = PreparedBatch {
                    sequence_index,
                    tensor,
                    frames,
                };
                if !context.output.push(
                    sequence_index,
                    prepared,
                    &context.stop,
                    context.poll_interval,
                ) {
                    break;
                }
            }
            Err(err) => {
                let err = PipelineError::from_model(Stage::Prepare, err);
                log::error!("batch {sequence_index}: {err}");
                context.failure.record(err);
                context.stop.stop();
                break;
            }
        }
    }
}
