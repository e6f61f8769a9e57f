#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use clipsift::{BoundingBox, Detection, DetectionModel, ModelError, RawFrame};
use clipsift_decoder::{Backend, Configuration, MockOptions};
use rand::Rng;

/// Model whose tensor is the list of frame indices in the batch.
#[derive(Default)]
pub struct MockModel {
    /// Frames that produce one detection at confidence 0.9.
    pub hits: BTreeSet<u64>,
    /// Upper bound for a random sleep in `prepare`.
    pub max_prepare_delay: Option<Duration>,
    pub infer_delay: Duration,
    /// Batch whose `prepare` reports exhausted device memory.
    pub exhaust_prepare_at: Option<u64>,
    /// Batch whose `infer` reports exhausted device memory.
    pub exhaust_infer_at: Option<u64>,
    pub prepared: AtomicUsize,
    pub inferred: AtomicUsize,
    pub released: AtomicUsize,
}

impl MockModel {
    pub fn with_hits(hits: impl IntoIterator<Item = u64>) -> Self {
        Self {
            hits: hits.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl DetectionModel for MockModel {
    type Tensor = Vec<u64>;

    fn prepare(&self, frames: &[RawFrame]) -> Result<Self::Tensor, ModelError> {
        if let Some(max) = self.max_prepare_delay {
            let micros = rand::thread_rng().gen_range(0..=max.as_micros() as u64);
            thread::sleep(Duration::from_micros(micros));
        }
        let indices: Vec<u64> = frames.iter().filter_map(RawFrame::frame_index).collect();
        self.prepared.fetch_add(1, Ordering::SeqCst);
        if let Some(at) = self.exhaust_prepare_at {
            if indices.contains(&at) {
                return Err(ModelError::ResourceExhausted("prepare".into()));
            }
        }
        Ok(indices)
    }

    fn infer(
        &self,
        frames: &[RawFrame],
        tensor: Self::Tensor,
    ) -> Result<Vec<Vec<Detection>>, ModelError> {
        assert_eq!(frames.len(), tensor.len());
        if !self.infer_delay.is_zero() {
            thread::sleep(self.infer_delay);
        }
        self.inferred.fetch_add(1, Ordering::SeqCst);
        if let Some(at) = self.exhaust_infer_at {
            if tensor.contains(&at) {
                return Err(ModelError::ResourceExhausted("out of device memory".into()));
            }
        }
        Ok(tensor
            .iter()
            .map(|index| {
                if self.hits.contains(index) {
                    vec![Detection::new(
                        "fish",
                        0,
                        0.9,
                        BoundingBox::new(1.0, 1.0, 10.0, 10.0),
                    )]
                } else {
                    Vec::new()
                }
            })
            .collect())
    }

    fn release_device_memory(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn mock_config(options: MockOptions) -> Configuration {
    Configuration {
        backend: Backend::Mock,
        input: None,
        mock: options,
    }
}

pub fn shared(model: MockModel) -> Arc<MockModel> {
    Arc::new(model)
}
