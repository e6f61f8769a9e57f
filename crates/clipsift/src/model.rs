//! Collaborator interfaces for detection backends.

use clipsift_types::{Detection, RawFrame};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Device memory or similar capacity ran out. Never retried.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    Failed(String),
}

/// One model family: frame preparation on pool threads, inference on the
/// driver thread.
pub trait DetectionModel: Send + Sync + 'static {
    type Tensor: Send + 'static;

    /// Must be free of shared mutable state; called concurrently.
    fn prepare(&self, frames: &[RawFrame]) -> Result<Self::Tensor, ModelError>;

    /// Returns one detection list per input frame, in input order.
    fn infer(
        &self,
        frames: &[RawFrame],
        tensor: Self::Tensor,
    ) -> Result<Vec<Vec<Detection>>, ModelError>;

    fn release_device_memory(&self) {}
}
