use std::fmt;

use clipsift_types::FrameError;
use thiserror::Error;

use crate::model::ModelError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Infer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => f.write_str("prepare"),
            Stage::Infer => f.write_str("inference"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot open {path}: {source}")]
    CannotOpen {
        path: String,
        #[source]
        source: FrameError,
    },

    #[error("{stage} exhausted device resources: {message}")]
    ResourceExhausted { stage: Stage, message: String },

    #[error("{stage} failed: {message}")]
    Model { stage: Stage, message: String },

    #[error("decoder failed: {0}")]
    Decoder(#[from] FrameError),

    #[error("muxing failed{}: {message}", mux_position(.range_index, .frame_index))]
    MuxFailure {
        range_index: Option<usize>,
        frame_index: Option<u64>,
        message: String,
    },

    #[error("range {range_index} ends before it starts ({start}..={end})")]
    InvalidRange {
        range_index: usize,
        start: u64,
        end: u64,
    },

    #[error("{name} thread failed: {message}")]
    Thread { name: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn from_model(stage: Stage, err: ModelError) -> Self {
        match err {
            ModelError::ResourceExhausted(message) => Self::ResourceExhausted { stage, message },
            ModelError::Failed(message) => Self::Model { stage, message },
        }
    }

    pub fn cannot_open(path: impl Into<String>, source: FrameError) -> Self {
        Self::CannotOpen {
            path: path.into(),
            source,
        }
    }

    pub fn mux(
        range_index: Option<usize>,
        frame_index: Option<u64>,
        message: impl fmt::Display,
    ) -> Self {
        Self::MuxFailure {
            range_index,
            frame_index,
            message: message.to_string(),
        }
    }

    pub fn thread(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Thread {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

fn mux_position(range_index: &Option<usize>, frame_index: &Option<u64>) -> String {
    match (range_index, frame_index) {
        (Some(range), Some(frame)) => format!(" in range {range} at frame {frame}"),
        (Some(range), None) => format!(" in range {range}"),
        (None, Some(frame)) => format!(" at frame {frame}"),
        (None, None) => String::new(),
    }
}
