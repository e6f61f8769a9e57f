pub mod annotate;
pub mod cancel;
pub mod cli;
pub mod driver;
pub mod error;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod ranges;
pub mod settings;

pub use annotate::{Annotator, BoxAnnotator};
pub use cancel::StopFlag;
pub use driver::{DetectionDriver, DetectionLog, DetectionReport, DriverConfig, RunState};
pub use error::{PipelineError, PipelineResult, Stage};
pub use export::{ExportConfig, ExportSummary, Overlay, SegmentExporter};
pub use model::{DetectionModel, ModelError};
pub use pipeline::{BatchPipeline, PipelineConfig, PreparedBatch};
pub use process::{Phase, ProcessConfig, ProcessOutcome, process_folder, process_video};
pub use ranges::{
    RangeSettings, add_buffer_and_merge, frames_to_ranges, plan_ranges, seconds_to_frames,
};

pub use clipsift_types::{BoundingBox, Detection, FrameRange, RawFrame, VideoMetadata};
