use std::time::{Duration, Instant};

use clipsift_types::Detection;
use serde::{Deserialize, Serialize};

use crate::cancel::StopFlag;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::model::DetectionModel;
use crate::pipeline::{BatchPipeline, PreparedBatch};
use crate::progress::percent;

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub poll_timeout: Duration,
    /// Consecutive empty polls before warning that decoding lags inference.
    pub stall_warning_polls: u32,
    /// Detections below this confidence are discarded.
    pub min_confidence: f32,
    /// Keep at most this many detections per frame, highest confidence first.
    pub max_detections: Option<usize>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            stall_warning_polls: 50,
            min_confidence: 0.0,
            max_detections: Some(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub state: RunState,
    /// Frames with at least one kept detection, ascending.
    pub frames_with_detections: Vec<u64>,
    /// One entry per processed frame, in processing order.
    pub predictions_per_frame: Vec<Vec<Detection>>,
    /// Frame index of each entry in `predictions_per_frame`.
    pub frame_indices: Vec<u64>,
    pub processed_frames: u64,
    pub expected_frames: Option<u64>,
    pub skipped_frames: u64,
    pub average_fps: Option<f64>,
}

impl DetectionReport {
    pub fn into_log(self) -> DetectionLog {
        DetectionLog {
            frames_with_detections: self.frames_with_detections,
            predictions: self.predictions_per_frame,
            frame_indices: self.frame_indices,
        }
    }
}

/// Serialized form of a detection pass, consumed by range building and
/// annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionLog {
    pub frames_with_detections: Vec<u64>,
    pub predictions: Vec<Vec<Detection>>,
    /// Empty when `predictions[i]` belongs to frame `i`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frame_indices: Vec<u64>,
}

impl DetectionLog {
    pub fn detections_for(&self, frame_index: u64) -> Option<&[Detection]> {
        let position = if self.frame_indices.is_empty() {
            usize::try_from(frame_index).ok()?
        } else {
            self.frame_indices.binary_search(&frame_index).ok()?
        };
        self.predictions.get(position).map(Vec::as_slice)
    }

    /// Recomputes `frames_with_detections` keeping only detections at or
    /// above `min_confidence`.
    pub fn filtered(mut self, min_confidence: f32) -> Self {
        for detections in &mut self.predictions {
            detections.retain(|detection| detection.confidence >= min_confidence);
        }
        let frames = self
            .predictions
            .iter()
            .enumerate()
            .filter(|(_, detections)| !detections.is_empty())
            .filter_map(|(position, _)| {
                if self.frame_indices.is_empty() {
                    Some(position as u64)
                } else {
                    self.frame_indices.get(position).copied()
                }
            })
            .collect();
        self.frames_with_detections = frames;
        self
    }
}

pub struct DetectionDriver {
    config: DriverConfig,
    state: RunState,
}

impl DetectionDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Pulls every batch from `pipeline`, runs inference and records which
    /// frames had detections. Cancellation is checked once per batch.
    pub fn run<M, F>(
        &mut self,
        pipeline: &mut BatchPipeline<M>,
        model: &M,
        cancel: &StopFlag,
        mut progress: F,
    ) -> PipelineResult<DetectionReport>
    where
        M: DetectionModel,
        F: FnMut(u8),
    {
        self.state = RunState::Running;
        let expected = pipeline.total_frames();
        let mut frames_with_detections = Vec::new();
        let mut predictions_per_frame = Vec::new();
        let mut frame_indices = Vec::new();
        let mut processed: u64 = 0;
        let mut infer_time = Duration::ZERO;
        let mut empty_polls: u32 = 0;
        let started = Instant::now();

        let outcome = loop {
            if pipeline.is_done() {
                break Ok(RunState::Completed);
            }
            if cancel.is_stopped() {
                if let Some(err) = pipeline.take_failure() {
                    break Err(err);
                }
                break Ok(RunState::Cancelled);
            }

            let batch = match pipeline.next_batch(self.config.poll_timeout) {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    empty_polls += 1;
                    if empty_polls == self.config.stall_warning_polls {
                        log::warn!(
                            "no batch for {:?}; decoding is slower than inference",
                            self.config.poll_timeout * empty_polls
                        );
                    }
                    continue;
                }
                Err(err) => break Err(err),
            };
            empty_polls = 0;

            let PreparedBatch {
                sequence_index,
                tensor,
                frames,
            } = batch;
            let batch_started = Instant::now();
            let predictions = match model.infer(&frames, tensor) {
                Ok(predictions) => predictions,
                Err(err) => break Err(PipelineError::from_model(Stage::Infer, err)),
            };
            let elapsed = batch_started.elapsed();
            infer_time += elapsed;
            log::debug!(
                "batch {sequence_index}: {} frames in {:.1} ms ({:.1} fps)",
                frames.len(),
                elapsed.as_secs_f64() * 1000.0,
                fps(frames.len() as u64, elapsed).unwrap_or(0.0)
            );
            if predictions.len() != frames.len() {
                log::warn!(
                    "batch {sequence_index}: model returned {} results for {} frames",
                    predictions.len(),
                    frames.len()
                );
            }

            let mut predictions = predictions.into_iter();
            for (offset, frame) in frames.iter().enumerate() {
                let index = frame
                    .frame_index()
                    .unwrap_or(processed + offset as u64);
                let detections = self.keep(predictions.next().unwrap_or_default());
                if !detections.is_empty() {
                    frames_with_detections.push(index);
                }
                predictions_per_frame.push(detections);
                frame_indices.push(index);
            }
            processed += frames.len() as u64;

            if let Some(total) = expected.filter(|total| *total > 0) {
                progress(percent(processed, total));
            }
        };

        let state = match outcome {
            Ok(state) => state,
            Err(err) => {
                self.state = RunState::Failed;
                pipeline.request_stop();
                log::error!("detection failed after {processed} frames: {err}");
                return Err(err);
            }
        };
        self.state = state;
        progress(100);

        let skipped = pipeline.skipped_frames();
        if state == RunState::Completed {
            if let Some(total) = expected.filter(|total| *total != processed) {
                log::warn!(
                    "processed {processed} frames but {total} were expected ({skipped} skipped)"
                );
            }
        }
        let average_fps = fps(processed, infer_time);
        let verb = if state == RunState::Cancelled {
            "cancelled"
        } else {
            "completed"
        };
        log::info!(
            "detection {verb}: {processed} frames, {} with detections, \
             {:.1} fps average, {:.1?} elapsed",
            frames_with_detections.len(),
            average_fps.unwrap_or(0.0),
            started.elapsed()
        );

        Ok(DetectionReport {
            state,
            frames_with_detections,
            predictions_per_frame,
            frame_indices,
            processed_frames: processed,
            expected_frames: expected,
            skipped_frames: skipped,
            average_fps,
        })
    }

    fn keep(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        detections.retain(|detection| detection.confidence >= self.config.min_confidence);
        if let Some(limit) = self.config.max_detections {
            if detections.len() > limit {
                detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                detections.truncate(limit);
            }
        }
        detections
    }
}

fn fps(frames: u64, elapsed: Duration) -> Option<f64> {
    let seconds = elapsed.as_secs_f64();
    (frames > 0 && seconds > 0.0).then(|| frames as f64 / seconds)
}
