//! Writing frame ranges of a source video into a single output file.

pub mod cursor;
#[cfg(feature = "backend-ffmpeg")]
mod ffmpeg;

use std::path::Path;

pub use cursor::{CursorStep, SegmentCursor};

use clipsift_types::FrameRange;

use crate::annotate::Annotator;
use crate::driver::DetectionLog;
use crate::error::{PipelineError, PipelineResult};

/// Microseconds per second, the unit of container-level seeks.
pub const SEEK_TIME_BASE: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Constant rate factor passed to encoders that understand it.
    pub crf: Option<u32>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { crf: Some(23) }
    }
}

/// Detections to draw on exported frames, looked up by frame index.
#[derive(Clone, Copy)]
pub struct Overlay<'a> {
    pub detections: &'a DetectionLog,
    pub annotator: &'a dyn Annotator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub ranges: usize,
    pub frames_written: u64,
}

/// Seeks, decodes and re-encodes the requested ranges in order.
pub struct SegmentExporter {
    config: ExportConfig,
}

impl SegmentExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Writes every frame of `ranges` from `input` to `output`.
    /// An empty range list produces a valid container with no frames.
    /// Inverted ranges are rejected before the input is opened.
    pub fn export<F>(
        &self,
        input: &Path,
        output: &Path,
        ranges: &[FrameRange],
        overlay: Option<Overlay<'_>>,
        progress: F,
    ) -> PipelineResult<ExportSummary>
    where
        F: FnMut(u8),
    {
        validate_ranges(ranges)?;

        #[cfg(feature = "backend-ffmpeg")]
        {
            ffmpeg::export(&self.config, input, output, ranges, overlay, progress)
        }
        #[cfg(not(feature = "backend-ffmpeg"))]
        {
            let _ = (input, output, ranges, overlay, progress);
            Err(PipelineError::Decoder(
                clipsift_types::FrameError::unsupported("ffmpeg"),
            ))
        }
    }
}

fn validate_ranges(ranges: &[FrameRange]) -> PipelineResult<()> {
    match ranges.iter().position(|range| !range.is_valid()) {
        Some(range_index) => Err(PipelineError::InvalidRange {
            range_index,
            start: ranges[range_index].start,
            end: ranges[range_index].end,
        }),
        None => Ok(()),
    }
}

/// Seek position in microseconds for `frame` at `fps_num / fps_den` frames
/// per second, truncated toward zero.
pub fn frame_to_timestamp(frame: u64, fps_num: i32, fps_den: i32) -> i64 {
    if fps_num <= 0 || fps_den <= 0 {
        return 0;
    }
    let micros = i128::from(frame) * i128::from(SEEK_TIME_BASE) * i128::from(fps_den)
        / i128::from(fps_num);
    i64::try_from(micros).unwrap_or(i64::MAX)
}

/// Frame index of a timestamp expressed in `tb_num / tb_den` seconds,
/// truncated. Negative timestamps map to frame 0.
pub fn timestamp_to_frame(pts: i64, tb_num: i32, tb_den: i32, fps_num: i32, fps_den: i32) -> u64 {
    if pts <= 0 || tb_num <= 0 || tb_den <= 0 || fps_num <= 0 || fps_den <= 0 {
        return 0;
    }
    let numerator = i128::from(pts) * i128::from(tb_num) * i128::from(fps_num);
    let denominator = i128::from(tb_den) * i128::from(fps_den);
    u64::try_from(numerator / denominator).unwrap_or(u64::MAX)
}
