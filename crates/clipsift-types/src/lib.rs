//! Shared domain models for the clipsift workspace.
//!
//! Decoder, pipeline, and export code all exchange these types. Keep this
//! crate backend-agnostic so every member can depend on it without pulling in
//! native libraries.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type FrameResult<T> = Result<T, FrameError>;

/// A decoded frame of tightly packed, interleaved 8-bit pixels.
#[derive(Clone)]
pub struct RawFrame {
    width: u32,
    height: u32,
    channels: u8,
    pts: Option<i64>,
    frame_index: Option<u64>,
    data: Vec<u8>,
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("pts", &self.pts)
            .field("frame_index", &self.frame_index)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl RawFrame {
    pub fn from_owned(
        width: u32,
        height: u32,
        channels: u8,
        pts: Option<i64>,
        data: Vec<u8>,
    ) -> FrameResult<Self> {
        if channels == 0 {
            return Err(FrameError::InvalidFrame {
                reason: "frame must have at least one channel".into(),
            });
        }
        let required = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(channels as usize))
            .ok_or_else(|| FrameError::InvalidFrame {
                reason: "calculated frame length overflowed".into(),
            })?;
        if data.len() != required {
            return Err(FrameError::InvalidFrame {
                reason: format!(
                    "frame byte count mismatch: got {} expected {}",
                    data.len(),
                    required
                ),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            pts,
            frame_index: None,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel access; the buffer length is fixed by the dimensions.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn frame_index(&self) -> Option<u64> {
        self.frame_index
    }

    pub fn with_frame_index(mut self, index: Option<u64>) -> Self {
        self.frame_index = index;
        self
    }

    pub fn set_frame_index(&mut self, index: Option<u64>) {
        self.frame_index = index;
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("backend {backend} is not supported in this build")]
    Unsupported { backend: &'static str },

    #[error("{backend} backend failed: {message}")]
    BackendFailure {
        backend: &'static str,
        message: String,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn unsupported(backend: &'static str) -> Self {
        Self::Unsupported { backend }
    }

    pub fn backend_failure(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendFailure {
            backend,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Axis-aligned box in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    /// Builds a box from two corners in any order.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            xmin: x0.min(x1),
            ymin: y0.min(y1),
            xmax: x0.max(x1),
            ymax: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(
        label: impl Into<String>,
        class_id: u32,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            label: label.into(),
            class_id,
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

/// Inclusive span of frame indices.
///
/// The fields are public, so code building ranges by hand can produce an
/// inverted one; [`FrameRange::is_valid`] tells them apart and
/// deserialization rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RangeBounds")]
pub struct FrameRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Deserialize)]
struct RangeBounds {
    start: u64,
    end: u64,
}

impl TryFrom<RangeBounds> for FrameRange {
    type Error = String;

    fn try_from(bounds: RangeBounds) -> Result<Self, Self::Error> {
        if bounds.end < bounds.start {
            return Err(format!(
                "range end {} is before its start {}",
                bounds.end, bounds.start
            ));
        }
        Ok(Self {
            start: bounds.start,
            end: bounds.end,
        })
    }
}

impl FrameRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn single(index: u64) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    /// Number of frames covered; zero for an inverted range.
    pub fn len(&self) -> u64 {
        if self.is_valid() {
            self.end - self.start + 1
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.is_valid()
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, index: u64) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoMetadata {
    pub duration: Option<Duration>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub total_frames: Option<u64>,
}

impl VideoMetadata {
    /// Falls back to duration times frame rate when the container does not
    /// report a frame count.
    pub fn calculate_total_frames(&self) -> Option<u64> {
        if let Some(total) = self.total_frames {
            return Some(total);
        }
        let duration = self.duration?;
        let fps = self.fps?;
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        let frames = (duration.as_secs_f64() * fps).round();
        if frames.is_finite() && frames > 0.0 {
            Some(frames as u64)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_rejects_short_buffers() {
        let err = RawFrame::from_owned(4, 2, 3, None, vec![0; 10]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrame { .. }));
    }

    #[test]
    fn raw_frame_keeps_index() {
        let frame = RawFrame::from_owned(2, 2, 3, Some(7), vec![1; 12])
            .unwrap()
            .with_frame_index(Some(3));
        assert_eq!(frame.frame_index(), Some(3));
        assert_eq!(frame.pts(), Some(7));
        assert_eq!(frame.data().len(), 12);
    }

    #[test]
    fn bounding_box_normalizes_corners() {
        let bbox = BoundingBox::new(10.0, 40.0, 2.0, 5.0);
        assert_eq!(bbox.xmin, 2.0);
        assert_eq!(bbox.ymin, 5.0);
        assert_eq!(bbox.xmax, 10.0);
        assert_eq!(bbox.ymax, 40.0);
    }

    #[test]
    fn frame_range_len_is_inclusive() {
        assert_eq!(FrameRange::new(5, 9).len(), 5);
        assert_eq!(FrameRange::single(20).len(), 1);
        assert_eq!(FrameRange::new(9, 5), FrameRange::new(5, 9));
    }

    #[test]
    fn inverted_range_is_invalid_and_empty() {
        let inverted = FrameRange { start: 10, end: 5 };
        assert!(!inverted.is_valid());
        assert_eq!(inverted.len(), 0);
        assert!(!inverted.contains(7));
        assert!(FrameRange::new(10, 5).is_valid());
    }

    #[test]
    fn deserializing_an_inverted_range_fails() {
        let range: FrameRange = serde_json::from_str(r#"{"start":3,"end":8}"#).unwrap();
        assert_eq!(range, FrameRange::new(3, 8));
        let err = serde_json::from_str::<FrameRange>(r#"{"start":8,"end":3}"#).unwrap_err();
        assert!(err.to_string().contains("before its start"));
    }

    #[test]
    fn total_frames_falls_back_to_duration() {
        let metadata = VideoMetadata {
            duration: Some(Duration::from_secs(10)),
            fps: Some(25.0),
            ..VideoMetadata::default()
        };
        assert_eq!(metadata.calculate_total_frames(), Some(250));
    }

    #[test]
    fn detection_serializes_with_bbox() {
        let detection = Detection::new("fish", 0, 0.87, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        let json = serde_json::to_string(&detection).unwrap();
        let back: Detection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, detection);
    }
}
