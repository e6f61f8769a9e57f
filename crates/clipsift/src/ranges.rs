//! Turning per-frame detections into the spans handed to the exporter.

use std::borrow::Cow;

use clipsift_types::FrameRange;

/// Groups frame indices into inclusive runs, bridging gaps of up to
/// `gap_tolerance` frames.
///
/// Unsorted input is sorted first; duplicates are harmless.
pub fn frames_to_ranges(frames: &[u64], gap_tolerance: u64) -> Vec<FrameRange> {
    let frames: Cow<'_, [u64]> = if frames.is_sorted() {
        Cow::Borrowed(frames)
    } else {
        let mut sorted = frames.to_vec();
        sorted.sort_unstable();
        Cow::Owned(sorted)
    };

    let mut ranges = Vec::new();
    let mut iter = frames.iter().copied();
    let Some(first) = iter.next() else {
        return ranges;
    };
    let mut current = FrameRange::single(first);
    for index in iter {
        if index <= current.end.saturating_add(gap_tolerance) {
            current.end = current.end.max(index);
        } else {
            ranges.push(current);
            current = FrameRange::single(index);
        }
    }
    ranges.push(current);
    ranges
}

/// Pads every range and merges the ones that overlap afterwards.
///
/// Starts saturate at frame 0 and ends are clamped to the last frame of a
/// `video_length` frame video; ranges starting past the end are dropped.
pub fn add_buffer_and_merge(
    ranges: &[FrameRange],
    buffer_before: u64,
    buffer_after: u64,
    video_length: u64,
) -> Vec<FrameRange> {
    let Some(last_frame) = video_length.checked_sub(1) else {
        return Vec::new();
    };

    let mut buffered: Vec<FrameRange> = ranges
        .iter()
        .filter(|range| range.start <= last_frame)
        .map(|range| FrameRange {
            start: range.start.saturating_sub(buffer_before),
            end: range.end.saturating_add(buffer_after).min(last_frame),
        })
        .collect();
    buffered.sort_unstable_by_key(|range| range.start);

    let mut merged: Vec<FrameRange> = Vec::with_capacity(buffered.len());
    for range in buffered {
        match merged.last_mut() {
            Some(run) if range.start <= run.end => run.end = run.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Converts a buffer in seconds to whole frames, truncating.
pub fn seconds_to_frames(seconds: f64, fps: f64) -> u64 {
    let frames = seconds * fps;
    if frames.is_finite() && frames > 0.0 {
        frames as u64
    } else {
        0
    }
}

pub fn total_frames(ranges: &[FrameRange]) -> u64 {
    ranges.iter().map(FrameRange::len).sum()
}

/// How detected frames are grouped and padded before export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSettings {
    pub gap_tolerance: u64,
    pub buffer_before_secs: f64,
    pub buffer_after_secs: f64,
}

impl Default for RangeSettings {
    fn default() -> Self {
        Self {
            gap_tolerance: 3,
            buffer_before_secs: 0.0,
            buffer_after_secs: 0.0,
        }
    }
}

/// Frames with detections in, export ranges out.
pub fn plan_ranges(
    frames: &[u64],
    settings: &RangeSettings,
    fps: f64,
    video_length: u64,
) -> Vec<FrameRange> {
    let ranges = frames_to_ranges(frames, settings.gap_tolerance);
    add_buffer_and_merge(
        &ranges,
        seconds_to_frames(settings.buffer_before_secs, fps),
        seconds_to_frames(settings.buffer_after_secs, fps),
        video_length,
    )
}
