use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::core::{FrameReader, FrameResult, RawFrame, ReadOutcome, VideoMetadata};

const BACKEND_NAME: &str = "mock";
const CHANNELS: u8 = 3;

/// Knobs for the synthetic reader.
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub fps: f64,
    /// Sleep applied after every read.
    pub frame_interval: Duration,
    /// Indices reported as undecodable.
    pub unreadable: BTreeSet<u64>,
    /// Overrides the frame count advertised in the metadata.
    pub declared_frames: Option<u64>,
    /// Incremented once per `read_frame` call that consumed a frame slot.
    pub read_counter: Option<Arc<AtomicU64>>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            width: 64,
            height: 36,
            frame_count: 120,
            fps: 25.0,
            frame_interval: Duration::ZERO,
            unreadable: BTreeSet::new(),
            declared_frames: None,
            read_counter: None,
        }
    }
}

impl MockOptions {
    pub fn with_frames(frame_count: u64) -> Self {
        Self {
            frame_count,
            ..Self::default()
        }
    }
}

/// Emits frames whose rows are filled with `(row + index) % 256`.
pub struct MockReader {
    options: MockOptions,
    next_index: u64,
}

impl MockReader {
    pub fn new(options: MockOptions) -> Self {
        Self {
            options,
            next_index: 0,
        }
    }

    fn render(&self, index: u64) -> FrameResult<RawFrame> {
        let row_bytes = self.options.width as usize * CHANNELS as usize;
        let mut buffer = vec![0u8; row_bytes * self.options.height as usize];
        for (row, chunk) in buffer.chunks_mut(row_bytes.max(1)).enumerate() {
            chunk.fill(((row as u64 + index) % 256) as u8);
        }
        RawFrame::from_owned(
            self.options.width,
            self.options.height,
            CHANNELS,
            Some(index as i64),
            buffer,
        )
        .map(|frame| frame.with_frame_index(Some(index)))
    }
}

impl FrameReader for MockReader {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    fn metadata(&self) -> VideoMetadata {
        let total = self
            .options
            .declared_frames
            .unwrap_or(self.options.frame_count);
        VideoMetadata {
            duration: Some(Duration::from_secs_f64(total as f64 / self.options.fps)),
            fps: Some(self.options.fps),
            width: Some(self.options.width),
            height: Some(self.options.height),
            total_frames: Some(total),
        }
    }

    fn read_frame(&mut self) -> FrameResult<ReadOutcome> {
        if self.next_index >= self.options.frame_count {
            return Ok(ReadOutcome::EndOfStream);
        }
        let index = self.next_index;
        self.next_index += 1;
        if let Some(counter) = &self.options.read_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if !self.options.frame_interval.is_zero() {
            thread::sleep(self.options.frame_interval);
        }
        if self.options.unreadable.contains(&index) {
            return Ok(ReadOutcome::Unreadable {
                reason: format!("synthetic decode failure at frame {index}"),
            });
        }
        self.render(index).map(ReadOutcome::Frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_frame(outcome: ReadOutcome) -> RawFrame {
        match outcome {
            ReadOutcome::Frame(frame) => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn mock_reader_emits_frames_in_order() {
        let mut reader = MockReader::new(MockOptions::with_frames(3));
        assert_eq!(reader.total_frames(), Some(3));
        for expected in 0..3 {
            let frame = expect_frame(reader.read_frame().unwrap());
            assert_eq!(frame.frame_index(), Some(expected));
            assert_eq!(frame.width(), 64);
            assert_eq!(frame.data().len(), 64 * 36 * 3);
        }
        assert!(matches!(
            reader.read_frame().unwrap(),
            ReadOutcome::EndOfStream
        ));
    }

    #[test]
    fn mock_reader_reports_unreadable_frames() {
        let mut options = MockOptions::with_frames(3);
        options.unreadable.insert(1);
        let mut reader = MockReader::new(options);
        expect_frame(reader.read_frame().unwrap());
        assert!(matches!(
            reader.read_frame().unwrap(),
            ReadOutcome::Unreadable { .. }
        ));
        let frame = expect_frame(reader.read_frame().unwrap());
        assert_eq!(frame.frame_index(), Some(2));
    }

    #[test]
    fn read_counter_tracks_consumed_slots() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut options = MockOptions::with_frames(2);
        options.read_counter = Some(Arc::clone(&counter));
        let mut reader = MockReader::new(options);
        while !matches!(reader.read_frame().unwrap(), ReadOutcome::EndOfStream) {}
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
