use clipsift_types::FrameRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// Before the range start; decode and discard.
    Skip,
    /// Inside the range; carries the frame index.
    Emit(u64),
    /// Past the range end; stop reading packets for this range.
    Done,
}

/// Tracks the frame index of decoded frames after a seek.
///
/// The first decoded frame fixes the index from its timestamp; every later
/// frame is one past the previous, regardless of its own timestamp.
#[derive(Debug, Clone)]
pub struct SegmentCursor {
    range: FrameRange,
    current: Option<u64>,
    emitted: u64,
    done: bool,
}

impl SegmentCursor {
    pub fn new(range: FrameRange) -> Self {
        Self {
            range,
            current: None,
            emitted: 0,
            done: false,
        }
    }

    pub fn range(&self) -> FrameRange {
        self.range
    }

    /// Advances by one decoded frame. `timestamp_index` is only consulted for
    /// the first frame; when it is missing the seek target is assumed.
    pub fn step(&mut self, timestamp_index: Option<u64>) -> CursorStep {
        if self.done {
            return CursorStep::Done;
        }
        let index = match self.current {
            Some(previous) => previous + 1,
            None => timestamp_index.unwrap_or(self.range.start),
        };
        self.current = Some(index);

        if index < self.range.start {
            CursorStep::Skip
        } else if index <= self.range.end {
            self.emitted += 1;
            CursorStep::Emit(index)
        } else {
            self.done = true;
            CursorStep::Done
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// True once the last frame of the range has been emitted.
    pub fn is_complete(&self) -> bool {
        self.done || self.current.is_some_and(|index| index >= self.range.end)
    }
}
