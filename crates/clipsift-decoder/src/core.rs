pub use clipsift_types::{FrameError, FrameResult, RawFrame, VideoMetadata};

/// Result of pulling one frame from a reader.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(RawFrame),
    /// The frame could not be decoded; the reader has advanced past it.
    Unreadable { reason: String },
    EndOfStream,
}

/// Sequential frame access over a single opened input.
///
/// Readers are not required to be `Send`. Callers that decode on a worker
/// thread open the reader on that thread.
pub trait FrameReader {
    fn backend(&self) -> &'static str;

    fn metadata(&self) -> VideoMetadata;

    fn total_frames(&self) -> Option<u64> {
        self.metadata().calculate_total_frames()
    }

    fn read_frame(&mut self) -> FrameResult<ReadOutcome>;
}

pub type DynFrameReader = Box<dyn FrameReader>;
