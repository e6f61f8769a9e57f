pub mod backends;
pub mod config;
pub mod core;

pub use config::{Backend, Configuration};
pub use core::{
    DynFrameReader, FrameError, FrameReader, FrameResult, RawFrame, ReadOutcome, VideoMetadata,
};
pub use backends::mock::{MockOptions, MockReader};
