#![cfg(feature = "backend-ffmpeg")]

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg::util::error::{EAGAIN, EWOULDBLOCK};
use ffmpeg_next as ffmpeg;

use crate::core::{
    DynFrameReader, FrameError, FrameReader, FrameResult, RawFrame, ReadOutcome, VideoMetadata,
};

const BACKEND_NAME: &str = "ffmpeg";
const RGB_CHANNELS: u8 = 3;

pub use ffmpeg::format::Pixel;

/// Decodes the best video stream of a file and hands out RGB24 frames.
pub struct FfmpegReader {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::context::Context,
    stream_index: usize,
    metadata: VideoMetadata,
    decoded: ffmpeg::util::frame::Video,
    converted: ffmpeg::util::frame::Video,
    /// Packet refused with EAGAIN, resent once pending frames are received.
    pending: Option<ffmpeg::Packet>,
    eof_sent: bool,
}

impl FfmpegReader {
    pub fn open<P: AsRef<Path>>(path: P) -> FrameResult<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;
        ffmpeg::init().map_err(backend_error)?;

        let input = ffmpeg::format::input(path).map_err(backend_error)?;
        let (stream_index, metadata, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| {
                    FrameError::backend_failure(BACKEND_NAME, "no video stream found")
                })?;
            (
                stream.index(),
                stream_metadata(&input, &stream),
                stream.parameters(),
            )
        };

        let context =
            ffmpeg::codec::context::Context::from_parameters(parameters).map_err(backend_error)?;
        let decoder = context.decoder().video().map_err(backend_error)?;
        let scaler = to_rgb_scaler(&decoder)?;

        let metadata = VideoMetadata {
            width: Some(decoder.width()),
            height: Some(decoder.height()),
            ..metadata
        };

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            metadata,
            decoded: ffmpeg::util::frame::Video::empty(),
            converted: ffmpeg::util::frame::Video::empty(),
            pending: None,
            eof_sent: false,
        })
    }

    /// Pushes the next packet of the video stream into the decoder.
    fn feed(&mut self) -> FrameResult<Option<ReadOutcome>> {
        let packet = match self.pending.take() {
            Some(packet) => packet,
            None => match self.next_packet()? {
                Some(packet) => packet,
                None => {
                    self.decoder.send_eof().map_err(backend_error)?;
                    self.eof_sent = true;
                    return Ok(None);
                }
            },
        };
        match self.decoder.send_packet(&packet) {
            Ok(()) => Ok(None),
            Err(err) if is_retryable_error(&err) => {
                self.pending = Some(packet);
                Ok(None)
            }
            Err(err) => Ok(Some(ReadOutcome::Unreadable {
                reason: err.to_string(),
            })),
        }
    }

    fn next_packet(&mut self) -> FrameResult<Option<ffmpeg::Packet>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => return Ok(Some(packet)),
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(err) => return Err(backend_error(err)),
            }
        }
    }
}

impl FrameReader for FfmpegReader {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn read_frame(&mut self) -> FrameResult<ReadOutcome> {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => {
                    self.scaler
                        .run(&self.decoded, &mut self.converted)
                        .map_err(backend_error)?;
                    let frame = rgb_frame_from_video(&self.converted, self.decoded.pts())?;
                    return Ok(ReadOutcome::Frame(frame));
                }
                Err(ffmpeg::Error::Eof) => return Ok(ReadOutcome::EndOfStream),
                Err(err) if is_retryable_error(&err) => {}
                Err(err) => {
                    return Ok(ReadOutcome::Unreadable {
                        reason: err.to_string(),
                    });
                }
            }
            if self.eof_sent {
                return Ok(ReadOutcome::EndOfStream);
            }
            if let Some(outcome) = self.feed()? {
                return Ok(outcome);
            }
        }
    }
}

/// Reads container metadata without decoding any frames.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> FrameResult<VideoMetadata> {
    let path = path.as_ref();
    ensure_exists(path)?;
    ffmpeg::init().map_err(backend_error)?;
    let input = ffmpeg::format::input(path).map_err(backend_error)?;
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| FrameError::backend_failure(BACKEND_NAME, "no video stream found"))?;
    let mut metadata = stream_metadata(&input, &stream);
    if let Ok(context) = ffmpeg::codec::context::Context::from_parameters(stream.parameters()) {
        if let Ok(decoder) = context.decoder().video() {
            metadata.width = Some(decoder.width());
            metadata.height = Some(decoder.height());
        }
    }
    Ok(metadata)
}

fn stream_metadata(
    input: &ffmpeg::format::context::Input,
    stream: &ffmpeg::format::stream::Stream<'_>,
) -> VideoMetadata {
    let rate = {
        let avg = stream.avg_frame_rate();
        if avg.numerator() > 0 && avg.denominator() > 0 {
            avg
        } else {
            stream.rate()
        }
    };
    let fps = (rate.numerator() > 0 && rate.denominator() > 0).then(|| f64::from(rate));

    let duration = if input.duration() > 0 {
        Some(Duration::from_micros(input.duration() as u64))
    } else if stream.duration() > 0 {
        let seconds = stream.duration() as f64 * f64::from(stream.time_base());
        (seconds.is_finite() && seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
    } else {
        None
    };

    let total_frames = (stream.frames() > 0).then(|| stream.frames() as u64);

    VideoMetadata {
        duration,
        fps,
        width: None,
        height: None,
        total_frames,
    }
}

/// Scaler from the decoder's native layout to packed RGB24 at the same size.
pub fn to_rgb_scaler(
    decoder: &ffmpeg::decoder::Video,
) -> FrameResult<ffmpeg::software::scaling::context::Context> {
    ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::flag::Flags::BILINEAR,
    )
    .map_err(backend_error)
}

/// Copies a packed RGB24 ffmpeg frame into a tightly packed [`RawFrame`].
pub fn rgb_frame_from_video(
    frame: &ffmpeg::util::frame::Video,
    pts: Option<i64>,
) -> FrameResult<RawFrame> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * RGB_CHANNELS as usize;
    let stride = frame.stride(0);
    let plane = frame.data(0);
    let mut buffer = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let offset = row * stride;
        let line = plane.get(offset..offset + row_bytes).ok_or_else(|| {
            FrameError::InvalidFrame {
                reason: format!("rgb plane too short at row {row}"),
            }
        })?;
        buffer.extend_from_slice(line);
    }
    RawFrame::from_owned(width, height, RGB_CHANNELS, pts, buffer)
}

/// Writes a packed RGB [`RawFrame`] into an allocated RGB24 ffmpeg frame.
pub fn fill_video_from_rgb(
    raw: &RawFrame,
    target: &mut ffmpeg::util::frame::Video,
) -> FrameResult<()> {
    if raw.channels() != RGB_CHANNELS
        || raw.width() != target.width()
        || raw.height() != target.height()
    {
        return Err(FrameError::InvalidFrame {
            reason: format!(
                "cannot write {}x{}x{} frame into {}x{} rgb target",
                raw.width(),
                raw.height(),
                raw.channels(),
                target.width(),
                target.height()
            ),
        });
    }
    let row_bytes = raw.width() as usize * RGB_CHANNELS as usize;
    let stride = target.stride(0);
    let plane = target.data_mut(0);
    for (row, line) in raw.data().chunks(row_bytes.max(1)).enumerate() {
        let offset = row * stride;
        let dest = plane.get_mut(offset..offset + row_bytes).ok_or_else(|| {
            FrameError::InvalidFrame {
                reason: format!("rgb target too short at row {row}"),
            }
        })?;
        dest.copy_from_slice(line);
    }
    Ok(())
}

/// Result of [`send_with_drain`].
#[derive(Debug)]
pub enum Submission {
    Accepted,
    Rejected(ffmpeg::Error),
    /// `drain` asked to stop before the packet was taken.
    Abandoned,
}

/// Sends a packet, draining decoded output and resending the same packet
/// whenever the decoder reports it is full. `drain` returns `false` once
/// no more output is wanted.
pub fn send_with_drain<T, E>(
    state: &mut T,
    mut send: impl FnMut(&mut T) -> Result<(), ffmpeg::Error>,
    mut drain: impl FnMut(&mut T) -> Result<bool, E>,
) -> Result<Submission, E> {
    loop {
        match send(state) {
            Ok(()) => return Ok(Submission::Accepted),
            Err(err) if is_retryable_error(&err) => {
                if !drain(state)? {
                    return Ok(Submission::Abandoned);
                }
            }
            Err(err) => return Ok(Submission::Rejected(err)),
        }
    }
}

pub fn is_retryable_error(error: &ffmpeg::Error) -> bool {
    matches!(
        error,
        ffmpeg::Error::Other { errno }
            if *errno == EAGAIN || *errno == EWOULDBLOCK
    )
}

pub fn backend_error(err: ffmpeg::Error) -> FrameError {
    FrameError::backend_failure(BACKEND_NAME, err.to_string())
}

fn ensure_exists(path: &Path) -> FrameResult<()> {
    if path.exists() {
        return Ok(());
    }
    Err(FrameError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("input file {} does not exist", path.display()),
    )))
}

pub fn boxed_ffmpeg(path: PathBuf) -> FrameResult<DynFrameReader> {
    Ok(Box::new(FfmpegReader::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_error() {
        let result = FfmpegReader::open("/tmp/clipsift-nonexistent-file.mp4");
        assert!(matches!(result, Err(FrameError::Io(_))));
    }

    #[test]
    fn metadata_of_missing_file_returns_error() {
        assert!(read_metadata("/tmp/clipsift-nonexistent-file.mp4").is_err());
    }

    struct FullDecoder {
        refusals: u32,
        drained: u32,
        sent: u32,
    }

    fn send(decoder: &mut FullDecoder) -> Result<(), ffmpeg::Error> {
        decoder.sent += 1;
        if decoder.refusals > 0 {
            decoder.refusals -= 1;
            return Err(ffmpeg::Error::Other { errno: EAGAIN });
        }
        Ok(())
    }

    #[test]
    fn full_decoder_is_drained_and_packet_resent() {
        let mut decoder = FullDecoder {
            refusals: 2,
            drained: 0,
            sent: 0,
        };
        let outcome = send_with_drain(&mut decoder, send, |decoder| {
            decoder.drained += 1;
            Ok::<_, FrameError>(true)
        })
        .unwrap();
        assert!(matches!(outcome, Submission::Accepted));
        assert_eq!(decoder.sent, 3);
        assert_eq!(decoder.drained, 2);
    }

    #[test]
    fn drain_can_abandon_the_packet() {
        let mut decoder = FullDecoder {
            refusals: 5,
            drained: 0,
            sent: 0,
        };
        let outcome = send_with_drain(&mut decoder, send, |decoder| {
            decoder.drained += 1;
            Ok::<_, FrameError>(false)
        })
        .unwrap();
        assert!(matches!(outcome, Submission::Abandoned));
        assert_eq!(decoder.sent, 1);
    }

    #[test]
    fn hard_errors_are_not_retried() {
        let mut sent = 0;
        let outcome = send_with_drain(
            &mut sent,
            |sent| {
                *sent += 1;
                Err(ffmpeg::Error::InvalidData)
            },
            |_| Ok::<_, FrameError>(true),
        )
        .unwrap();
        assert!(matches!(outcome, Submission::Rejected(ffmpeg::Error::InvalidData)));
        assert_eq!(sent, 1);
    }
}
