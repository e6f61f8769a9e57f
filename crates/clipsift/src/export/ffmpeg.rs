use std::path::Path;

use clipsift_decoder::backends::ffmpeg::{
    Pixel, Submission, backend_error, fill_video_from_rgb, is_retryable_error,
    rgb_frame_from_video, send_with_drain, to_rgb_scaler,
};
use clipsift_types::{FrameError, FrameRange, FrameResult};
use ffmpeg::software::scaling;
use ffmpeg_next as ffmpeg;

use super::{
    CursorStep, ExportConfig, ExportSummary, Overlay, SEEK_TIME_BASE, SegmentCursor,
    frame_to_timestamp, timestamp_to_frame,
};
use crate::error::{PipelineError, PipelineResult};
use crate::progress::percent;
use crate::ranges::total_frames;

pub(super) fn export<F>(
    config: &ExportConfig,
    input: &Path,
    output: &Path,
    ranges: &[FrameRange],
    overlay: Option<Overlay<'_>>,
    mut progress: F,
) -> PipelineResult<ExportSummary>
where
    F: FnMut(u8),
{
    ffmpeg::init().map_err(|err| PipelineError::Decoder(backend_error(err)))?;
    let mut session = Session::open(config, input, output, overlay)?;
    let total = total_frames(ranges);
    log::info!(
        "exporting {} ranges ({total} frames) from {} to {}",
        ranges.len(),
        input.display(),
        output.display()
    );

    for (range_index, range) in ranges.iter().enumerate() {
        session.write_range(range_index, *range, total, &mut progress)?;
    }
    session.finish()?;
    progress(100);

    Ok(ExportSummary {
        ranges: ranges.len(),
        frames_written: session.emitted,
    })
}

struct Session<'a> {
    input: ffmpeg::format::context::Input,
    output: ffmpeg::format::context::Output,
    decoder: ffmpeg::decoder::Video,
    encoder: ffmpeg::encoder::Video,
    annotation: Option<Annotation<'a>>,
    decoded: ffmpeg::util::frame::Video,
    stream_index: usize,
    ost_index: usize,
    time_base: ffmpeg::Rational,
    rate: ffmpeg::Rational,
    origin_pts: i64,
    origin_micros: i64,
    encoder_time_base: ffmpeg::Rational,
    ost_time_base: ffmpeg::Rational,
    next_pts: i64,
    emitted: u64,
}

impl<'a> Session<'a> {
    fn open(
        config: &ExportConfig,
        input_path: &Path,
        output_path: &Path,
        overlay: Option<Overlay<'a>>,
    ) -> PipelineResult<Self> {
        let input_label = input_path.display().to_string();
        let input = ffmpeg::format::input(input_path)
            .map_err(|err| PipelineError::cannot_open(input_label.clone(), backend_error(err)))?;
        let (stream_index, time_base, rate, start_time, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| {
                    PipelineError::cannot_open(
                        input_label.clone(),
                        FrameError::backend_failure("ffmpeg", "no video stream found"),
                    )
                })?;
            let rate = match stream.avg_frame_rate() {
                avg if avg.numerator() > 0 && avg.denominator() > 0 => avg,
                _ => stream.rate(),
            };
            (
                stream.index(),
                stream.time_base(),
                rate,
                stream.start_time(),
                stream.parameters(),
            )
        };
        if rate.numerator() <= 0 || rate.denominator() <= 0 {
            return Err(PipelineError::cannot_open(
                input_label,
                FrameError::backend_failure("ffmpeg", "stream has no usable frame rate"),
            ));
        }

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(|err| PipelineError::cannot_open(input_label.clone(), backend_error(err)))?;

        let mut output = ffmpeg::format::output(output_path).map_err(|err| {
            PipelineError::cannot_open(output_path.display().to_string(), backend_error(err))
        })?;
        let codec = ffmpeg::encoder::find(decoder.id()).ok_or_else(|| {
            PipelineError::mux(
                None,
                None,
                format!("no encoder available for {:?}", decoder.id()),
            )
        })?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let mut stream = output
            .add_stream(codec)
            .map_err(|err| PipelineError::mux(None, None, err))?;
        let ost_index = stream.index();
        let encoder_time_base = rate.invert();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|err| PipelineError::mux(None, None, err))?;
        encoder.set_width(decoder.width());
        encoder.set_height(decoder.height());
        encoder.set_aspect_ratio(decoder.aspect_ratio());
        encoder.set_format(decoder.format());
        encoder.set_frame_rate(Some(rate));
        encoder.set_time_base(encoder_time_base);
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let mut options = ffmpeg::Dictionary::new();
        if let Some(crf) = config.crf {
            options.set("crf", &crf.to_string());
        }
        let encoder = encoder
            .open_with(options)
            .map_err(|err| PipelineError::mux(None, None, err))?;
        stream.set_parameters(&encoder);

        output
            .write_header()
            .map_err(|err| PipelineError::mux(None, None, err))?;
        let ost_time_base = output
            .stream(ost_index)
            .map(|stream| stream.time_base())
            .unwrap_or(encoder_time_base);

        let annotation = overlay
            .map(|overlay| Annotation::new(overlay, &decoder))
            .transpose()?;

        let origin_pts = start_time.max(0);
        let origin_micros = if time_base.denominator() > 0 {
            let micros = i128::from(origin_pts)
                * i128::from(time_base.numerator())
                * i128::from(SEEK_TIME_BASE)
                / i128::from(time_base.denominator());
            i64::try_from(micros).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            input,
            output,
            decoder,
            encoder,
            annotation,
            decoded: ffmpeg::util::frame::Video::empty(),
            stream_index,
            ost_index,
            time_base,
            rate,
            origin_pts,
            origin_micros,
            encoder_time_base,
            ost_time_base,
            next_pts: 0,
            emitted: 0,
        })
    }

    fn write_range<F>(
        &mut self,
        range_index: usize,
        range: FrameRange,
        total: u64,
        progress: &mut F,
    ) -> PipelineResult<()>
    where
        F: FnMut(u8),
    {
        let target =
            frame_to_timestamp(range.start, self.rate.numerator(), self.rate.denominator())
                .saturating_add(self.origin_micros);
        self.input
            .seek(target, ..target)
            .map_err(|err| PipelineError::mux(Some(range_index), Some(range.start), err))?;
        self.decoder.flush();

        let mut cursor = SegmentCursor::new(range);
        let mut eof = false;
        while !cursor.is_done() && !eof {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    let submitted = send_with_drain(
                        self,
                        |session| session.decoder.send_packet(&packet),
                        |session: &mut Self| -> PipelineResult<bool> {
                            session.drain_decoder(range_index, &mut cursor, total, progress)?;
                            Ok(!cursor.is_done())
                        },
                    )?;
                    if let Submission::Rejected(err) = submitted {
                        log::debug!("range {range_index}: skipping undecodable packet: {err}");
                        continue;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|err| PipelineError::mux(Some(range_index), None, err))?;
                    eof = true;
                }
                Err(err) => return Err(PipelineError::mux(Some(range_index), None, err)),
            }
            self.drain_decoder(range_index, &mut cursor, total, progress)?;
        }

        if cursor.emitted() < range.len() {
            log::warn!(
                "range {range_index} ({range}): wrote {} of {} frames before the stream ended",
                cursor.emitted(),
                range.len()
            );
        }
        Ok(())
    }

    fn drain_decoder<F>(
        &mut self,
        range_index: usize,
        cursor: &mut SegmentCursor,
        total: u64,
        progress: &mut F,
    ) -> PipelineResult<()>
    where
        F: FnMut(u8),
    {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => {}
                Err(err) if is_retryable_error(&err) || matches!(err, ffmpeg::Error::Eof) => {
                    return Ok(());
                }
                Err(err) => {
                    log::debug!("range {range_index}: skipping undecodable frame: {err}");
                    return Ok(());
                }
            }

            let timestamp_index = self
                .decoded
                .timestamp()
                .or_else(|| self.decoded.pts())
                .map(|pts| {
                    timestamp_to_frame(
                        pts - self.origin_pts,
                        self.time_base.numerator(),
                        self.time_base.denominator(),
                        self.rate.numerator(),
                        self.rate.denominator(),
                    )
                });
            match cursor.step(timestamp_index) {
                CursorStep::Skip => continue,
                CursorStep::Emit(frame_index) => {
                    self.encode_current(range_index, frame_index)?;
                    self.emitted += 1;
                    progress(percent(self.emitted, total));
                }
                CursorStep::Done => return Ok(()),
            }
        }
    }

    fn encode_current(&mut self, range_index: usize, frame_index: u64) -> PipelineResult<()> {
        let pts = self.next_pts;
        self.next_pts += 1;

        let annotation = self
            .annotation
            .as_mut()
            .filter(|annotation| annotation.has_detections(frame_index));
        let sent = match annotation {
            Some(annotation) => {
                annotation
                    .render(&self.decoded, frame_index)
                    .map_err(|err| PipelineError::mux(Some(range_index), Some(frame_index), err))?;
                annotation.output.set_pts(Some(pts));
                annotation.output.set_kind(ffmpeg::picture::Type::None);
                self.encoder.send_frame(&annotation.output)
            }
            None => {
                self.decoded.set_pts(Some(pts));
                self.decoded.set_kind(ffmpeg::picture::Type::None);
                self.encoder.send_frame(&self.decoded)
            }
        };
        sent.map_err(|err| PipelineError::mux(Some(range_index), Some(frame_index), err))?;
        self.drain_encoder(Some(range_index), Some(frame_index))
    }

    fn drain_encoder(
        &mut self,
        range_index: Option<usize>,
        frame_index: Option<u64>,
    ) -> PipelineResult<()> {
        let mut encoded = ffmpeg::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut encoded) {
                Ok(()) => {
                    encoded.set_stream(self.ost_index);
                    encoded.rescale_ts(self.encoder_time_base, self.ost_time_base);
                    encoded
                        .write_interleaved(&mut self.output)
                        .map_err(|err| PipelineError::mux(range_index, frame_index, err))?;
                }
                Err(err) if is_retryable_error(&err) || matches!(err, ffmpeg::Error::Eof) => {
                    return Ok(());
                }
                Err(err) => return Err(PipelineError::mux(range_index, frame_index, err)),
            }
        }
    }

    fn finish(&mut self) -> PipelineResult<()> {
        self.encoder
            .send_eof()
            .map_err(|err| PipelineError::mux(None, None, err))?;
        self.drain_encoder(None, None)?;
        self.output
            .write_trailer()
            .map_err(|err| PipelineError::mux(None, None, err))?;
        log::info!("export finished: {} frames written", self.emitted);
        Ok(())
    }
}

/// RGB round trip used to draw on frames that carry detections.
struct Annotation<'a> {
    overlay: Overlay<'a>,
    to_rgb: scaling::Context,
    from_rgb: scaling::Context,
    rgb: ffmpeg::util::frame::Video,
    output: ffmpeg::util::frame::Video,
}

impl<'a> Annotation<'a> {
    fn new(overlay: Overlay<'a>, decoder: &ffmpeg::decoder::Video) -> PipelineResult<Self> {
        let to_rgb = to_rgb_scaler(decoder)?;
        let from_rgb = scaling::Context::get(
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            decoder.format(),
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .map_err(backend_error)?;
        Ok(Self {
            overlay,
            to_rgb,
            from_rgb,
            rgb: ffmpeg::util::frame::Video::empty(),
            output: ffmpeg::util::frame::Video::empty(),
        })
    }

    fn has_detections(&self, frame_index: u64) -> bool {
        self.overlay
            .detections
            .detections_for(frame_index)
            .is_some_and(|detections| !detections.is_empty())
    }

    fn render(
        &mut self,
        decoded: &ffmpeg::util::frame::Video,
        frame_index: u64,
    ) -> FrameResult<()> {
        self.to_rgb
            .run(decoded, &mut self.rgb)
            .map_err(backend_error)?;
        let detections = self
            .overlay
            .detections
            .detections_for(frame_index)
            .unwrap_or(&[]);
        let frame = rgb_frame_from_video(&self.rgb, decoded.pts())?;
        let annotated = self.overlay.annotator.annotate(frame, detections);
        fill_video_from_rgb(&annotated, &mut self.rgb)?;
        self.from_rgb
            .run(&self.rgb, &mut self.output)
            .map_err(backend_error)?;
        Ok(())
    }
}
