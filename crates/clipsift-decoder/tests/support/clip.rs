//! Writes short synthetic mpeg4 clips for tests that need a real container.

use std::path::Path;

use ffmpeg::Rational;
use ffmpeg::format::Pixel;
use ffmpeg_next as ffmpeg;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;
pub const FPS: i32 = 25;

/// Encodes `frames` flat grey frames, each a little brighter than the last.
pub fn write_clip(path: &Path, frames: u32) {
    ffmpeg::init().expect("ffmpeg should initialize");
    let mut output = ffmpeg::format::output(path).expect("output container should open");
    let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4).expect("mpeg4 encoder");
    let global_header = output
        .format()
        .flags()
        .contains(ffmpeg::format::Flags::GLOBAL_HEADER);
    let time_base = Rational::new(1, FPS);

    let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
        .expect("video encoder context");
    encoder.set_width(WIDTH);
    encoder.set_height(HEIGHT);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(Rational::new(FPS, 1)));
    encoder.set_gop(10);
    encoder.set_max_b_frames(0);
    if global_header {
        encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = encoder
        .open_with(ffmpeg::Dictionary::new())
        .expect("mpeg4 encoder should open");
    {
        let mut stream = output.add_stream(codec).expect("video stream");
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
    }
    output.write_header().expect("header");
    let stream_time_base = output.stream(0).expect("stream 0").time_base();

    for index in 0..frames {
        let mut frame = ffmpeg::util::frame::Video::new(Pixel::YUV420P, WIDTH, HEIGHT);
        frame.data_mut(0).fill((16 + index * 4).min(235) as u8);
        frame.data_mut(1).fill(128);
        frame.data_mut(2).fill(128);
        frame.set_pts(Some(i64::from(index)));
        encoder.send_frame(&frame).expect("encoder should take frame");
        write_packets(&mut encoder, &mut output, time_base, stream_time_base);
    }
    encoder.send_eof().expect("encoder flush");
    write_packets(&mut encoder, &mut output, time_base, stream_time_base);
    output.write_trailer().expect("trailer");
}

fn write_packets(
    encoder: &mut ffmpeg::encoder::Video,
    output: &mut ffmpeg::format::context::Output,
    from: Rational,
    to: Rational,
) {
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(from, to);
        packet.write_interleaved(output).expect("packet write");
    }
}
