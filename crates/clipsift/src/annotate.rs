use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clipsift_types::{Detection, RawFrame};
use image::{ImageBuffer, Rgb};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::{Font, Scale, point};
use thiserror::Error;

type RgbCanvas<'a> = ImageBuffer<Rgb<u8>, &'a mut [u8]>;

/// Draws detections onto a frame before it is encoded.
pub trait Annotator: Send + Sync {
    fn annotate(&self, frame: RawFrame, detections: &[Detection]) -> RawFrame;
}

#[derive(Debug, Error)]
pub enum FontError {
    #[error("failed to read font {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not a TrueType or OpenType font")]
    Invalid { path: PathBuf },
}

/// Box plus a `"{confidence:.2} {label}"` caption per detection, drawn in
/// place on RGB frames.
#[derive(Clone)]
pub struct BoxAnnotator {
    pub color: [u8; 3],
    pub thickness: u32,
    pub text_color: [u8; 3],
    /// Caption height in pixels.
    pub text_scale: f32,
    /// Without a font only the caption background is drawn.
    pub font: Option<Font<'static>>,
}

impl Default for BoxAnnotator {
    fn default() -> Self {
        Self {
            color: [255, 0, 0],
            thickness: 2,
            text_color: [255, 255, 255],
            text_scale: 12.0,
            font: None,
        }
    }
}

impl fmt::Debug for BoxAnnotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxAnnotator")
            .field("color", &self.color)
            .field("thickness", &self.thickness)
            .field("text_color", &self.text_color)
            .field("text_scale", &self.text_scale)
            .field("font", &self.font.as_ref().map(|_| "loaded"))
            .finish()
    }
}

impl BoxAnnotator {
    pub fn load_font(path: &Path) -> Result<Font<'static>, FontError> {
        let bytes = fs::read(path).map_err(|source| FontError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Font::try_from_vec(bytes).ok_or_else(|| FontError::Invalid {
            path: path.to_path_buf(),
        })
    }

    fn draw_box(&self, canvas: &mut RgbCanvas<'_>, x0: u32, y0: u32, x1: u32, y1: u32) {
        for inset in 0..self.thickness.max(1) {
            let (left, top) = (x0 + inset, y0 + inset);
            let (right, bottom) = (x1.saturating_sub(inset), y1.saturating_sub(inset));
            if left > right || top > bottom {
                break;
            }
            let rect =
                Rect::at(left as i32, top as i32).of_size(right - left + 1, bottom - top + 1);
            draw_hollow_rect_mut(canvas, rect, Rgb(self.color));
        }
    }

    /// Caption sits above the box when it fits, otherwise inside its top edge.
    fn draw_caption(&self, canvas: &mut RgbCanvas<'_>, x0: u32, y0: u32, text: &str) {
        let scale = Scale::uniform(self.text_scale.max(1.0));
        let (width, height) = match &self.font {
            Some(font) => text_extent(font, scale, text),
            None => (
                (text.chars().count() as f32 * scale.x * 0.5).ceil() as u32,
                scale.y.ceil() as u32,
            ),
        };
        if width == 0 || height == 0 {
            return;
        }
        let top = if y0 >= height { y0 - height } else { y0 };
        let background = Rect::at(x0 as i32, top as i32).of_size(width + 1, height + 1);
        draw_filled_rect_mut(canvas, background, Rgb(self.color));
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                Rgb(self.text_color),
                x0 as i32,
                top as i32,
                scale,
                font,
                text,
            );
        }
    }
}

pub fn caption(detection: &Detection) -> String {
    format!("{:.2} {}", detection.confidence, detection.label)
}

fn text_extent(font: &Font<'_>, scale: Scale, text: &str) -> (u32, u32) {
    let metrics = font.v_metrics(scale);
    let height = (metrics.ascent - metrics.descent).ceil().max(0.0) as u32;
    let width = font
        .layout(text, scale, point(0.0, metrics.ascent))
        .filter_map(|glyph| glyph.pixel_bounding_box())
        .map(|bounds| bounds.max.x)
        .max()
        .unwrap_or(0)
        .max(0) as u32;
    (width, height)
}

impl Annotator for BoxAnnotator {
    fn annotate(&self, mut frame: RawFrame, detections: &[Detection]) -> RawFrame {
        if frame.channels() != 3 || detections.is_empty() {
            return frame;
        }
        let (width, height) = (frame.width(), frame.height());
        let Some(mut canvas) = RgbCanvas::from_raw(width, height, frame.data_mut()) else {
            return frame;
        };

        for detection in detections {
            let bbox = detection.bbox;
            let x0 = bbox.xmin.max(0.0).floor() as u32;
            let y0 = bbox.ymin.max(0.0).floor() as u32;
            let x1 = (bbox.xmax.ceil().max(0.0) as u32).min(width.saturating_sub(1));
            let y1 = (bbox.ymax.ceil().max(0.0) as u32).min(height.saturating_sub(1));
            if x0 > x1 || y0 > y1 {
                continue;
            }
            self.draw_box(&mut canvas, x0, y0, x1, y1);
            self.draw_caption(&mut canvas, x0, y0, &caption(detection));
        }
        frame
    }
}
