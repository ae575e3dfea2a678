use std::path::PathBuf;

use ab_glyph::{FontArc, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde_derive::{Deserialize, Serialize};

use crate::detection::DetectionRecord;
use crate::error::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub jpeg_quality: u8,
    /// TrueType font for labels, replacing the bundled DejaVu Sans Mono.
    pub font_path: Option<PathBuf>,
    pub font_scale: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 65,
            font_path: None,
            font_scale: 14.0,
        }
    }
}

/// `ID: <id> | <plate> | <speed> km/h`, the plate part only when resolved.
pub fn compose_label(record: &DetectionRecord) -> String {
    let mut parts = vec![format!("ID: {}", record.track_id)];
    if let Some(plate) = &record.plate {
        parts.push(plate.clone());
    }
    parts.push(format!("{} km/h", record.speed_kmh));

    parts.join(" | ")
}

fn load_font(config: &RenderConfig) -> Result<FontArc, Error> {
    match &config.font_path {
        Some(path) => {
            let data = std::fs::read(path)?;
            FontArc::try_from_vec(data)
                .map_err(|err| Error::MalformedInput(format!("font {}: {}", path.display(), err)))
        }
        None => FontArc::try_from_slice(BUNDLED_FONT)
            .map_err(|err| Error::MalformedInput(format!("bundled font: {}", err))),
    }
}

pub struct AnnotationRenderer {
    font: FontArc,
    scale: PxScale,
    quality: u8,
}

impl AnnotationRenderer {
    pub fn new(config: &RenderConfig) -> Result<Self, Error> {
        Ok(Self::with_font(load_font(config)?, config))
    }

    pub fn with_font(font: FontArc, config: &RenderConfig) -> Self {
        Self {
            font,
            scale: PxScale::from(config.font_scale.max(1.0)),
            quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    /// Draws every record onto a copy of `frame` and returns it as JPEG.
    pub fn render(&self, frame: &RgbImage, records: &[DetectionRecord]) -> Result<Vec<u8>, Error> {
        self.encode(&self.draw(frame, records))
    }

    /// Draws every record onto a copy of `frame`.
    pub fn draw(&self, frame: &RgbImage, records: &[DetectionRecord]) -> RgbImage {
        let mut canvas = frame.clone();

        for record in records {
            self.draw_record(&mut canvas, record);
        }

        canvas
    }

    fn draw_record(&self, canvas: &mut RgbImage, record: &DetectionRecord) {
        let (width, height) = canvas.dimensions();

        // One pixel of margin keeps edges of boxes leaving the frame hidden.
        let clamp_x = |v: i32| v.clamp(-1, width as i32);
        let clamp_y = |v: i32| v.clamp(-1, height as i32);

        let [x1, y1, x2, y2] = record.bbox;
        let (x1, y1, x2, y2) = (clamp_x(x1), clamp_y(y1), clamp_x(x2), clamp_y(y2));
        let w = (x2 - x1).max(1) as u32;
        let h = (y2 - y1).max(1) as u32;

        draw_hollow_rect_mut(canvas, Rect::at(x1, y1).of_size(w, h), BOX_COLOR);

        let label = compose_label(record);
        let (tw, th) = text_size(self.scale, &self.font, &label);

        // Keep the label inside the frame for boxes touching the top edge.
        let label_y = y1.max(th as i32 + 10);

        draw_filled_rect_mut(
            canvas,
            Rect::at(x1, label_y - th as i32 - 6).of_size(tw + 4, th + 6),
            BOX_COLOR,
        );
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            x1 + 2,
            label_y - th as i32 - 4,
            self.scale,
            &self.font,
            &label,
        );
    }

    fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality).encode_image(image)?;

        Ok(bytes)
    }
}
