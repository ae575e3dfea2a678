use image::RgbImage;

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;

/// One text read with its engine confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCandidate {
    pub text: String,
    pub confidence: f32,
}

impl TextCandidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Text-recognition engine. Candidates come back in no particular order.
pub trait TextRecognizer: Send + Sync {
    fn read_text(&self, image: &RgbImage) -> Result<Vec<TextCandidate>, Error>;
}

/// Specialized plate locator: boxes, in the coordinates of the given image,
/// likely to contain a plate.
pub trait PlateRegionDetector: Send + Sync {
    fn detect_plates(&self, image: &RgbImage) -> Result<Vec<BBox<Ltrb>>, Error>;
}

/// Uppercases and keeps ASCII letters and digits only.
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}
