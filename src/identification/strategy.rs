//! Recognition strategies, tried in order until one reads a plate.

use std::sync::Arc;

use image::imageops::crop_imm;
use image::RgbImage;
use tracing::{debug, info};

use super::ocr::{normalize_plate, PlateRegionDetector, TextCandidate, TextRecognizer};
use crate::error::Error;

pub trait RecognitionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Normalized plate text read from a vehicle crop, `None` when nothing
    /// usable was found.
    fn recognize(&self, vehicle: &RgbImage) -> Result<Option<String>, Error>;
}

/// Runs `strategies` in order and returns the first read. Errors of one
/// strategy do not stop the next one; the last error is reported only when
/// no strategy produced a plate.
pub fn run_strategies(
    strategies: &[Box<dyn RecognitionStrategy>],
    vehicle: &RgbImage,
) -> Result<Option<String>, Error> {
    let mut last_err = None;

    for strategy in strategies {
        match strategy.recognize(vehicle) {
            Ok(Some(text)) => return Ok(Some(text)),
            Ok(None) => {}
            Err(err) => {
                debug!(strategy = strategy.name(), error = %err, "recognition strategy failed");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

fn most_confident(candidates: impl IntoIterator<Item = TextCandidate>) -> Option<TextCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.confidence.is_finite())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Locates plates with a dedicated detector and reads each region, taking
/// the first region whose best read is confident enough.
pub struct PlateRegionStrategy {
    detector: Arc<dyn PlateRegionDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    min_confidence: f32,
}

impl PlateRegionStrategy {
    pub fn new(
        detector: Arc<dyn PlateRegionDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        min_confidence: f32,
    ) -> Self {
        Self {
            detector,
            recognizer,
            min_confidence,
        }
    }
}

impl RecognitionStrategy for PlateRegionStrategy {
    fn name(&self) -> &'static str {
        "plate-region"
    }

    fn recognize(&self, vehicle: &RgbImage) -> Result<Option<String>, Error> {
        let (w, h) = vehicle.dimensions();

        for region in self.detector.detect_plates(vehicle)? {
            let Some((x, y, rw, rh)) = region.crop_region(w, h) else {
                continue;
            };
            let plate = crop_imm(vehicle, x, y, rw, rh).to_image();

            let best = match self.recognizer.read_text(&plate) {
                Ok(candidates) => most_confident(candidates),
                Err(err) => {
                    debug!(error = %err, "plate region read failed");
                    continue;
                }
            };

            if let Some(best) = best {
                if best.confidence > self.min_confidence {
                    let text = normalize_plate(&best.text);
                    if !text.is_empty() {
                        return Ok(Some(text));
                    }
                }
            }
        }

        Ok(None)
    }
}

/// Reads the lower part of the whole vehicle crop, where plates usually sit,
/// and keeps the most confident read that is long enough to be a plate.
pub struct LowerCropStrategy {
    recognizer: Arc<dyn TextRecognizer>,
    /// Fraction of the crop height where the read area starts.
    crop_start: f32,
    min_len: usize,
}

impl LowerCropStrategy {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, crop_start: f32, min_len: usize) -> Self {
        Self {
            recognizer,
            crop_start: crop_start.clamp(0.0, 1.0),
            min_len,
        }
    }
}

impl RecognitionStrategy for LowerCropStrategy {
    fn name(&self) -> &'static str {
        "lower-crop"
    }

    fn recognize(&self, vehicle: &RgbImage) -> Result<Option<String>, Error> {
        let (w, h) = vehicle.dimensions();
        let top = (h as f32 * self.crop_start) as u32;
        if w == 0 || top >= h {
            return Ok(None);
        }

        let lower = crop_imm(vehicle, 0, top, w, h - top).to_image();
        let candidates = self.recognizer.read_text(&lower)?;

        let best = most_confident(candidates.into_iter().filter_map(|c| {
            let text = normalize_plate(&c.text);
            (text.len() >= self.min_len).then(|| TextCandidate::new(text, c.confidence))
        }));

        Ok(best.map(|best| {
            info!(
                plate = %best.text,
                confidence = best.confidence,
                "plate read from lower vehicle crop"
            );
            best.text
        }))
    }
}
