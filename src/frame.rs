use image::RgbImage;

use crate::error::Error;
use crate::track::StreamId;

pub struct Frame {
    pub stream: StreamId,
    pub index: i64,
    /// Frames per second of the source, used to turn frame gaps into time.
    pub rate: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(stream: StreamId, index: i64, rate: f64, image: RgbImage) -> Self {
        Self {
            stream,
            index,
            rate,
            image,
        }
    }

    /// Decodes an encoded (JPEG, PNG, ...) frame.
    pub fn decode(stream: StreamId, index: i64, rate: f64, bytes: &[u8]) -> Result<Self, Error> {
        let image = image::load_from_memory(bytes)?.to_rgb8();

        Ok(Self::new(stream, index, rate, image))
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
