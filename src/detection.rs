use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::track::TrackId;

/// One detector/tracker output box. Boxes without a `track_id` are
/// unconfirmed detections and are ignored by the state engines.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrackedBox {
    #[serde(rename = "box")]
    pub bbox: BBox<Ltrb>,
    #[serde(default)]
    pub track_id: Option<TrackId>,
    #[serde(rename = "class")]
    pub class_id: u32,
    #[serde(rename = "p")]
    pub confidence: f32,
}

impl TrackedBox {
    pub fn new(bbox: BBox<Ltrb>, track_id: Option<TrackId>, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            track_id,
            class_id,
            confidence,
        }
    }
}

/// Enriched per-object record. `plate` is `None` while recognition has not
/// produced a read for the track.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub track_id: TrackId,
    pub vehicle_class: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
    pub plate: Option<String>,
    pub speed_kmh: f64,
}
