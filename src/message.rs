//! JSON messages exchanged with the frame broker.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::detection::{DetectionRecord, TrackedBox};
use crate::error::Error;
use crate::frame::Frame;
use crate::track::{StreamId, TrackId};

fn default_frame_rate() -> f64 {
    30.0
}

/// Raw frame published by a drone, with the tracker's boxes for it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameMessage {
    #[serde(default)]
    pub drone_id: Option<String>,
    pub stream_id: String,
    /// Passed through to every event untouched.
    #[serde(default)]
    pub timestamp: Option<Value>,
    pub frame_number: i64,
    /// Base64 encoded JPEG.
    #[serde(default)]
    pub frame_data: Option<String>,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    #[serde(default)]
    pub gps: Map<String, Value>,
    #[serde(default)]
    pub boxes: Vec<TrackedBox>,
    /// Tracks the tracker stopped following with this frame.
    #[serde(default)]
    pub ended_tracks: Vec<TrackId>,
}

impl FrameMessage {
    /// Messages without image data carry nothing to process.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frame_data.as_deref().map_or(true, str::is_empty)
    }

    #[inline]
    pub fn stream(&self) -> StreamId {
        StreamId::new(&self.stream_id)
    }

    pub fn decode_frame(&self) -> Result<Frame, Error> {
        let data = self
            .frame_data
            .as_deref()
            .filter(|data| !data.is_empty())
            .ok_or_else(|| Error::MalformedInput(format!("frame {} has no data", self.frame_number)))?;
        let bytes = STANDARD.decode(data)?;

        Frame::decode(self.stream(), self.frame_number, self.frame_rate, &bytes)
    }
}

/// One enriched vehicle observation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub drone_id: Option<String>,
    pub stream_id: String,
    pub timestamp: Option<Value>,
    pub frame_number: i64,
    pub vehicle_type: String,
    pub confidence: f32,
    pub box_coordinates: [i32; 4],
    pub license_plate: Option<String>,
    pub speed: f64,
    pub track_id: TrackId,
    pub location: Map<String, Value>,
}

impl DetectionEvent {
    pub fn new(message: &FrameMessage, record: DetectionRecord) -> Self {
        Self {
            drone_id: message.drone_id.clone(),
            stream_id: message.stream_id.clone(),
            timestamp: message.timestamp.clone(),
            frame_number: message.frame_number,
            vehicle_type: record.vehicle_class,
            confidence: record.confidence,
            box_coordinates: record.bbox,
            license_plate: record.plate,
            speed: record.speed_kmh,
            track_id: record.track_id,
            location: message.gps.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnnotatedFrameEvent {
    pub drone_id: Option<String>,
    pub stream_id: String,
    pub timestamp: Option<Value>,
    pub frame_number: i64,
    /// Base64 encoded JPEG.
    pub frame_data: String,
}

impl AnnotatedFrameEvent {
    pub fn new(message: &FrameMessage, jpeg: &[u8]) -> Self {
        Self {
            drone_id: message.drone_id.clone(),
            stream_id: message.stream_id.clone(),
            timestamp: message.timestamp.clone(),
            frame_number: message.frame_number,
            frame_data: STANDARD.encode(jpeg),
        }
    }
}

/// Everything produced for one frame message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Detection(DetectionEvent),
    AnnotatedFrame(AnnotatedFrameEvent),
}
