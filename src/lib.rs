//! Per-track state engine for tracked vehicles: ground-plane speed
//! estimation, cached plate identification and frame annotation.

pub mod bbox;
pub mod circular_queue;
pub mod clock;
pub mod config;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod identification;
pub mod kinematics;
pub mod mapper;
pub mod message;
pub mod orchestrator;
pub mod render;
pub mod store;
pub mod track;

pub use bbox::{BBox, Ltrb};
pub use config::Config;
pub use detection::{DetectionRecord, TrackedBox};
pub use error::Error;
pub use frame::Frame;
pub use identification::{IdentificationController, PlateText};
pub use kinematics::KinematicEstimator;
pub use mapper::GroundPlaneMapper;
pub use orchestrator::{FrameOrchestrator, FrameOutput};
pub use track::{StreamId, TrackId, TrackKey};
