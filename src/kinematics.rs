//! Per-track speed estimation on the ground plane.
//!
//! Every observation maps the bottom-center of a box through the
//! [`GroundPlaneMapper`], turns the distance to the previous observation into
//! an instantaneous km/h sample, drops implausible samples and smooths the
//! accepted ones with a trimmed mean over the sorted history. Speeds are only
//! surfaced once a track has been observed long enough to be stable.

use std::sync::Arc;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::circular_queue::CircularQueue;
use crate::error::Error;
use crate::mapper::GroundPlaneMapper;
use crate::store::TrackStore;
use crate::track::{StreamId, TrackKey};

const MS_TO_KMH: f64 = 3.6;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Samples at or below this speed are treated as jitter.
    pub min_speed_kmh: f64,
    /// Samples at or above this speed are treated as tracking jumps.
    pub max_speed_kmh: f64,
    pub history_capacity: usize,
    /// Display ceiling applied to the smoothed speed.
    pub display_ceiling_kmh: f64,
    /// History length above which the trimmed mean is used.
    pub trim_threshold: usize,
    /// Number of central sorted samples averaged by the trimmed mean.
    pub trim_window: usize,
    pub min_stable_frames: i64,
    pub min_accepted_samples: u32,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            min_speed_kmh: 5.0,
            max_speed_kmh: 220.0,
            history_capacity: 25,
            display_ceiling_kmh: 160.0,
            trim_threshold: 15,
            trim_window: 10,
            min_stable_frames: 15,
            min_accepted_samples: 8,
        }
    }
}

/// Motion state of one track.
#[derive(Debug, Clone)]
pub struct TrackMotion {
    pub last_frame_index: i64,
    pub last_ground_position: na::Point2<f64>,
    pub speed_history: CircularQueue<f64>,
    /// Smoothed, rounded and clamped speed in km/h.
    pub current_speed: f64,
    /// Sum of the frame gaps spanned by accepted samples.
    pub stable_frame_count: i64,
    pub accepted_sample_count: u32,
}

impl TrackMotion {
    pub fn new(frame_index: i64, position: na::Point2<f64>, config: &KinematicsConfig) -> Self {
        Self {
            last_frame_index: frame_index,
            last_ground_position: position,
            speed_history: CircularQueue::with_capacity(config.history_capacity),
            current_speed: 0.0,
            stable_frame_count: 0,
            accepted_sample_count: 0,
        }
    }

    /// Feeds a new ground position and returns the speed to report.
    pub fn observe(
        &mut self,
        position: na::Point2<f64>,
        frame_index: i64,
        frame_rate: f64,
        config: &KinematicsConfig,
    ) -> f64 {
        let frames_elapsed = frame_index - self.last_frame_index;
        if frames_elapsed <= 0 {
            return self.current_speed;
        }

        let distance = na::distance(&position, &self.last_ground_position);
        let time_elapsed = frames_elapsed as f64 / frame_rate;
        let inst_speed = distance / time_elapsed * MS_TO_KMH;

        // NaN fails both comparisons and is dropped with the outliers.
        if inst_speed > config.min_speed_kmh && inst_speed < config.max_speed_kmh {
            self.speed_history.push(inst_speed);
            self.current_speed = smoothed_speed(&self.speed_history, config);
            self.stable_frame_count += frames_elapsed;
            self.accepted_sample_count += 1;
        } else {
            debug!(inst_speed, frames_elapsed, "rejected speed sample");
        }

        self.last_ground_position = position;
        self.last_frame_index = frame_index;

        self.reported_speed(config)
    }

    #[inline]
    pub fn is_stable(&self, config: &KinematicsConfig) -> bool {
        self.stable_frame_count >= config.min_stable_frames
            && self.accepted_sample_count >= config.min_accepted_samples
    }

    /// `current_speed` once the track is stable, 0 before.
    #[inline]
    pub fn reported_speed(&self, config: &KinematicsConfig) -> f64 {
        if self.is_stable(config) {
            self.current_speed
        } else {
            0.0
        }
    }
}

/// Trimmed mean of the sorted history: with more than `trim_threshold`
/// samples only the `trim_window` samples around the median are averaged,
/// otherwise all of them. Rounded to 0.1 km/h and capped at the display
/// ceiling.
pub fn smoothed_speed(history: &CircularQueue<f64>, config: &KinematicsConfig) -> f64 {
    let sorted = history.sorted();
    if sorted.is_empty() {
        return 0.0;
    }

    let window = if sorted.len() > config.trim_threshold && config.trim_window > 0 {
        let mid = sorted.len() / 2;
        let lo = mid.saturating_sub(config.trim_window / 2);
        let hi = (lo + config.trim_window).min(sorted.len());

        &sorted[lo..hi]
    } else {
        &sorted[..]
    };

    let avg = window.iter().sum::<f64>() / window.len() as f64;
    let rounded = (avg * 10.0).round() / 10.0;

    rounded.clamp(0.0, config.display_ceiling_kmh)
}

pub struct KinematicEstimator {
    mapper: Arc<GroundPlaneMapper>,
    config: KinematicsConfig,
    tracks: TrackStore<TrackMotion>,
}

impl KinematicEstimator {
    pub fn new(mapper: Arc<GroundPlaneMapper>, config: KinematicsConfig) -> Self {
        Self {
            mapper,
            config,
            tracks: TrackStore::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &KinematicsConfig {
        &self.config
    }

    #[inline]
    pub fn mapper(&self) -> &GroundPlaneMapper {
        &self.mapper
    }

    /// Speed in km/h for `key` observed at `image_point` in frame
    /// `frame_index`. The first observation of a track only records a
    /// baseline and returns 0.
    pub fn estimate_speed(
        &self,
        key: &TrackKey,
        image_point: na::Point2<f64>,
        frame_index: i64,
        frame_rate: f64,
    ) -> Result<f64, Error> {
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(Error::MalformedInput(format!(
                "frame rate must be positive, got {}",
                frame_rate
            )));
        }
        if !(image_point.x.is_finite() && image_point.y.is_finite()) {
            return Err(Error::MalformedInput(format!(
                "image point must be finite, got {}",
                image_point
            )));
        }

        let position = self.mapper.map_to_ground(image_point);
        let config = &self.config;

        Ok(self.tracks.with_entry(
            key,
            || TrackMotion::new(frame_index, position, config),
            |motion, created| {
                if created {
                    debug!(track = %key, "new track baseline");
                    0.0
                } else {
                    motion.observe(position, frame_index, frame_rate, config)
                }
            },
        ))
    }

    pub fn motion(&self, key: &TrackKey) -> Option<TrackMotion> {
        self.tracks.get_cloned(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn evict(&self, key: &TrackKey) -> bool {
        self.tracks.remove(key)
    }

    pub fn evict_stream(&self, stream: &StreamId) -> usize {
        self.tracks.remove_stream(stream)
    }

    /// Drops tracks of `stream` not observed for more than `max_idle_frames`.
    pub fn sweep_idle(&self, stream: &StreamId, current_frame: i64, max_idle_frames: i64) -> usize {
        self.tracks.retain(|key, motion| {
            &key.stream != stream || current_frame - motion.last_frame_index <= max_idle_frames
        })
    }
}
