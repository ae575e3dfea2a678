use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::clock::saturating_secs;
use crate::error::Error;
use crate::identification::IdentificationConfig;
use crate::kinematics::KinematicsConfig;
use crate::mapper::GroundPlaneMapper;
use crate::render::RenderConfig;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Image-space corners of the calibrated road region, in pixels.
    pub source: [[f64; 2]; 4],
    /// Matching ground-plane corners, in meters.
    pub target: [[f64; 2]; 4],
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            source: [[450.0, 450.0], [850.0, 450.0], [1280.0, 720.0], [0.0, 720.0]],
            target: [[0.0, 0.0], [12.0, 0.0], [12.0, 50.0], [0.0, 50.0]],
        }
    }
}

impl CalibrationConfig {
    pub fn mapper(&self) -> Result<GroundPlaneMapper, Error> {
        GroundPlaneMapper::new(self.source, self.target)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EvictionConfig {
    /// Frames without an observation after which a motion entry is dropped.
    pub max_idle_frames: i64,
    /// Seconds without a lookup after which a plate entry is dropped.
    pub max_idle_secs: f64,
    /// Sweep each stream every this many processed frames; 0 disables it.
    pub sweep_interval_frames: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_idle_frames: 300,
            max_idle_secs: 30.0,
            sweep_interval_frames: 150,
        }
    }
}

impl EvictionConfig {
    pub fn max_idle(&self) -> Duration {
        saturating_secs(self.max_idle_secs)
    }
}

fn coco_vehicle_classes() -> HashMap<u32, String> {
    [(2, "car"), (3, "motorcycle"), (5, "bus"), (7, "truck")]
        .into_iter()
        .map(|(id, name)| (id, name.to_string()))
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub calibration: CalibrationConfig,
    pub kinematics: KinematicsConfig,
    pub identification: IdentificationConfig,
    pub render: RenderConfig,
    pub eviction: EvictionConfig,
    /// Detector class id to vehicle class name.
    pub classes: HashMap<u32, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calibration: CalibrationConfig::default(),
            kinematics: KinematicsConfig::default(),
            identification: IdentificationConfig::default(),
            render: RenderConfig::default(),
            eviction: EvictionConfig::default(),
            classes: coco_vehicle_classes(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;

        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_mapper() {
        let config = Config::default();

        assert!(config.calibration.mapper().is_ok());
        assert_eq!(config.classes.get(&2).map(String::as_str), Some("car"));
        assert_eq!(config.classes.get(&7).map(String::as_str), Some("truck"));
        assert_eq!(config.eviction.max_idle(), Duration::from_secs(30));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = Config::from_yaml(
            r#"
kinematics:
  max_speed_kmh: 180
identification:
  retry_interval_secs: 0.5
  timeout_ms: 250
classes:
  1: bicycle
"#,
        )
        .unwrap();

        assert_eq!(config.kinematics.max_speed_kmh, 180.0);
        assert_eq!(config.kinematics.history_capacity, 25);
        assert_eq!(config.identification.retry_interval(), Duration::from_millis(500));
        assert_eq!(config.identification.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.render, RenderConfig::default());
        assert_eq!(config.classes.len(), 1);
        assert_eq!(config.calibration, CalibrationConfig::default());
    }

    #[test]
    fn infinite_intervals_saturate() {
        let config = Config::from_yaml(
            r#"
identification:
  retry_interval_secs: .inf
eviction:
  max_idle_secs: .inf
"#,
        )
        .unwrap();

        assert_eq!(config.identification.retry_interval(), Duration::MAX);
        assert_eq!(config.eviction.max_idle(), Duration::MAX);
    }

    #[test]
    fn degenerate_calibration_is_rejected() {
        let config = Config::from_yaml(
            r#"
calibration:
  source: [[0, 0], [10, 0], [20, 0], [0, 10]]
"#,
        )
        .unwrap();

        assert!(matches!(
            config.calibration.mapper(),
            Err(Error::DegenerateCalibration(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/roadwatch.yaml"),
            Err(Error::Io(_))
        ));
    }
}
