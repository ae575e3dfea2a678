use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Degenerate calibration: {0}")]
    DegenerateCalibration(String),

    #[error("Recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("Recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("Recognition timed out after {0:?}")]
    RecognitionTimeout(Duration),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Yaml Error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Base64 Error: {0}")]
    Base64(#[from] base64::DecodeError),
}
