//! Plate identification with a per-track cache.
//!
//! A successful read is kept for the lifetime of the track. Tracks without a
//! read are retried at most once per `retry_interval_secs`, and each attempt
//! runs the configured [`RecognitionStrategy`] chain. With a timeout set the
//! chain runs on a [`RecognitionPool`] so one hung recognizer cannot stall
//! the frame loop.

pub mod ocr;
pub mod pool;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{saturating_secs, Clock};
use crate::error::Error;
use crate::store::TrackStore;
use crate::track::{StreamId, TrackKey};

pub use ocr::{normalize_plate, PlateRegionDetector, TextCandidate, TextRecognizer};
pub use pool::RecognitionPool;
pub use strategy::{run_strategies, LowerCropStrategy, PlateRegionStrategy, RecognitionStrategy};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IdentificationConfig {
    /// Minimum time between two attempts for a track without a read.
    pub retry_interval_secs: f64,
    pub region_min_confidence: f32,
    pub fallback_min_len: usize,
    /// Fraction of the vehicle height where the fallback read area starts.
    pub fallback_crop_start: f32,
    /// Upper bound for one recognition attempt; unbounded and run on the
    /// calling thread when unset.
    pub timeout_ms: Option<u64>,
    /// Recognition threads used for bounded attempts.
    pub recognition_workers: usize,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 2.0,
            region_min_confidence: 0.3,
            fallback_min_len: 5,
            fallback_crop_start: 0.4,
            timeout_ms: Some(2000),
            recognition_workers: 2,
        }
    }
}

impl IdentificationConfig {
    #[inline]
    pub fn retry_interval(&self) -> Duration {
        saturating_secs(self.retry_interval_secs)
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlateText {
    Resolved(String),
    /// No read yet for this track.
    Unresolved,
}

impl PlateText {
    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self, PlateText::Resolved(_))
    }

    #[inline]
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            PlateText::Resolved(text) => Some(text),
            PlateText::Unresolved => None,
        }
    }

    #[inline]
    pub fn into_option(self) -> Option<String> {
        match self {
            PlateText::Resolved(text) => Some(text),
            PlateText::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlateCacheEntry {
    pub text: PlateText,
    pub last_attempt_time: Duration,
    /// Last time the track asked for its plate, used for idle eviction.
    pub last_seen: Duration,
    pub attempts: u32,
}

impl PlateCacheEntry {
    fn new(now: Duration) -> Self {
        Self {
            text: PlateText::Unresolved,
            last_attempt_time: now,
            last_seen: now,
            attempts: 0,
        }
    }
}

pub struct IdentificationController {
    strategies: Arc<[Box<dyn RecognitionStrategy>]>,
    pool: Option<RecognitionPool>,
    config: IdentificationConfig,
    clock: Arc<dyn Clock>,
    cache: TrackStore<PlateCacheEntry>,
}

impl IdentificationController {
    /// Builds the standard chain: plate-region reads when a detector is
    /// given, then lower-crop reads. Without a recognizer no plate is ever
    /// resolved.
    pub fn new(
        config: IdentificationConfig,
        recognizer: Option<Arc<dyn TextRecognizer>>,
        detector: Option<Arc<dyn PlateRegionDetector>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn RecognitionStrategy>> = Vec::new();

        match recognizer {
            Some(recognizer) => {
                match detector {
                    Some(detector) => strategies.push(Box::new(PlateRegionStrategy::new(
                        detector,
                        recognizer.clone(),
                        config.region_min_confidence,
                    ))),
                    None => info!("no plate region detector, reading lower vehicle crops only"),
                }

                strategies.push(Box::new(LowerCropStrategy::new(
                    recognizer,
                    config.fallback_crop_start,
                    config.fallback_min_len,
                )));
            }
            None => {
                let err = Error::RecognitionUnavailable("no text recognizer configured".into());
                warn!(error = %err, "plate identification disabled");
            }
        }

        Self::with_strategies(config, strategies, clock)
    }

    pub fn with_strategies(
        config: IdentificationConfig,
        strategies: Vec<Box<dyn RecognitionStrategy>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let strategies: Arc<[Box<dyn RecognitionStrategy>]> = strategies.into();

        let pool = match config.timeout() {
            Some(_) if !strategies.is_empty() => {
                match RecognitionPool::start(strategies.clone(), config.recognition_workers) {
                    Ok(pool) => Some(pool),
                    Err(err) => {
                        warn!(error = %err, "recognition workers unavailable, attempts run unbounded");
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            strategies,
            pool,
            config,
            clock,
            cache: TrackStore::new(),
        }
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        !self.strategies.is_empty()
    }

    #[inline]
    pub fn config(&self) -> &IdentificationConfig {
        &self.config
    }

    /// Plate text for `key`, reading `vehicle` only when the cache has no
    /// read and the retry interval has passed. Never fails: recognition
    /// errors and timeouts count as attempts without a read.
    pub fn resolve_plate(&self, key: &TrackKey, vehicle: &RgbImage) -> PlateText {
        let now = self.clock.now();
        let retry = self.config.retry_interval();

        self.cache
            .with_entry(key, || PlateCacheEntry::new(now), |entry, created| {
                entry.last_seen = now;

                if entry.text.is_resolved() {
                    return entry.text.clone();
                }
                if !created && now.saturating_sub(entry.last_attempt_time) < retry {
                    return PlateText::Unresolved;
                }

                let result = self.attempt(vehicle);
                entry.last_attempt_time = now;
                entry.attempts += 1;

                match result {
                    Ok(Some(text)) => {
                        debug!(track = %key, plate = %text, "plate resolved");
                        entry.text = PlateText::Resolved(text);
                        entry.text.clone()
                    }
                    Ok(None) => PlateText::Unresolved,
                    Err(err) => {
                        warn!(track = %key, error = %err, "plate recognition attempt failed");
                        PlateText::Unresolved
                    }
                }
            })
    }

    fn attempt(&self, vehicle: &RgbImage) -> Result<Option<String>, Error> {
        match (&self.pool, self.config.timeout()) {
            (Some(pool), Some(limit)) => pool.recognize(vehicle, limit),
            _ => run_strategies(&self.strategies, vehicle),
        }
    }

    pub fn entry(&self, key: &TrackKey) -> Option<PlateCacheEntry> {
        self.cache.get_cloned(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn evict(&self, key: &TrackKey) -> bool {
        self.cache.remove(key)
    }

    pub fn evict_stream(&self, stream: &StreamId) -> usize {
        self.cache.remove_stream(stream)
    }

    /// Drops entries of `stream` whose track has not asked for its plate
    /// within `max_idle`.
    pub fn sweep_idle(&self, stream: &StreamId, max_idle: Duration) -> usize {
        let now = self.clock.now();

        self.cache.retain(|key, entry| {
            &key.stream != stream || now.saturating_sub(entry.last_seen) <= max_idle
        })
    }
}
