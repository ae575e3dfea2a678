use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approx::assert_abs_diff_eq;
use image::RgbImage;
use nalgebra as na;
use roadwatch::bbox::{BBox, Ltrb};
use roadwatch::clock::ManualClock;
use roadwatch::config::EvictionConfig;
use roadwatch::identification::{
    IdentificationConfig, IdentificationController, PlateRegionDetector, TextCandidate,
    TextRecognizer,
};
use roadwatch::kinematics::{KinematicEstimator, KinematicsConfig};
use roadwatch::render::{AnnotationRenderer, RenderConfig};
use roadwatch::{Error, Frame, FrameOrchestrator, GroundPlaneMapper, StreamId, TrackId, TrackKey, TrackedBox};

const FPS: f64 = 30.0;

/// 10 px per meter over a 10 m x 30 m lane.
fn lane_mapper() -> Arc<GroundPlaneMapper> {
    Arc::new(
        GroundPlaneMapper::new(
            [[0.0, 0.0], [100.0, 0.0], [100.0, 300.0], [0.0, 300.0]],
            [[0.0, 0.0], [10.0, 0.0], [10.0, 30.0], [0.0, 30.0]],
        )
        .unwrap(),
    )
}

struct FakeOcr {
    calls: AtomicUsize,
    reply: Mutex<(&'static str, f32)>,
}

impl FakeOcr {
    fn new(text: &'static str, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Mutex::new((text, confidence)),
        })
    }

    fn reply_with(&self, text: &'static str, confidence: f32) {
        *self.reply.lock().unwrap() = (text, confidence);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextRecognizer for FakeOcr {
    fn read_text(&self, _image: &RgbImage) -> Result<Vec<TextCandidate>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (text, confidence) = *self.reply.lock().unwrap();
        Ok(vec![TextCandidate::new(text, confidence)])
    }
}

/// Reports the lower third of every crop as a plate.
struct LowerThird;

impl PlateRegionDetector for LowerThird {
    fn detect_plates(&self, image: &RgbImage) -> Result<Vec<BBox<Ltrb>>, Error> {
        let (w, h) = image.dimensions();
        Ok(vec![BBox::ltrb(0.0, h as f32 * 2.0 / 3.0, w as f32, h as f32)])
    }
}

fn orchestrator(
    recognizer: Option<Arc<FakeOcr>>,
    clock: Arc<ManualClock>,
) -> FrameOrchestrator {
    let estimator = KinematicEstimator::new(lane_mapper(), KinematicsConfig::default());
    let identifier = IdentificationController::new(
        IdentificationConfig::default(),
        recognizer.map(|r| r as Arc<dyn TextRecognizer>),
        Some(Arc::new(LowerThird)),
        clock,
    );

    FrameOrchestrator::new(
        estimator,
        identifier,
        AnnotationRenderer::new(&RenderConfig::default()).unwrap(),
        [(2, "car".to_string())].into_iter().collect(),
        EvictionConfig::default(),
    )
}

/// A 20 px wide box whose bottom-center sits at `(50, bottom)`.
fn vehicle(id: i64, bottom: f32) -> TrackedBox {
    TrackedBox::new(BBox::ltrb(40.0, bottom - 20.0, 60.0, bottom), Some(TrackId(id)), 2, 0.8)
}

fn frame(stream: &str, index: i64) -> Frame {
    Frame::new(StreamId::new(stream), index, FPS, RgbImage::new(100, 300))
}

#[test]
fn lane_vehicle_settles_near_108_kmh() {
    let estimator = KinematicEstimator::new(lane_mapper(), KinematicsConfig::default());
    let key = TrackKey::new(StreamId::new("cam"), TrackId(1));

    // 1 m per frame at 30 fps
    assert_eq!(
        estimator.estimate_speed(&key, na::Point2::new(50.0, 0.0), 0, FPS).unwrap(),
        0.0
    );

    for i in 1..=25i64 {
        let speed = estimator
            .estimate_speed(&key, na::Point2::new(50.0, 10.0 * i as f64), i, FPS)
            .unwrap();

        let motion = estimator.motion(&key).unwrap();
        assert_abs_diff_eq!(*motion.speed_history.newest().unwrap(), 108.0, epsilon = 1e-6);
        assert!(motion.speed_history.len() <= 25);

        if i < 15 {
            assert_eq!(speed, 0.0, "reported before stabilization at frame {}", i);
        } else {
            assert_abs_diff_eq!(speed, 108.0, epsilon = 0.1);
        }
    }
}

#[test]
fn stationary_vehicle_never_moves() {
    let estimator = KinematicEstimator::new(lane_mapper(), KinematicsConfig::default());
    let key = TrackKey::new(StreamId::new("cam"), TrackId(1));

    for i in 0..40 {
        let speed = estimator
            .estimate_speed(&key, na::Point2::new(50.0, 150.0), i, FPS)
            .unwrap();
        assert_eq!(speed, 0.0);
    }

    let motion = estimator.motion(&key).unwrap();
    assert_eq!(motion.current_speed, 0.0);
    assert_eq!(motion.speed_history.len(), 0);
    assert_eq!(motion.accepted_sample_count, 0);
}

#[test]
fn repeated_frame_index_keeps_speed_and_history() {
    let estimator = KinematicEstimator::new(lane_mapper(), KinematicsConfig::default());
    let key = TrackKey::new(StreamId::new("cam"), TrackId(1));

    for i in 0..=20i64 {
        estimator
            .estimate_speed(&key, na::Point2::new(50.0, 10.0 * i as f64), i, FPS)
            .unwrap();
    }
    let before = estimator.motion(&key).unwrap();

    let speed = estimator
        .estimate_speed(&key, na::Point2::new(50.0, 290.0), 20, FPS)
        .unwrap();
    let after = estimator.motion(&key).unwrap();

    assert_eq!(speed, before.current_speed);
    assert_eq!(after.speed_history.len(), before.speed_history.len());
    assert_eq!(after.last_frame_index, 20);
}

#[test]
fn plate_is_read_once_through_the_orchestrator() {
    let ocr = FakeOcr::new("AB1234", 0.9);
    let orch = orchestrator(Some(ocr.clone()), Arc::new(ManualClock::new()));

    for i in 0..10 {
        let out = orch.process_frame(&frame("cam", i), &[vehicle(3, 100.0 + 10.0 * i as f32)], false);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].plate.as_deref(), Some("AB1234"));
        assert_eq!(out.records[0].vehicle_class, "car");
    }

    assert_eq!(ocr.calls(), 1);
}

#[test]
fn noisy_plate_text_is_normalized() {
    let ocr = FakeOcr::new("a-b 1234!", 0.9);
    let orch = orchestrator(Some(ocr), Arc::new(ManualClock::new()));

    let out = orch.process_frame(&frame("cam", 0), &[vehicle(3, 100.0)], false);

    assert_eq!(out.records[0].plate.as_deref(), Some("AB1234"));
}

#[test]
fn failed_reads_are_retried_after_two_seconds() {
    let ocr = FakeOcr::new("", 0.1);
    let clock = Arc::new(ManualClock::new());
    let orch = orchestrator(Some(ocr.clone()), clock.clone());

    let out = orch.process_frame(&frame("cam", 0), &[vehicle(3, 100.0)], false);
    assert_eq!(out.records[0].plate, None);
    let first = ocr.calls();
    assert!(first > 0);

    ocr.reply_with("XY9876", 0.9);

    clock.advance(Duration::from_secs(1));
    let out = orch.process_frame(&frame("cam", 30), &[vehicle(3, 110.0)], false);
    assert_eq!(out.records[0].plate, None);
    assert_eq!(ocr.calls(), first);

    clock.advance(Duration::from_secs(1));
    let out = orch.process_frame(&frame("cam", 60), &[vehicle(3, 120.0)], false);
    assert_eq!(out.records[0].plate.as_deref(), Some("XY9876"));
    assert!(ocr.calls() > first);
}

#[test]
fn missing_recognizer_degrades_to_unresolved() {
    let orch = orchestrator(None, Arc::new(ManualClock::new()));
    assert!(!orch.identifier().is_available());

    for i in 0..20 {
        let out = orch.process_frame(&frame("cam", i), &[vehicle(3, 100.0 + 10.0 * i as f32)], false);
        assert_eq!(out.records[0].plate, None);
    }
}

#[test]
fn same_track_id_on_two_streams_is_independent() {
    let orch = orchestrator(None, Arc::new(ManualClock::new()));

    let mut moving = 0.0;
    let mut parked = 0.0;
    for i in 0..20 {
        let out = orch.process_frame(&frame("north", i), &[vehicle(1, 50.0 + 10.0 * i as f32)], false);
        moving = out.records[0].speed_kmh;

        let out = orch.process_frame(&frame("south", i), &[vehicle(1, 150.0)], false);
        parked = out.records[0].speed_kmh;
    }

    assert_abs_diff_eq!(moving, 108.0, epsilon = 0.1);
    assert_eq!(parked, 0.0);
    assert_eq!(orch.estimator().len(), 2);
}
