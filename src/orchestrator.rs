//! Per-frame composition of speed estimation, plate identification and
//! annotation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use image::imageops::crop_imm;
use nalgebra as na;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{Config, EvictionConfig};
use crate::detection::{DetectionRecord, TrackedBox};
use crate::error::Error;
use crate::frame::Frame;
use crate::identification::{IdentificationController, PlateRegionDetector, TextRecognizer};
use crate::kinematics::KinematicEstimator;
use crate::render::AnnotationRenderer;
use crate::track::{StreamId, TrackId, TrackKey};

#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    pub records: Vec<DetectionRecord>,
    /// JPEG bytes of the annotated frame, when requested and rendered.
    pub annotated: Option<Vec<u8>>,
}

pub struct FrameOrchestrator {
    estimator: KinematicEstimator,
    identifier: IdentificationController,
    renderer: AnnotationRenderer,
    classes: HashMap<u32, String>,
    eviction: EvictionConfig,
    processed: Mutex<HashMap<StreamId, u64>>,
}

impl FrameOrchestrator {
    pub fn new(
        estimator: KinematicEstimator,
        identifier: IdentificationController,
        renderer: AnnotationRenderer,
        classes: HashMap<u32, String>,
        eviction: EvictionConfig,
    ) -> Self {
        Self {
            estimator,
            identifier,
            renderer,
            classes,
            eviction,
            processed: Mutex::new(HashMap::new()),
        }
    }

    /// Wires every component from `config`. Fails on a degenerate
    /// calibration or an unreadable label font.
    pub fn from_config(
        config: &Config,
        recognizer: Option<Arc<dyn TextRecognizer>>,
        detector: Option<Arc<dyn PlateRegionDetector>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let mapper = Arc::new(config.calibration.mapper()?);
        let estimator = KinematicEstimator::new(mapper, config.kinematics.clone());
        let identifier = IdentificationController::new(
            config.identification.clone(),
            recognizer,
            detector,
            clock,
        );
        let renderer = AnnotationRenderer::new(&config.render)?;

        Ok(Self::new(
            estimator,
            identifier,
            renderer,
            config.classes.clone(),
            config.eviction.clone(),
        ))
    }

    #[inline]
    pub fn estimator(&self) -> &KinematicEstimator {
        &self.estimator
    }

    #[inline]
    pub fn identifier(&self) -> &IdentificationController {
        &self.identifier
    }

    /// One record per box carrying a track id, in input order. Failures are
    /// isolated per track and never fail the frame.
    pub fn process_frame(&self, frame: &Frame, boxes: &[TrackedBox], annotate: bool) -> FrameOutput {
        let records: Vec<_> = boxes
            .iter()
            .filter_map(|tracked| {
                let id = tracked.track_id?;
                Some(self.process_box(frame, tracked, id))
            })
            .collect();

        let annotated = if annotate {
            match self.renderer.render(&frame.image, &records) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!(stream = %frame.stream, frame = frame.index, error = %err, "annotation failed");
                    None
                }
            }
        } else {
            None
        };

        self.count_and_sweep(frame);

        FrameOutput { records, annotated }
    }

    fn process_box(&self, frame: &Frame, tracked: &TrackedBox, id: TrackId) -> DetectionRecord {
        let key = TrackKey::new(frame.stream.clone(), id);
        let mut record = DetectionRecord {
            track_id: id,
            vehicle_class: self.class_name(tracked.class_id),
            confidence: tracked.confidence,
            bbox: tracked.bbox.pixels(),
            plate: None,
            speed_kmh: 0.0,
        };

        if !tracked.bbox.is_finite() {
            let err = Error::MalformedInput(format!("box {:?}", tracked.bbox.as_slice()));
            warn!(stream = %frame.stream, track = %id, error = %err, "skipping track for this frame");
            return record;
        }

        let (x, y) = tracked.bbox.bottom_center();
        match self
            .estimator
            .estimate_speed(&key, na::Point2::new(x as f64, y as f64), frame.index, frame.rate)
        {
            Ok(speed) => record.speed_kmh = speed,
            Err(err) => {
                warn!(stream = %frame.stream, track = %id, error = %err, "speed estimation failed")
            }
        }

        let (width, height) = frame.dims();
        match tracked.bbox.crop_region(width, height) {
            Some((cx, cy, cw, ch)) => {
                let vehicle = crop_imm(&frame.image, cx, cy, cw, ch).to_image();
                record.plate = self.identifier.resolve_plate(&key, &vehicle).into_option();
            }
            None => {
                let err = Error::MalformedInput(format!(
                    "box {:?} has no area inside {}x{}",
                    record.bbox, width, height
                ));
                warn!(stream = %frame.stream, track = %id, error = %err, "plate skipped");
            }
        }

        record
    }

    fn class_name(&self, class_id: u32) -> String {
        self.classes
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn count_and_sweep(&self, frame: &Frame) {
        let interval = self.eviction.sweep_interval_frames;
        if interval == 0 {
            return;
        }

        let due = {
            let mut processed = self.processed.lock().unwrap_or_else(PoisonError::into_inner);
            let count = processed.entry(frame.stream.clone()).or_insert(0);
            *count += 1;
            *count % interval == 0
        };

        if due {
            self.sweep(&frame.stream, frame.index);
        }
    }

    /// Drops state of `stream` tracks idle for longer than the configured
    /// limits. Returns the number of motion and plate entries removed.
    pub fn sweep(&self, stream: &StreamId, current_frame: i64) -> (usize, usize) {
        let motions = self
            .estimator
            .sweep_idle(stream, current_frame, self.eviction.max_idle_frames);
        let plates = self.identifier.sweep_idle(stream, self.eviction.max_idle());

        if motions + plates > 0 {
            debug!(stream = %stream, motions, plates, "evicted idle tracks");
        }

        (motions, plates)
    }

    /// Forgets tracks the tracker reported as ended.
    pub fn end_tracks(&self, stream: &StreamId, ids: &[TrackId]) {
        for &id in ids {
            let key = TrackKey::new(stream.clone(), id);
            let motion = self.estimator.evict(&key);
            let plate = self.identifier.evict(&key);

            if motion || plate {
                debug!(track = %key, "track ended");
            }
        }
    }

    /// Forgets every track of a stream that has stopped.
    pub fn end_stream(&self, stream: &StreamId) {
        let motions = self.estimator.evict_stream(stream);
        let plates = self.identifier.evict_stream(stream);
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stream);

        debug!(stream = %stream, motions, plates, "stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::clock::ManualClock;
    use crate::identification::TextCandidate;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeOcr {
        calls: AtomicUsize,
        text: &'static str,
    }

    impl TextRecognizer for FakeOcr {
        fn read_text(&self, _image: &RgbImage) -> Result<Vec<TextCandidate>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![TextCandidate::new(self.text, 0.9)])
        }
    }

    fn setup(config: &Config, text: &'static str) -> (FrameOrchestrator, Arc<FakeOcr>, Arc<ManualClock>) {
        let ocr = Arc::new(FakeOcr {
            calls: AtomicUsize::new(0),
            text,
        });
        let clock = Arc::new(ManualClock::new());
        let orchestrator =
            FrameOrchestrator::from_config(config, Some(ocr.clone()), None, clock.clone()).unwrap();

        (orchestrator, ocr, clock)
    }

    fn frame(index: i64) -> Frame {
        Frame::new(StreamId::new("cam-a"), index, 30.0, RgbImage::new(1280, 720))
    }

    fn tracked(id: Option<i64>, class_id: u32, bbox: [f32; 4]) -> TrackedBox {
        TrackedBox::new(
            BBox::ltrb(bbox[0], bbox[1], bbox[2], bbox[3]),
            id.map(TrackId),
            class_id,
            0.75,
        )
    }

    #[test]
    fn untracked_boxes_are_skipped() {
        let (orchestrator, _, _) = setup(&Config::default(), "AB1234");

        let out = orchestrator.process_frame(
            &frame(0),
            &[
                tracked(None, 2, [100.0, 400.0, 200.0, 500.0]),
                tracked(Some(4), 7, [300.0, 400.0, 420.0, 520.0]),
                tracked(Some(5), 9, [600.0, 400.0, 700.0, 500.0]),
            ],
            false,
        );

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].track_id, TrackId(4));
        assert_eq!(out.records[0].vehicle_class, "truck");
        assert_eq!(out.records[0].bbox, [300, 400, 420, 520]);
        assert_eq!(out.records[0].speed_kmh, 0.0);
        assert_eq!(out.records[1].vehicle_class, "class_9");
        assert!(out.annotated.is_none());
    }

    #[test]
    fn plates_are_resolved_once_per_track() {
        let (orchestrator, ocr, _) = setup(&Config::default(), "ab-1234");
        let boxes = [tracked(Some(1), 2, [100.0, 400.0, 300.0, 560.0])];

        for index in 0..5 {
            let out = orchestrator.process_frame(&frame(index), &boxes, false);
            assert_eq!(out.records[0].plate.as_deref(), Some("AB1234"));
        }

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unresolved_plates_surface_as_none() {
        let (orchestrator, ocr, _) = setup(&Config::default(), "AB");

        let out = orchestrator.process_frame(
            &frame(0),
            &[tracked(Some(1), 2, [100.0, 400.0, 300.0, 560.0])],
            false,
        );

        assert_eq!(out.records[0].plate, None);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_boxes_do_not_affect_other_tracks() {
        let (orchestrator, ocr, _) = setup(&Config::default(), "AB1234");

        let out = orchestrator.process_frame(
            &frame(0),
            &[
                tracked(Some(1), 2, [f32::NAN, 400.0, 300.0, 560.0]),
                tracked(Some(2), 2, [2000.0, 900.0, 2100.0, 1000.0]),
                tracked(Some(3), 2, [100.0, 400.0, 300.0, 560.0]),
            ],
            false,
        );

        assert_eq!(out.records.len(), 3);
        assert_eq!(out.records[0].plate, None);
        assert_eq!(out.records[1].plate, None);
        assert_eq!(out.records[2].plate.as_deref(), Some("AB1234"));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

        // the NaN box never reached the estimator, the off-frame one did
        let stream = StreamId::new("cam-a");
        assert!(orchestrator.estimator().motion(&TrackKey::new(stream.clone(), TrackId(1))).is_none());
        assert!(orchestrator.estimator().motion(&TrackKey::new(stream, TrackId(2))).is_some());
    }

    #[test]
    fn out_of_range_boxes_do_not_abort_the_frame() {
        let (orchestrator, _, _) = setup(&Config::default(), "AB1234");
        let boxes = [
            tracked(Some(1), 2, [2.0e9, 0.0, 2.1e9, 10.0]),
            tracked(Some(2), 2, [-2.0e9, 0.0, 2.0e9, 10.0]),
            tracked(Some(3), 2, [100.0, 400.0, 300.0, 560.0]),
        ];

        for (index, annotate) in [(0, false), (1, true)] {
            let out = orchestrator.process_frame(&frame(index), &boxes, annotate);

            assert_eq!(out.records.len(), 3);
            assert_eq!(out.records[0].plate, None);
            assert_eq!(out.records[2].plate.as_deref(), Some("AB1234"));
            assert_eq!(out.annotated.is_some(), annotate);
        }
    }

    #[test]
    fn annotation_only_when_requested() {
        let (orchestrator, _, _) = setup(&Config::default(), "AB1234");
        let boxes = [tracked(Some(1), 2, [100.0, 400.0, 300.0, 560.0])];

        let out = orchestrator.process_frame(&frame(0), &boxes, true);
        let bytes = out.annotated.unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        assert!(orchestrator.process_frame(&frame(1), &boxes, false).annotated.is_none());
    }

    #[test]
    fn ended_tracks_are_forgotten() {
        let (orchestrator, _, _) = setup(&Config::default(), "AB1234");
        let stream = StreamId::new("cam-a");

        orchestrator.process_frame(
            &frame(0),
            &[
                tracked(Some(1), 2, [100.0, 400.0, 300.0, 560.0]),
                tracked(Some(2), 2, [500.0, 400.0, 700.0, 560.0]),
            ],
            false,
        );
        orchestrator.end_tracks(&stream, &[TrackId(1), TrackId(42)]);

        assert_eq!(orchestrator.estimator().len(), 1);
        assert_eq!(orchestrator.identifier().len(), 1);
        assert!(orchestrator.identifier().entry(&TrackKey::new(stream.clone(), TrackId(1))).is_none());

        orchestrator.end_stream(&stream);
        assert!(orchestrator.estimator().is_empty());
        assert!(orchestrator.identifier().is_empty());
    }

    #[test]
    fn idle_tracks_are_swept_periodically() {
        let mut config = Config::default();
        config.eviction = EvictionConfig {
            max_idle_frames: 1,
            max_idle_secs: 0.5,
            sweep_interval_frames: 3,
        };
        let (orchestrator, _, clock) = setup(&config, "AB1234");

        let one = tracked(Some(1), 2, [100.0, 400.0, 300.0, 560.0]);
        let two = tracked(Some(2), 2, [500.0, 400.0, 700.0, 560.0]);

        orchestrator.process_frame(&frame(0), &[one, two], false);
        orchestrator.process_frame(&frame(5), &[two], false);
        assert_eq!(orchestrator.estimator().len(), 2);

        clock.advance_secs(1.0);
        orchestrator.process_frame(&frame(6), &[two], false);

        assert_eq!(orchestrator.estimator().len(), 1);
        assert_eq!(orchestrator.identifier().len(), 1);
        assert!(orchestrator
            .identifier()
            .entry(&TrackKey::new(StreamId::new("cam-a"), TrackId(2)))
            .is_some());
    }
}
