// src/pipeline/processor.rs
//
// One processing cycle over a dequeued frame:
//
//   frame-skip gate
//   → ROI crop + resize → detector → rescale / filter
//   → per box: identity match → type resolution → residue score → lifecycle
//   → on finalization: cooldown gate → label → sink + latest + subscribers
//   → tracker housekeeping
//
// The processor owns all tracking state and is driven by exactly one
// thread.

use super::latest::LatestResult;
use super::metrics::{CycleTimings, PipelineMetrics, StageTimings};
use crate::analysis::{classify, ResidueAnalyzer};
use crate::detection::{prepare_frame, rescale_and_filter, DetectionOracle};
use crate::sink::{ResultSink, StoreOutcome};
use crate::tracking::{Finalization, IdentityTracker, Observation, TypeCooldown};
use crate::types::{
    Classification, ClassificationResult, Config, DetectionBox, Frame, UNKNOWN_WASTE_TYPE,
};
use chrono::Local;
use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("frame {sequence} has no pixels")]
    EmptyFrame { sequence: u64 },
    #[error("storing result {id} failed: {reason:#}")]
    Sink { id: String, reason: anyhow::Error },
}

/// What one call to `process_*` did
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub skipped: bool,
    pub detections: usize,
    pub results: Vec<Arc<ClassificationResult>>,
    pub suppressed: usize,
    pub lost: usize,
    pub expired: usize,
}

pub struct FrameProcessor {
    config: Config,
    oracle: Box<dyn DetectionOracle>,
    tracker: IdentityTracker,
    residue: ResidueAnalyzer,
    cooldown: TypeCooldown,
    sink: Box<dyn ResultSink>,
    subscribers: Vec<Sender<Arc<ClassificationResult>>>,
    latest: LatestResult,
    metrics: PipelineMetrics,
    timings: StageTimings,
    epoch: Instant,
    dequeued: u64,
}

impl FrameProcessor {
    pub fn new(
        config: Config,
        oracle: Box<dyn DetectionOracle>,
        sink: Box<dyn ResultSink>,
    ) -> Self {
        let tracker = IdentityTracker::new(config.tracking.clone());
        Self::with_tracker(config, oracle, sink, tracker)
    }

    /// Same as `new` with a caller-built tracker (e.g. seeded ids)
    pub fn with_tracker(
        config: Config,
        oracle: Box<dyn DetectionOracle>,
        sink: Box<dyn ResultSink>,
        tracker: IdentityTracker,
    ) -> Self {
        let residue = ResidueAnalyzer::new(config.residue.clone());
        let cooldown = TypeCooldown::new(config.tracking.type_cooldown_secs);
        let timings = StageTimings::new(
            config.pipeline.metrics_window,
            config.pipeline.metrics_report_every,
        );
        Self {
            config,
            oracle,
            tracker,
            residue,
            cooldown,
            sink,
            subscribers: Vec::new(),
            latest: LatestResult::new(),
            metrics: PipelineMetrics::new(),
            timings,
            epoch: Instant::now(),
            dequeued: 0,
        }
    }

    /// Share counters with an outer runtime instead of owning fresh ones
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Use `epoch` as time zero for frame timestamps
    pub fn with_epoch(mut self, epoch: Instant) -> Self {
        self.epoch = epoch;
        self
    }

    /// Receive every emitted result. Dropped receivers are pruned.
    pub fn subscribe(&mut self) -> Receiver<Arc<ClassificationResult>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn latest(&self) -> LatestResult {
        self.latest.clone()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }

    pub fn tracker(&self) -> &IdentityTracker {
        &self.tracker
    }

    /// Process a dequeued frame, honouring the frame-skip setting. Frame
    /// time is measured from the processor epoch.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<CycleOutcome, CycleError> {
        self.dequeued += 1;
        let every = self.config.pipeline.frame_skip as u64 + 1;
        if self.dequeued % every != 0 {
            self.metrics.inc(&self.metrics.frames_skipped);
            return Ok(CycleOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        if frame.image.width() == 0 || frame.image.height() == 0 {
            return Err(CycleError::EmptyFrame {
                sequence: frame.sequence,
            });
        }

        let now = frame
            .captured_at
            .saturating_duration_since(self.epoch)
            .as_secs_f64();
        self.process_at(&frame.image, now)
    }

    /// Run one full cycle on `image` at time `now` (seconds). Bypasses
    /// frame skipping.
    pub fn process_at(&mut self, image: &RgbImage, now: f64) -> Result<CycleOutcome, CycleError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(CycleError::EmptyFrame { sequence: 0 });
        }

        let cycle_start = Instant::now();
        let mut timings = CycleTimings::default();

        let prepared = prepare_frame(image, self.config.camera.roi, self.oracle.input_size());
        timings.preprocess_ms = cycle_start.elapsed().as_secs_f64() * 1000.0;

        let infer_start = Instant::now();
        let raw = match self.oracle.detect(&prepared.input) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Detector failed, treating frame as empty: {:#}", e);
                Vec::new()
            }
        };
        timings.inference_ms = infer_start.elapsed().as_secs_f64() * 1000.0;

        let post_start = Instant::now();
        let boxes = rescale_and_filter(&raw, &prepared, &self.config.detection);

        let mut outcome = CycleOutcome {
            detections: boxes.len(),
            ..Default::default()
        };
        self.metrics.inc(&self.metrics.frames_processed);
        self.metrics
            .add(&self.metrics.detections, boxes.len() as u64);

        let mut failure = None;
        for det in &boxes {
            if let Err(e) = self.handle_detection(det, &prepared.crop, now, &mut outcome) {
                // Keep going so every track still sees this cycle
                warn!("{}", e);
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }

        let housekeeping = self.tracker.end_cycle(now);
        outcome.lost = housekeeping.lost.len();
        outcome.expired = housekeeping.expired.len();

        timings.postprocess_ms = post_start.elapsed().as_secs_f64() * 1000.0;
        timings.total_ms = cycle_start.elapsed().as_secs_f64() * 1000.0;
        let confidences: Vec<f32> = boxes.iter().map(|d| d.confidence).collect();
        self.timings.record(timings, &confidences);

        match failure {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    fn handle_detection(
        &mut self,
        det: &DetectionBox,
        crop: &RgbImage,
        now: f64,
        outcome: &mut CycleOutcome,
    ) -> Result<(), CycleError> {
        let id = self.tracker.assign(det, now);
        let waste_type = self
            .tracker
            .get_track(&id)
            .and_then(|track| self.resolve_waste_type(det, track.class_id));

        let (contamination, residue_ok) = match self.residue.analyze_region(crop, det) {
            Ok(score) => (score, true),
            Err(e) => {
                warn!("Residue analysis failed for track {}: {}", id, e);
                (0.0, false)
            }
        };

        debug!(
            "Track {}: type={}, contamination={:.1}%",
            id,
            waste_type.as_deref().unwrap_or(UNKNOWN_WASTE_TYPE),
            contamination
        );

        let observation = Observation {
            waste_type,
            contamination,
        };
        let Some(finalization) = self.tracker.advance(&id, observation, now) else {
            return Ok(());
        };

        let label = if residue_ok {
            classify(&finalization.waste_type, finalization.contamination)
        } else {
            Classification::Mixed
        };
        self.emit(finalization, label, now, outcome)
    }

    /// Class name of the track's best observation, trusted only when this
    /// cycle's detection is confident enough
    fn resolve_waste_type(&self, det: &DetectionBox, class_id: u32) -> Option<String> {
        if det.confidence <= self.config.detection.type_confidence {
            return None;
        }
        self.config
            .model
            .class_names
            .get(class_id as usize)
            .cloned()
    }

    fn emit(
        &mut self,
        finalization: Finalization,
        label: Classification,
        now: f64,
        outcome: &mut CycleOutcome,
    ) -> Result<(), CycleError> {
        if !self.cooldown.admit(&finalization.waste_type, now) {
            self.metrics.inc(&self.metrics.results_suppressed);
            outcome.suppressed += 1;
            return Ok(());
        }

        let result = Arc::new(ClassificationResult {
            id: finalization.id,
            waste_type: finalization.waste_type,
            contamination_score: finalization.contamination,
            classification: label,
            confidence_level: finalization.confidence,
            timestamp: Local::now(),
        });

        info!(
            "♻️  {} {} → {} (contamination {:.1}%, confidence {:.1}%)",
            result.id,
            result.waste_type,
            result.classification,
            result.contamination_score,
            result.confidence_level * 100.0
        );

        self.latest.publish(Arc::clone(&result));
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(&result)).is_ok());
        self.metrics.inc(&self.metrics.results_emitted);
        outcome.results.push(Arc::clone(&result));

        match self.sink.store(&result.to_record()) {
            Ok(StoreOutcome::Inserted) => Ok(()),
            Ok(StoreOutcome::Duplicate) => {
                debug!("Result {} already persisted", result.id);
                Ok(())
            }
            Err(reason) => Err(CycleError::Sink {
                id: result.id.clone(),
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{RawDetection, RecordedOracle};
    use crate::sink::MemorySink;
    use image::Rgb;

    const CLEAN: Rgb<u8> = Rgb([245, 245, 245]);
    const GRIME: Rgb<u8> = Rgb([140, 90, 40]);

    fn test_config() -> Config {
        let mut config = Config::default();
        config.model.input_width = 200;
        config.model.input_height = 200;
        config
    }

    /// 200x200 clean frame with an 80x80 item box at (60,60)
    fn clean_frame() -> RgbImage {
        RgbImage::from_pixel(200, 200, CLEAN)
    }

    fn item(class_id: u32, confidence: f32) -> RawDetection {
        RawDetection::new(60.0, 60.0, 140.0, 140.0, class_id, confidence)
    }

    fn processor(frames: Vec<Vec<RawDetection>>, sink: MemorySink) -> FrameProcessor {
        let config = test_config();
        let oracle = RecordedOracle::new((200, 200), frames);
        let tracker = IdentityTracker::with_seed(config.tracking.clone(), 7);
        FrameProcessor::with_tracker(config, Box::new(oracle), Box::new(sink), tracker)
    }

    #[test]
    fn test_single_item_reported_once() {
        let sink = MemorySink::new();
        // HDPE Plastic is class 1
        let mut fp = processor(vec![vec![item(1, 0.9)]; 5], sink.clone());
        let frame = clean_frame();

        let mut results = Vec::new();
        for i in 0..5 {
            let outcome = fp.process_at(&frame, i as f64 * 0.1).unwrap();
            results.extend(outcome.results);
        }

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].waste_type, "HDPE Plastic");
        assert_eq!(results[0].classification, Classification::HighValue);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(fp.latest().get().unwrap().id, results[0].id);
    }

    #[test]
    fn test_low_confidence_never_finalizes() {
        let sink = MemorySink::new();
        let mut fp = processor(vec![vec![item(0, 0.7)]; 20], sink.clone());
        let frame = clean_frame();
        for i in 0..20 {
            let outcome = fp.process_at(&frame, i as f64 * 0.1).unwrap();
            assert!(outcome.results.is_empty());
        }
        assert!(sink.records().is_empty());
        assert_eq!(fp.tracker().active_count(), 1);
    }

    #[test]
    fn test_unknown_class_id_does_not_resolve() {
        let sink = MemorySink::new();
        let mut fp = processor(vec![vec![item(42, 0.95)]; 10], sink.clone());
        for i in 0..10 {
            fp.process_at(&clean_frame(), i as f64 * 0.1).unwrap();
        }
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_dirty_item_is_rejected() {
        let sink = MemorySink::new();
        let mut fp = processor(vec![vec![item(0, 0.9)]; 5], sink.clone());
        let mut frame = clean_frame();
        for y in 60..140 {
            for x in 60..140 {
                frame.put_pixel(x, y, GRIME);
            }
        }
        for i in 0..5 {
            fp.process_at(&frame, i as f64 * 0.1).unwrap();
        }
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, Classification::Rejected);
        assert_eq!(records[0].contamination, 100.0);
    }

    #[test]
    fn test_frame_skip_gates_inference() {
        let mut config = test_config();
        config.pipeline.frame_skip = 2;
        let oracle = RecordedOracle::new((200, 200), vec![vec![item(1, 0.9)]; 10]);
        let mut fp = FrameProcessor::new(config, Box::new(oracle), Box::new(MemorySink::new()));

        let skipped: Vec<bool> = (0..6)
            .map(|i| fp.process_frame(&Frame::new(clean_frame(), i)).unwrap().skipped)
            .collect();
        assert_eq!(skipped, vec![true, true, false, true, true, false]);
        assert_eq!(fp.metrics().summary().frames_skipped, 4);
        assert_eq!(fp.metrics().summary().frames_processed, 2);
    }

    #[test]
    fn test_empty_frame_is_cycle_error() {
        let mut fp = processor(vec![], MemorySink::new());
        let result = fp.process_frame(&Frame::new(RgbImage::new(0, 0), 3));
        assert!(matches!(result, Err(CycleError::EmptyFrame { sequence: 3 })));
    }

    #[test]
    fn test_subscribers_receive_results() {
        let mut fp = processor(vec![vec![item(3, 0.9)]; 5], MemorySink::new());
        let rx = fp.subscribe();
        for i in 0..5 {
            fp.process_at(&clean_frame(), i as f64 * 0.1).unwrap();
        }
        let result = rx.try_recv().unwrap();
        assert_eq!(result.waste_type, "PP");
        assert_eq!(result.classification, Classification::LowValue);
    }

    /// Fails its first `failures` calls, then always sees one PET item
    struct FlakyOracle {
        failures: u32,
    }

    impl DetectionOracle for FlakyOracle {
        fn input_size(&self) -> (u32, u32) {
            (200, 200)
        }

        fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
            if self.failures > 0 {
                self.failures -= 1;
                anyhow::bail!("inference backend unavailable");
            }
            Ok(vec![item(0, 0.9)])
        }
    }

    struct BrokenSink;

    impl ResultSink for BrokenSink {
        fn store(&mut self, _record: &crate::types::DetectionRecord) -> anyhow::Result<StoreOutcome> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_detector_error_counts_as_empty_frame() {
        let config = test_config();
        let mut fp = FrameProcessor::new(
            config,
            Box::new(FlakyOracle { failures: 2 }),
            Box::new(MemorySink::new()),
        );

        for i in 0..2 {
            let outcome = fp.process_at(&clean_frame(), i as f64 * 0.1).unwrap();
            assert_eq!(outcome.detections, 0);
        }
        let outcome = fp.process_at(&clean_frame(), 0.2).unwrap();
        assert_eq!(outcome.detections, 1);
        assert_eq!(fp.tracker().active_count(), 1);
        assert_eq!(fp.metrics().summary().frames_processed, 3);
    }

    #[test]
    fn test_sink_error_still_publishes_result() {
        let config = test_config();
        let oracle = RecordedOracle::new((200, 200), vec![vec![item(1, 0.9)]; 6]);
        let mut fp = FrameProcessor::new(config, Box::new(oracle), Box::new(BrokenSink));
        let rx = fp.subscribe();

        for i in 0..3 {
            assert!(fp.process_at(&clean_frame(), i as f64 * 0.1).is_ok());
        }
        let err = fp.process_at(&clean_frame(), 0.3).unwrap_err();
        assert!(matches!(err, CycleError::Sink { .. }));

        let latest = fp.latest().get().expect("result published despite sink failure");
        assert_eq!(latest.waste_type, "HDPE Plastic");
        assert_eq!(rx.try_recv().unwrap().id, latest.id);

        // Later cycles keep working
        let outcome = fp.process_at(&clean_frame(), 0.4).unwrap();
        assert_eq!(outcome.detections, 1);
    }

    #[test]
    fn test_residue_failure_labels_mixed() {
        let mut config = test_config();
        config.detection.min_area = 0.0;
        // Zero-width box: passes the area window, but has no pixels to score
        let sliver = RawDetection::new(100.0, 60.0, 100.0, 140.0, 0, 0.9);
        let oracle = RecordedOracle::new((200, 200), vec![vec![sliver]; 5]);
        let sink = MemorySink::new();
        let mut fp = FrameProcessor::new(config, Box::new(oracle), Box::new(sink.clone()));

        let mut results = Vec::new();
        for i in 0..5 {
            results.extend(fp.process_at(&clean_frame(), i as f64 * 0.1).unwrap().results);
        }

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].waste_type, "PET Bottle");
        assert_eq!(results[0].classification, Classification::Mixed);
        assert_eq!(results[0].contamination_score, 0.0);
        assert_eq!(sink.records()[0].classification, Classification::Mixed);
    }
}
