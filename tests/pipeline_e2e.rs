// tests/pipeline_e2e.rs
//
// Whole-system runs: scripted detector output drives the processor
// directly, and a paced in-memory camera drives the threaded runtime.

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::fs;
use std::thread;
use std::time::Duration;
use waste_sorter::capture::{CameraHandle, CaptureError, FrameSource};
use waste_sorter::detection::{DetectionOracle, RawDetection, RecordedOracle};
use waste_sorter::dispatch::LineDispatcher;
use waste_sorter::pipeline::{self, FrameProcessor};
use waste_sorter::sink::{JsonlSink, MemorySink};
use waste_sorter::tracking::IdentityTracker;
use waste_sorter::{Classification, Config, DetectionRecord};

const CLEAN: Rgb<u8> = Rgb([245, 245, 245]);
const GRIME: Rgb<u8> = Rgb([140, 90, 40]);

const PET: u32 = 0;
const HDPE: u32 = 1;
const PP: u32 = 3;

fn config_for(width: u32, height: u32) -> Config {
    let mut config = Config::default();
    config.model.input_width = width;
    config.model.input_height = height;
    config
}

fn square(cx: f32, cy: f32, class_id: u32, confidence: f32) -> RawDetection {
    RawDetection::new(cx - 40.0, cy - 40.0, cx + 40.0, cy + 40.0, class_id, confidence)
}

fn scripted(config: Config, frames: Vec<Vec<RawDetection>>, sink: MemorySink) -> FrameProcessor {
    let size = (config.model.input_width, config.model.input_height);
    let tracker = IdentityTracker::with_seed(config.tracking.clone(), 42);
    FrameProcessor::with_tracker(
        config,
        Box::new(RecordedOracle::new(size, frames)),
        Box::new(sink),
        tracker,
    )
}

#[test]
fn test_stationary_hdpe_reported_once_as_high_value() {
    // 80x80 item at (100,100) with an 8x8 residue speck: about 1% of the
    // box, 2% after calibration gain
    let mut frame = RgbImage::from_pixel(200, 200, CLEAN);
    for y in 96..104 {
        for x in 96..104 {
            frame.put_pixel(x, y, GRIME);
        }
    }

    let sink = MemorySink::new();
    let mut processor = scripted(
        config_for(200, 200),
        vec![vec![square(100.0, 100.0, HDPE, 0.9)]; 5],
        sink.clone(),
    );

    let mut results = Vec::new();
    for cycle in 0..5 {
        let outcome = processor.process_at(&frame, cycle as f64 * 0.1).unwrap();
        assert_eq!(outcome.detections, 1);
        results.extend(outcome.results);
    }

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.waste_type, "HDPE Plastic");
    assert_eq!(result.classification, Classification::HighValue);
    assert!(
        result.contamination_score > 1.0 && result.contamination_score < 5.0,
        "contamination {} should be near 2%",
        result.contamination_score
    );

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, result.id);
    assert_eq!(records[0].confidence_level, "90.0%");
}

#[test]
fn test_same_type_within_cooldown_is_suppressed() {
    // PET item A on the left for cycles 0-3, PET item B on the right for
    // cycles 5-8. A finalizes at 0.3s, B at 0.8s.
    let mut frames = vec![Vec::new(); 10];
    for (cycle, dets) in frames.iter_mut().enumerate() {
        if cycle <= 3 {
            dets.push(square(60.0, 100.0, PET, 0.92));
        }
        if (5..=8).contains(&cycle) {
            dets.push(square(300.0, 100.0, PET, 0.92));
        }
    }

    let sink = MemorySink::new();
    let mut processor = scripted(config_for(400, 200), frames, sink.clone());
    let frame = RgbImage::from_pixel(400, 200, CLEAN);

    let (mut emitted, mut suppressed) = (0, 0);
    for cycle in 0..10 {
        let outcome = processor.process_at(&frame, cycle as f64 * 0.1).unwrap();
        emitted += outcome.results.len();
        suppressed += outcome.suppressed;
    }

    assert_eq!(emitted, 1);
    assert_eq!(suppressed, 1);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(processor.metrics().summary().results_suppressed, 1);
}

#[test]
fn test_cooldown_is_per_waste_type() {
    // PET and PP side by side finalize in the same cycle
    let frames = vec![vec![square(60.0, 100.0, PET, 0.92), square(300.0, 100.0, PP, 0.92)]; 5];

    let sink = MemorySink::new();
    let mut processor = scripted(config_for(400, 200), frames, sink.clone());
    let frame = RgbImage::from_pixel(400, 200, CLEAN);
    for cycle in 0..5 {
        processor.process_at(&frame, cycle as f64 * 0.1).unwrap();
    }

    let mut labels: Vec<(String, Classification)> = sink
        .records()
        .into_iter()
        .map(|r| (r.waste_type, r.classification))
        .collect();
    labels.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        labels,
        vec![
            ("PET Bottle".to_string(), Classification::HighValue),
            ("PP".to_string(), Classification::LowValue),
        ]
    );
}

#[test]
fn test_ids_unique_across_many_items() {
    // Ten items per frame on a grid, each held for five cycles, repeated
    let positions: Vec<(f32, f32)> = (0..10)
        .map(|i| (60.0 + (i % 5) as f32 * 120.0, 60.0 + (i / 5) as f32 * 120.0))
        .collect();
    let frame_dets: Vec<RawDetection> = positions
        .iter()
        .map(|&(x, y)| square(x, y, 4, 0.85))
        .collect();

    let mut config = config_for(640, 240);
    config.tracking.type_cooldown_secs = 0.0;
    let sink = MemorySink::new();
    let mut processor = scripted(config, vec![frame_dets; 40], sink.clone());
    let frame = RgbImage::from_pixel(640, 240, CLEAN);

    for cycle in 0..40 {
        processor.process_at(&frame, cycle as f64 * 0.1).unwrap();

        let tracker = processor.tracker();
        let mut ids: Vec<&str> = tracker
            .active_tracks()
            .iter()
            .map(|t| t.id.as_str())
            .chain(tracker.finalized_ids())
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total, "duplicate id at cycle {}", cycle);
    }

    let records = sink.records();
    assert!(records.len() >= 10);
    assert!(records
        .iter()
        .all(|r| r.waste_type == "Tin/Steel Can" && r.classification == Classification::HighValue));
}

// ============================================================================
// THREADED RUNTIME
// ============================================================================

/// Blank sorting surface at a fixed frame rate
struct PacedCamera {
    remaining: u32,
    interval: Duration,
}

impl FrameSource for PacedCamera {
    fn describe(&self) -> String {
        "paced test camera".to_string()
    }

    fn read(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        thread::sleep(self.interval);
        self.remaining -= 1;
        Ok(Some(RgbImage::from_pixel(200, 200, CLEAN)))
    }
}

/// Always sees the same HDPE item in the middle of the frame
struct FixedOracle;

impl DetectionOracle for FixedOracle {
    fn input_size(&self) -> (u32, u32) {
        (200, 200)
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
        Ok(vec![square(100.0, 100.0, HDPE, 0.9)])
    }
}

#[test]
fn test_threaded_pipeline_reports_item_once() {
    let dir = tempfile::tempdir().unwrap();
    let records_path = dir.path().join("detections.jsonl");
    let config = config_for(200, 200);

    let mut camera = CameraHandle::new();
    camera
        .open_or_get(|| {
            Ok(Box::new(PacedCamera {
                remaining: 60,
                interval: Duration::from_millis(15),
            }) as Box<dyn FrameSource>)
        })
        .unwrap();

    let sink = JsonlSink::open(&records_path).unwrap();
    let mut processor = FrameProcessor::new(config.clone(), Box::new(FixedOracle), Box::new(sink));
    let dispatcher = LineDispatcher::new(Vec::new()).spawn(processor.subscribe());

    let handle = pipeline::spawn(
        camera.lease().unwrap(),
        processor,
        &config.pipeline,
        Duration::from_millis(1),
    )
    .unwrap();
    let latest = handle.latest();
    let (lease, processor) = handle.join().unwrap();
    camera.release(lease);

    let summary = processor.metrics().summary();
    assert_eq!(summary.frames_captured, 60);
    assert_eq!(summary.results_emitted, 1);
    assert_eq!(summary.cycle_errors, 0);

    let last = latest.get().expect("one result published");
    assert_eq!(last.classification, Classification::HighValue);

    drop(processor);
    let commands = String::from_utf8(dispatcher.join().unwrap().into_inner()).unwrap();
    assert_eq!(commands, "high\n");

    let stored: Vec<DetectionRecord> = fs::read_to_string(&records_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, last.id);
    assert_eq!(stored[0].waste_type, "HDPE Plastic");
}
