// src/pipeline/metrics.rs
//
// Observability only. Shared counters are readable from any thread;
// stage timings are owned by the processing thread and reported through
// the log every few cycles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_captured: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub frames_skipped: Arc<AtomicU64>,
    pub frames_processed: Arc<AtomicU64>,
    pub detections: Arc<AtomicU64>,
    pub results_emitted: Arc<AtomicU64>,
    pub results_suppressed: Arc<AtomicU64>,
    pub read_failures: Arc<AtomicU64>,
    pub cycle_errors: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_captured: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            frames_processed: Arc::new(AtomicU64::new(0)),
            detections: Arc::new(AtomicU64::new(0)),
            results_emitted: Arc::new(AtomicU64::new(0)),
            results_suppressed: Arc::new(AtomicU64::new(0)),
            read_failures: Arc::new(AtomicU64::new(0)),
            cycle_errors: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Processed frames per second since start
    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            results_emitted: self.results_emitted.load(Ordering::Relaxed),
            results_suppressed: self.results_suppressed.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            cycle_errors: self.cycle_errors.load(Ordering::Relaxed),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
    pub frames_processed: u64,
    pub detections: u64,
    pub results_emitted: u64,
    pub results_suppressed: u64,
    pub read_failures: u64,
    pub cycle_errors: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
}

// ============================================================================
// ROLLING STAGE TIMINGS
// ============================================================================

/// Fixed-size window of the most recent samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Wall-clock split of one processing cycle, in milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleTimings {
    pub preprocess_ms: f64,
    pub inference_ms: f64,
    pub postprocess_ms: f64,
    pub total_ms: f64,
}

pub struct StageTimings {
    preprocess: RollingWindow,
    inference: RollingWindow,
    postprocess: RollingWindow,
    total: RollingWindow,
    confidence: RollingWindow,
    report_every: u64,
    cycles: u64,
}

impl StageTimings {
    pub fn new(window: usize, report_every: u64) -> Self {
        Self {
            preprocess: RollingWindow::new(window),
            inference: RollingWindow::new(window),
            postprocess: RollingWindow::new(window),
            total: RollingWindow::new(window),
            confidence: RollingWindow::new(window),
            report_every: report_every.max(1),
            cycles: 0,
        }
    }

    /// Record one cycle. Logs the window means every `report_every` cycles
    /// and returns true when it did.
    pub fn record(&mut self, timings: CycleTimings, confidences: &[f32]) -> bool {
        self.preprocess.push(timings.preprocess_ms);
        self.inference.push(timings.inference_ms);
        self.postprocess.push(timings.postprocess_ms);
        self.total.push(timings.total_ms);
        for &c in confidences {
            self.confidence.push(c as f64);
        }

        self.cycles += 1;
        if self.cycles % self.report_every != 0 {
            return false;
        }
        self.report();
        true
    }

    pub fn report(&self) {
        let ms = |w: &RollingWindow| w.mean().unwrap_or(0.0);
        info!(
            "📊 Cycle {}: pre={:.1}ms infer={:.1}ms post={:.1}ms total={:.1}ms avg_conf={:.2}",
            self.cycles,
            ms(&self.preprocess),
            ms(&self.inference),
            ms(&self.postprocess),
            ms(&self.total),
            self.confidence.mean().unwrap_or(0.0)
        );
    }

    pub fn mean_total_ms(&self) -> Option<f64> {
        self.total.mean()
    }

    pub fn mean_confidence(&self) -> Option<f64> {
        self.confidence.mean()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
