// src/pipeline/runtime.rs
//
// Two-thread runtime:
//
//   acquisition ──try_send──→ [bounded queue] ──try_recv──→ processing
//
// The queue never blocks the camera: when it is full the newest frame is
// dropped. Both loops poll a shared running flag once per iteration.
// A finite source ends acquisition, which closes the queue; processing
// drains what is left and exits.

use super::latest::LatestResult;
use super::metrics::{MetricsSummary, PipelineMetrics};
use super::processor::FrameProcessor;
use crate::capture::SourceLease;
use crate::types::{Frame, PipelineConfig};
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    acquisition: JoinHandle<SourceLease>,
    processing: JoinHandle<FrameProcessor>,
    latest: LatestResult,
    metrics: PipelineMetrics,
}

impl PipelineHandle {
    /// Ask both loops to exit after their current iteration
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True once both threads have returned
    pub fn is_finished(&self) -> bool {
        self.acquisition.is_finished() && self.processing.is_finished()
    }

    pub fn latest(&self) -> LatestResult {
        self.latest.clone()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Wait for both threads and hand back the source lease and the
    /// processor. Does not stop the pipeline by itself.
    pub fn join(self) -> Result<(SourceLease, FrameProcessor)> {
        let lease = self
            .acquisition
            .join()
            .map_err(|_| anyhow!("acquisition thread panicked"))?;
        let processor = self
            .processing
            .join()
            .map_err(|_| anyhow!("processing thread panicked"))?;
        self.running.store(false, Ordering::Release);
        Ok((lease, processor))
    }
}

/// Start acquisition and processing threads
pub fn spawn(
    lease: SourceLease,
    processor: FrameProcessor,
    config: &PipelineConfig,
    retry_backoff: Duration,
) -> Result<PipelineHandle> {
    let running = Arc::new(AtomicBool::new(true));
    let metrics = PipelineMetrics::new();
    let epoch = Instant::now();
    let processor = processor.with_metrics(metrics.clone()).with_epoch(epoch);
    let latest = processor.latest();

    let (tx, rx) = bounded::<Frame>(config.queue_capacity);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    info!(
        "🚀 Pipeline starting: source={}, queue={}, frame_skip={}",
        lease.describe(),
        config.queue_capacity,
        config.frame_skip
    );

    let acquisition = {
        let running = Arc::clone(&running);
        let metrics = metrics.clone();
        thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || acquisition_loop(lease, tx, running, metrics, retry_backoff))?
    };

    let processing = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("processing".to_string())
            .spawn(move || processing_loop(processor, rx, running, poll_interval))?
    };

    Ok(PipelineHandle {
        running,
        acquisition,
        processing,
        latest,
        metrics,
    })
}

fn acquisition_loop(
    mut lease: SourceLease,
    tx: Sender<Frame>,
    running: Arc<AtomicBool>,
    metrics: PipelineMetrics,
    retry_backoff: Duration,
) -> SourceLease {
    let mut sequence = 0u64;

    while running.load(Ordering::Acquire) {
        match lease.read() {
            Ok(Some(image)) => {
                sequence += 1;
                metrics.inc(&metrics.frames_captured);
                match tx.try_send(Frame::new(image, sequence)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        metrics.inc(&metrics.frames_dropped);
                        debug!("Queue full, frame {} dropped", sequence);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Processing side gone, acquisition exiting");
                        break;
                    }
                }
            }
            Ok(None) => {
                info!("End of stream after {} frame(s)", sequence);
                break;
            }
            Err(e) => {
                metrics.inc(&metrics.read_failures);
                warn!("{}", e);
                thread::sleep(retry_backoff);
            }
        }
    }

    lease
}

fn processing_loop(
    mut processor: FrameProcessor,
    rx: Receiver<Frame>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) -> FrameProcessor {
    let metrics = processor.metrics();

    while running.load(Ordering::Acquire) {
        match rx.try_recv() {
            Ok(frame) => {
                if let Err(e) = processor.process_frame(&frame) {
                    metrics.inc(&metrics.cycle_errors);
                    error!("Cycle for frame {} failed: {}", frame.sequence, e);
                }
            }
            Err(TryRecvError::Empty) => thread::sleep(poll_interval),
            Err(TryRecvError::Disconnected) => {
                info!("Frame queue closed, processing exiting");
                break;
            }
        }
    }

    let summary = metrics.summary();
    info!(
        "Pipeline finished: {} processed, {} dropped, {} emitted, {} suppressed ({:.1} FPS)",
        summary.frames_processed,
        summary.frames_dropped,
        summary.results_emitted,
        summary.results_suppressed,
        summary.fps
    );
    processor
}
