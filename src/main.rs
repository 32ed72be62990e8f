// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use waste_sorter::capture::{CameraHandle, CaptureError, FrameSource, ImageDirSource};
use waste_sorter::detection::{DetectionOracle, RecordedOracle};
use waste_sorter::dispatch::LineDispatcher;
use waste_sorter::pipeline::{self, FrameProcessor};
use waste_sorter::sink::JsonlSink;
use waste_sorter::{ClassificationResult, Config};

type DispatchWriter = Box<dyn Write + Send>;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// YAML configuration file. Built-in defaults are used when it does not exist.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Replay the images of this directory instead of reading the camera.
    #[arg(long)]
    images: Option<PathBuf>,
    /// Camera device index (overrides camera.device).
    #[arg(long)]
    device: Option<i32>,
    /// Play back recorded detections (one JSON array per frame) instead of running the model.
    #[arg(long)]
    detections: Option<PathBuf>,
    /// Record file (overrides output.records_path).
    #[arg(long)]
    records: Option<PathBuf>,
    /// Hardware command channel (overrides output.dispatch_path). "-" writes to stdout.
    #[arg(long)]
    dispatch: Option<String>,
    /// Stop after this many seconds.
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid logging.level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("♻️  Waste Sorter starting");
    info!(
        "Thresholds: min_conf={:.2}, type_conf={:.2}, area=[{:.0}, {:.0}], cooldown={:.1}s",
        config.detection.min_confidence,
        config.detection.type_confidence,
        config.detection.min_area,
        config.detection.max_area,
        config.tracking.type_cooldown_secs
    );

    let mut camera = CameraHandle::new();
    camera
        .open_or_get(|| open_source(&args, &config))
        .context("Failed to open frame source")?;

    let oracle = build_oracle(&args, &config)?;
    let sink = JsonlSink::open(Path::new(&config.output.records_path))?;
    info!("💾 Results will be written to: {}", config.output.records_path);

    let mut processor = FrameProcessor::new(config.clone(), oracle, Box::new(sink));
    let dispatcher = match &config.output.dispatch_path {
        Some(target) => Some(start_dispatcher(target, processor.subscribe())?),
        None => None,
    };

    let lease = camera.lease()?;
    let handle = pipeline::spawn(
        lease,
        processor,
        &config.pipeline,
        Duration::from_millis(config.camera.retry_backoff_ms),
    )?;

    let deadline = args
        .duration_secs
        .map(|s| Instant::now() + Duration::from_secs(s));
    while !handle.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run time limit reached, stopping");
            handle.stop();
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    let latest = handle.latest();
    let (lease, processor) = handle.join()?;
    let summary = processor.metrics().summary();
    camera.release(lease);
    camera.close()?;
    // Closes the event channel so the dispatcher can finish
    drop(processor);

    if let Some(dispatcher) = dispatcher {
        match dispatcher.join() {
            Ok(d) => info!("Hardware commands sent: {}", d.sent()),
            Err(_) => warn!("Dispatcher thread panicked"),
        }
    }

    info!("\n========================================");
    info!("  Frames captured:   {}", summary.frames_captured);
    info!("  Frames processed:  {}", summary.frames_processed);
    info!("  Frames dropped:    {}", summary.frames_dropped);
    info!("  Items reported:    {}", summary.results_emitted);
    info!("  Items suppressed:  {}", summary.results_suppressed);
    info!("  Processing speed:  {:.1} FPS", summary.fps);
    if let Some(last) = latest.get() {
        info!(
            "  Last item:         {} {} → {}",
            last.id, last.waste_type, last.classification
        );
    }
    info!("========================================");
    info!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        Config::load(&args.config.to_string_lossy())?
    } else {
        eprintln!(
            "Config {} not found, using built-in defaults",
            args.config.display()
        );
        Config::default()
    };

    if let Some(device) = args.device {
        config.camera.device = device;
    }
    if let Some(records) = &args.records {
        config.output.records_path = records.to_string_lossy().into_owned();
    }
    if let Some(dispatch) = &args.dispatch {
        config.output.dispatch_path = Some(dispatch.clone());
    }
    config.validate()?;
    Ok(config)
}

fn open_source(args: &Args, config: &Config) -> Result<Box<dyn FrameSource>, CaptureError> {
    if let Some(dir) = &args.images {
        return Ok(Box::new(ImageDirSource::open(dir)?));
    }
    open_camera(config)
}

#[cfg(feature = "camera")]
fn open_camera(config: &Config) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(waste_sorter::capture::CameraSource::open(
        &config.camera,
    )?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_config: &Config) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Open(
        "built without the `camera` feature; use --images".to_string(),
    ))
}

fn build_oracle(args: &Args, config: &Config) -> Result<Box<dyn DetectionOracle>> {
    let input_size = (config.model.input_width, config.model.input_height);
    if let Some(path) = &args.detections {
        let oracle = RecordedOracle::from_jsonl(path, input_size)?;
        info!("✓ Replaying {} recorded detection frame(s)", oracle.remaining());
        return Ok(Box::new(oracle));
    }
    build_model_oracle(config)
}

#[cfg(feature = "onnx")]
fn build_model_oracle(config: &Config) -> Result<Box<dyn DetectionOracle>> {
    let detector = waste_sorter::detection::OnnxDetector::new(&config.model, &config.detection)?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn build_model_oracle(_config: &Config) -> Result<Box<dyn DetectionOracle>> {
    anyhow::bail!("built without the `onnx` feature; use --detections")
}

fn start_dispatcher(
    target: &str,
    events: Receiver<Arc<ClassificationResult>>,
) -> Result<JoinHandle<LineDispatcher<DispatchWriter>>> {
    let out: DispatchWriter = if target == "-" {
        Box::new(std::io::stdout())
    } else {
        Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(target)
                .with_context(|| format!("Failed to open dispatch channel {}", target))?,
        )
    };
    info!("🔌 Hardware commands → {}", target);
    Ok(LineDispatcher::new(out).spawn(events))
}
