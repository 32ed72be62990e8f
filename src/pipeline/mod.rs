// src/pipeline/mod.rs

pub mod latest;
pub mod metrics;
pub mod processor;
pub mod runtime;

pub use latest::LatestResult;
pub use metrics::{CycleTimings, MetricsSummary, PipelineMetrics, RollingWindow, StageTimings};
pub use processor::{CycleError, CycleOutcome, FrameProcessor};
pub use runtime::{spawn, PipelineHandle};
