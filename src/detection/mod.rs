// src/detection/mod.rs

#[cfg(feature = "onnx")]
mod onnx;
mod oracle;
mod recorded;

// Re-export public APIs
#[cfg(feature = "onnx")]
pub use onnx::OnnxDetector;
pub use oracle::{
    crop_roi, iou, nms, prepare_frame, rescale_and_filter, DetectionOracle, PreparedFrame,
    RawDetection,
};
pub use recorded::RecordedOracle;
