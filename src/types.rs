use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Material name used whenever the detector's class cannot be trusted.
pub const UNKNOWN_WASTE_TYPE: &str = "Unknown";

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub residue: ResidueConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture device index
    pub device: i32,
    pub width: u32,
    pub height: u32,
    /// Region of interest `[x, y, w, h]` cropped out of every frame before inference
    pub roi: Option<[u32; 4]>,
    /// Pause after a failed read before the next attempt
    pub retry_backoff_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: 640,
            height: 480,
            roi: None,
            retry_backoff_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub input_width: u32,
    pub input_height: u32,
    pub num_threads: usize,
    /// Material name per detector class id
    pub class_names: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/waste_yolo.onnx".to_string(),
            input_width: 640,
            input_height: 640,
            num_threads: 4,
            class_names: vec![
                "PET Bottle".to_string(),
                "HDPE Plastic".to_string(),
                "LDPE".to_string(),
                "PP".to_string(),
                "Tin/Steel Can".to_string(),
                "UHT Box".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Detections below this confidence are discarded outright
    pub min_confidence: f32,
    /// Accepted box area window in cropped-frame pixels
    pub min_area: f32,
    pub max_area: f32,
    /// Confidence a detection needs before its class is trusted as the waste type
    pub type_confidence: f32,
    /// IoU above which overlapping raw boxes are suppressed (ONNX backend)
    pub nms_iou: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_area: 1_000.0,
            max_area: 200_000.0,
            type_confidence: 0.8,
            nms_iou: 0.45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Maximum centroid distance for a detection to update an existing track
    pub match_distance_px: f32,
    /// Movement below this between consecutive observations counts as stable
    pub stable_motion_px: f32,
    pub min_stable_count: u32,
    /// Minimum time the waste type must stay resolved before finalization
    pub dwell_secs: f64,
    /// Unmatched cycles a non-finalized track survives before deletion
    pub max_lost_cycles: u32,
    /// Time a finalized track keeps its id reserved
    pub finalize_timeout_secs: f64,
    /// Minimum spacing between two reported items of the same waste type
    pub type_cooldown_secs: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            match_distance_px: 50.0,
            stable_motion_px: 50.0,
            min_stable_count: 3,
            dwell_secs: 0.3,
            max_lost_cycles: 30,
            finalize_timeout_secs: 5.0,
            type_cooldown_secs: 1.0,
        }
    }
}

/// HSV window. Hue in degrees (0-360), saturation 0-100, value 0-255.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HsvBand {
    pub hue: [f32; 2],
    pub saturation: [f32; 2],
    pub value: [f32; 2],
}

impl HsvBand {
    pub fn contains(&self, h: f32, s: f32, v: f32) -> bool {
        h >= self.hue[0]
            && h <= self.hue[1]
            && s >= self.saturation[0]
            && s <= self.saturation[1]
            && v >= self.value[0]
            && v <= self.value[1]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidueConfig {
    /// Typical residue colours (food, grease, soil)
    pub core: HsvBand,
    /// Relaxed band around the core, counted at `margin_weight`
    pub margin: HsvBand,
    pub margin_weight: f32,
    /// Structuring element radius for open/close
    pub morph_radius: u8,
    pub blur_sigma: f32,
    /// Calibration gain applied to the raw coverage percentage
    pub sensitivity: f32,
}

impl Default for ResidueConfig {
    fn default() -> Self {
        Self {
            core: HsvBand {
                hue: [15.0, 45.0],
                saturation: [35.0, 100.0],
                value: [40.0, 220.0],
            },
            margin: HsvBand {
                hue: [5.0, 60.0],
                saturation: [20.0, 100.0],
                value: [25.0, 240.0],
            },
            margin_weight: 0.5,
            morph_radius: 1,
            blur_sigma: 1.0,
            sensitivity: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// Dequeued frames discarded between two inference runs
    pub frame_skip: u32,
    pub poll_interval_ms: u64,
    pub metrics_window: usize,
    pub metrics_report_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2,
            frame_skip: 0,
            poll_interval_ms: 5,
            metrics_window: 100,
            metrics_report_every: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub records_path: String,
    /// Line-oriented actuator channel (serial device, FIFO). Disabled when unset.
    pub dispatch_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            records_path: "output/detections.jsonl".to_string(),
            dispatch_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "waste_sorter=info".to_string(),
        }
    }
}

// ============================================================================
// FRAMES & DETECTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }
}

/// Filtered detection in cropped-frame coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    pub bbox: [f32; 4], // [x1, y1, x2, y2]
    pub class_id: u32,
    pub confidence: f32,
}

impl DetectionBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox: [x1, y1, x2, y2],
            class_id,
            confidence,
        }
    }

    pub fn centroid(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }

    pub fn width(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "High Value")]
    HighValue,
    #[serde(rename = "Low Value")]
    LowValue,
    Rejected,
    Mixed,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighValue => "High Value",
            Self::LowValue => "Low Value",
            Self::Rejected => "Rejected",
            Self::Mixed => "Mixed",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported item. Produced once per finalized track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub id: String,
    pub waste_type: String,
    pub contamination_score: f32,
    pub classification: Classification,
    pub confidence_level: f32,
    pub timestamp: DateTime<Local>,
}

impl ClassificationResult {
    pub fn to_record(&self) -> DetectionRecord {
        DetectionRecord {
            id: self.id.clone(),
            timestamp: self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            waste_type: self.waste_type.clone(),
            confidence_level: format!("{:.1}%", self.confidence_level * 100.0),
            contamination: self.contamination_score,
            classification: self.classification,
        }
    }
}

/// Persisted row, keyed by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: String,
    pub timestamp: String,
    pub waste_type: String,
    pub confidence_level: String,
    pub contamination: f32,
    pub classification: Classification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_box_geometry() {
        let det = DetectionBox::new(10.0, 20.0, 50.0, 80.0, 1, 0.9);
        assert_eq!(det.centroid(), (30.0, 50.0));
        assert_eq!(det.area(), 2400.0);
    }

    #[test]
    fn test_inverted_box_has_zero_area() {
        let det = DetectionBox::new(50.0, 20.0, 10.0, 80.0, 1, 0.9);
        assert_eq!(det.area(), 0.0);
    }

    #[test]
    fn test_record_formatting() {
        let result = ClassificationResult {
            id: "A1B2".to_string(),
            waste_type: "PET Bottle".to_string(),
            contamination_score: 3.5,
            classification: Classification::HighValue,
            confidence_level: 0.923,
            timestamp: Local::now(),
        };
        let record = result.to_record();
        assert_eq!(record.confidence_level, "92.3%");
        assert_eq!(record.timestamp.len(), "YYYY-MM-DD HH:MM:SS".len());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"classification\":\"High Value\""));
    }
}
