// src/detection/oracle.rs
//
// Boundary between the pipeline and the object detector.
//
// The detector sees a fixed-size image and answers in its own input
// coordinates. Everything around that call lives here: ROI crop, resize
// to the model input, mapping boxes back into crop space and the
// confidence / area filter that drops spurious tiny or frame-spanning
// boxes.

use crate::types::{DetectionBox, DetectionConfig};
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Detector output in model-input coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2]
    pub class_id: u32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox: [x1, y1, x2, y2],
            class_id,
            confidence,
        }
    }
}

/// Object detection backend.
///
/// Implementations are treated as stateless from the pipeline's point of
/// view. An `Err` is logged by the caller and counts as "no detections".
pub trait DetectionOracle: Send {
    /// (width, height) the detector expects
    fn input_size(&self) -> (u32, u32);

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// Frame prepared for one detector call
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    /// ROI crop in which all downstream coordinates live
    pub crop: RgbImage,
    /// Crop resized to the detector input
    pub input: RgbImage,
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Crop `frame` to `roi` (`[x, y, w, h]`), clamped to the frame bounds.
/// An ROI that misses the frame entirely falls back to the full frame.
pub fn crop_roi(frame: &RgbImage, roi: Option<[u32; 4]>) -> RgbImage {
    let Some([x, y, w, h]) = roi else {
        return frame.clone();
    };
    let (fw, fh) = frame.dimensions();
    let x = x.min(fw);
    let y = y.min(fh);
    let w = w.min(fw - x);
    let h = h.min(fh - y);
    if w == 0 || h == 0 {
        debug!("ROI {:?} outside {}x{} frame, using full frame", roi, fw, fh);
        return frame.clone();
    }
    imageops::crop_imm(frame, x, y, w, h).to_image()
}

pub fn prepare_frame(frame: &RgbImage, roi: Option<[u32; 4]>, input_size: (u32, u32)) -> PreparedFrame {
    let crop = crop_roi(frame, roi);
    let (cw, ch) = crop.dimensions();
    let (iw, ih) = input_size;

    let input = if (cw, ch) == (iw, ih) {
        crop.clone()
    } else {
        imageops::resize(&crop, iw, ih, FilterType::Triangle)
    };

    PreparedFrame {
        crop,
        input,
        scale_x: cw as f32 / iw as f32,
        scale_y: ch as f32 / ih as f32,
    }
}

/// Map detector boxes into crop coordinates and apply the confidence and
/// area window.
pub fn rescale_and_filter(
    raw: &[RawDetection],
    prepared: &PreparedFrame,
    config: &DetectionConfig,
) -> Vec<DetectionBox> {
    let (cw, ch) = prepared.crop.dimensions();
    let (cw, ch) = (cw as f32, ch as f32);

    let kept: Vec<DetectionBox> = raw
        .iter()
        .filter(|d| d.confidence >= config.min_confidence)
        .map(|d| {
            DetectionBox::new(
                (d.bbox[0] * prepared.scale_x).clamp(0.0, cw),
                (d.bbox[1] * prepared.scale_y).clamp(0.0, ch),
                (d.bbox[2] * prepared.scale_x).clamp(0.0, cw),
                (d.bbox[3] * prepared.scale_y).clamp(0.0, ch),
                d.class_id,
                d.confidence,
            )
        })
        .filter(|d| {
            let area = d.area();
            area >= config.min_area && area <= config.max_area
        })
        .collect();

    if kept.len() != raw.len() {
        debug!("Detections: {} raw → {} kept", raw.len(), kept.len());
    }
    kept
}

pub fn iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression, highest confidence first
pub fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) < iou_threshold) {
            keep.push(det);
        }
    }
    keep
}
