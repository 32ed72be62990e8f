// src/detection/onnx.rs
//
// YOLO-style ONNX detector. Expects a single output shaped
// [1, 4 + num_classes, num_predictions] with center-format boxes.

use super::oracle::{nms, DetectionOracle, RawDetection};
use crate::types::{DetectionConfig, ModelConfig};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info};

pub struct OnnxDetector {
    session: Session,
    input_width: u32,
    input_height: u32,
    num_classes: usize,
    min_confidence: f32,
    nms_iou: f32,
}

impl OnnxDetector {
    pub fn new(model: &ModelConfig, detection: &DetectionConfig) -> Result<Self> {
        info!("Loading detection model: {}", model.path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(model.num_threads)?
            .with_inter_threads(1)?
            .commit_from_file(&model.path)
            .context("Failed to load model")?;

        info!(
            "✓ Detector initialized ({}x{}, {} classes)",
            model.input_width,
            model.input_height,
            model.class_names.len()
        );

        Ok(Self {
            session,
            input_width: model.input_width,
            input_height: model.input_height,
            num_classes: model.class_names.len(),
            min_confidence: detection.min_confidence,
            nms_iou: detection.nms_iou,
        })
    }

    /// Normalize [0, 255] -> [0, 1] and convert HWC -> CHW
    fn to_tensor(&self, image: &RgbImage) -> Vec<f32> {
        let (w, h) = (self.input_width as usize, self.input_height as usize);
        let mut input = vec![0.0f32; 3 * w * h];
        for (x, y, px) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                input[c * w * h + y * w + x] = px[c] as f32 / 255.0;
            }
        }
        input
    }

    fn postprocess(&self, output: &[f32]) -> Result<Vec<RawDetection>> {
        let rows = 4 + self.num_classes;
        if output.len() % rows != 0 {
            bail!(
                "model output of {} values does not divide into {} rows",
                output.len(),
                rows
            );
        }
        let n = output.len() / rows;

        let mut detections = Vec::new();
        for i in 0..n {
            let cx = output[i];
            let cy = output[n + i];
            let w = output[n * 2 + i];
            let h = output[n * 3 + i];

            let mut max_conf = 0.0f32;
            let mut best_class = 0;
            for c in 0..self.num_classes {
                let conf = output[n * (4 + c) + i];
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }

            if max_conf < self.min_confidence {
                continue;
            }

            detections.push(RawDetection::new(
                cx - w / 2.0,
                cy - h / 2.0,
                cx + w / 2.0,
                cy + h / 2.0,
                best_class as u32,
                max_conf,
            ));
        }

        Ok(nms(detections, self.nms_iou))
    }
}

impl DetectionOracle for OnnxDetector {
    fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = self.to_tensor(image);
        let shape = [
            1,
            3,
            self.input_height as usize,
            self.input_width as usize,
        ];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;

        let detections = self.postprocess(data)?;
        debug!("Detector returned {} boxes", detections.len());
        Ok(detections)
    }
}
