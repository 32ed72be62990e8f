// src/analysis/residue.rs
//
// HSV-based residue coverage estimate for a detected item.
//
// Residue (food, grease, soil) shows up as warm, saturated, mid-value
// pixels on otherwise bright or neutral packaging. Two HSV windows are
// used: a core window counted at full weight and a relaxed margin
// window counted at partial weight. The weighted mask is cleaned with a
// grayscale open + close and a light blur before pixels are summed.
//
//   score = min(sensitivity * residue_px / box_area * 100, 100)

use crate::types::{DetectionBox, ResidueConfig};
use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{grayscale_close, grayscale_open, Mask};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResidueError {
    #[error("empty region {width}x{height}")]
    EmptyRegion { width: u32, height: u32 },
}

/// Convert RGB to HSV.
/// Returns (H: 0-360, S: 0-100, V: 0-255).
#[inline]
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r_n = r / 255.0;
    let g_n = g / 255.0;
    let b_n = b / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max < 1e-6 {
        0.0
    } else {
        (delta / max) * 100.0
    };

    (h, s, max * 255.0)
}

pub struct ResidueAnalyzer {
    config: ResidueConfig,
}

impl ResidueAnalyzer {
    pub fn new(config: ResidueConfig) -> Self {
        Self { config }
    }

    /// Contamination score of the region under `det` in `frame`.
    pub fn analyze_region(&self, frame: &RgbImage, det: &DetectionBox) -> Result<f32, ResidueError> {
        let (fw, fh) = frame.dimensions();
        let x1 = det.bbox[0].floor().clamp(0.0, fw as f32) as u32;
        let y1 = det.bbox[1].floor().clamp(0.0, fh as f32) as u32;
        let x2 = det.bbox[2].ceil().clamp(0.0, fw as f32) as u32;
        let y2 = det.bbox[3].ceil().clamp(0.0, fh as f32) as u32;

        let width = x2.saturating_sub(x1);
        let height = y2.saturating_sub(y1);
        if width == 0 || height == 0 {
            return Err(ResidueError::EmptyRegion { width, height });
        }

        let crop = image::imageops::crop_imm(frame, x1, y1, width, height).to_image();
        self.contamination(&crop)
    }

    /// Contamination score (0-100) of an already-cropped item image.
    pub fn contamination(&self, crop: &RgbImage) -> Result<f32, ResidueError> {
        let (width, height) = crop.dimensions();
        if width == 0 || height == 0 {
            return Err(ResidueError::EmptyRegion { width, height });
        }

        let mask = self.residue_mask(crop);
        let residue_px: f64 = mask.pixels().map(|p| p.0[0] as f64 / 255.0).sum();
        let score = coverage_score(residue_px, (width * height) as f64, self.config.sensitivity);

        debug!(
            "Residue: {:.0}px of {}x{} → contamination {:.1}%",
            residue_px, width, height, score
        );
        Ok(score)
    }

    /// Weighted residue mask after noise cleanup
    pub fn residue_mask(&self, crop: &RgbImage) -> GrayImage {
        let cfg = &self.config;
        let margin_level = (255.0 * cfg.margin_weight.clamp(0.0, 1.0)).round() as u8;

        let mut mask = GrayImage::new(crop.width(), crop.height());
        for (x, y, px) in crop.enumerate_pixels() {
            let (h, s, v) = rgb_to_hsv(px[0] as f32, px[1] as f32, px[2] as f32);
            let level = if cfg.core.contains(h, s, v) {
                255
            } else if cfg.margin.contains(h, s, v) {
                margin_level
            } else {
                0
            };
            mask.put_pixel(x, y, Luma([level]));
        }

        if cfg.morph_radius > 0 {
            let element = Mask::square(cfg.morph_radius);
            mask = grayscale_open(&mask, &element);
            mask = grayscale_close(&mask, &element);
        }
        if cfg.blur_sigma > 0.0 {
            mask = gaussian_blur_f32(&mask, cfg.blur_sigma);
        }
        mask
    }
}

/// Amplified coverage percentage, hard-capped at 100.
pub fn coverage_score(residue_px: f64, box_area: f64, sensitivity: f32) -> f32 {
    if box_area <= 0.0 {
        return 0.0;
    }
    let raw = residue_px / box_area * 100.0;
    ((raw * sensitivity as f64).min(100.0)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const RESIDUE_BROWN: Rgb<u8> = Rgb([139, 90, 43]);
    const CLEAN_WHITE: Rgb<u8> = Rgb([230, 230, 230]);

    fn analyzer() -> ResidueAnalyzer {
        ResidueAnalyzer::new(ResidueConfig::default())
    }

    #[test]
    fn test_rgb_to_hsv_brown() {
        let (h, s, v) = rgb_to_hsv(139.0, 90.0, 43.0);
        assert!((h - 29.4).abs() < 1.0);
        assert!((s - 69.1).abs() < 1.0);
        assert!((v - 139.0).abs() < 1.0);
    }

    #[test]
    fn test_rgb_to_hsv_white() {
        let (_, s, v) = rgb_to_hsv(255.0, 255.0, 255.0);
        assert!(s < 1.0);
        assert!((v - 255.0).abs() < 1.0);
    }

    #[test]
    fn test_fully_covered_crop_caps_at_100() {
        let crop = RgbImage::from_pixel(40, 30, RESIDUE_BROWN);
        let score = analyzer().contamination(&crop).unwrap();
        assert_eq!(score, 100.0);
    }

    #[test]
    fn test_clean_crop_scores_zero() {
        let crop = RgbImage::from_pixel(40, 30, CLEAN_WHITE);
        let score = analyzer().contamination(&crop).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_isolated_speckle_is_removed() {
        let mut crop = RgbImage::from_pixel(40, 40, CLEAN_WHITE);
        crop.put_pixel(20, 20, RESIDUE_BROWN);
        let score = analyzer().contamination(&crop).unwrap();
        assert!(score < 0.5, "single-pixel speckle should be opened away, got {}", score);
    }

    #[test]
    fn test_partial_patch_is_amplified() {
        // 10x40 stripe on a 40x40 crop → 25% raw coverage → ~50% score
        let mut crop = RgbImage::from_pixel(40, 40, CLEAN_WHITE);
        for y in 0..40 {
            for x in 0..10 {
                crop.put_pixel(x, y, RESIDUE_BROWN);
            }
        }
        let score = analyzer().contamination(&crop).unwrap();
        assert!((score - 50.0).abs() < 5.0, "got {}", score);
    }

    #[test]
    fn test_coverage_score_cap() {
        assert_eq!(coverage_score(100.0, 100.0, 2.0), 100.0);
        assert!((coverage_score(5.0, 100.0, 2.0) - 10.0).abs() < 1e-4);
        assert_eq!(coverage_score(5.0, 0.0, 2.0), 0.0);
    }

    #[test]
    fn test_region_outside_frame_is_error() {
        let frame = RgbImage::from_pixel(100, 100, CLEAN_WHITE);
        let det = DetectionBox::new(150.0, 150.0, 200.0, 200.0, 0, 0.9);
        assert!(analyzer().analyze_region(&frame, &det).is_err());
    }

    #[test]
    fn test_region_is_clamped_to_frame() {
        let frame = RgbImage::from_pixel(100, 100, RESIDUE_BROWN);
        let det = DetectionBox::new(-20.0, 50.0, 60.0, 140.0, 0, 0.9);
        assert_eq!(analyzer().analyze_region(&frame, &det).unwrap(), 100.0);
    }
}
