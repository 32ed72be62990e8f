// src/config.rs

use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.input_width == 0 || self.model.input_height == 0 {
            bail!("model input size must be positive");
        }
        if self.model.class_names.is_empty() {
            bail!("model.class_names must list at least one class");
        }
        if self.detection.min_area > self.detection.max_area {
            bail!(
                "detection.min_area ({}) exceeds detection.max_area ({})",
                self.detection.min_area,
                self.detection.max_area
            );
        }
        if self.pipeline.queue_capacity == 0 {
            bail!("pipeline.queue_capacity must be at least 1");
        }
        if self.pipeline.metrics_window == 0 || self.pipeline.metrics_report_every == 0 {
            bail!("pipeline metrics window and report interval must be positive");
        }
        if let Some([_, _, w, h]) = self.camera.roi {
            if w == 0 || h == 0 {
                bail!("camera.roi must have a non-empty size");
            }
        }
        Ok(())
    }
}
