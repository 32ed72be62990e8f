// src/detection/recorded.rs
//
// Replays detector output captured earlier: one JSON array of
// `RawDetection` per line, one line per inference call. Used for offline
// runs against recorded footage and to drive the pipeline in tests.

use super::oracle::{DetectionOracle, RawDetection};
use anyhow::{Context, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::info;

pub struct RecordedOracle {
    input_size: (u32, u32),
    frames: VecDeque<Vec<RawDetection>>,
}

impl RecordedOracle {
    pub fn new(input_size: (u32, u32), frames: Vec<Vec<RawDetection>>) -> Self {
        Self {
            input_size,
            frames: frames.into(),
        }
    }

    pub fn from_jsonl(path: &Path, input_size: (u32, u32)) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read recorded detections {}", path.display()))?;

        let mut frames = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let dets: Vec<RawDetection> = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid detection list", path.display(), line_no + 1))?;
            frames.push(dets);
        }

        info!(
            "Loaded {} recorded detection frames from {}",
            frames.len(),
            path.display()
        );
        Ok(Self::new(input_size, frames))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl DetectionOracle for RecordedOracle {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}
