// src/tracking/track.rs

use crate::types::DetectionBox;

/// Lifecycle of one physical item candidate.
///
///   Analyzing ──(type resolved)──→ Stabilizing ──(stable + dwell)──→ Finalized ──(timeout)──→ Expired
///       ↑                              │
///       └──────(resolution lost)───────┘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Analyzing,
    Stabilizing,
    Finalized,
    Expired,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzing => "ANALYZING",
            Self::Stabilizing => "STABILIZING",
            Self::Finalized => "FINALIZED",
            Self::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    /// Centroid of the best (highest-confidence) observation
    pub centroid: (f32, f32),
    /// Centroid of the most recent observation
    pub last_centroid: (f32, f32),
    pub bbox: [f32; 4],
    pub state: TrackState,
    pub class_id: u32,
    pub waste_type: Option<String>,
    pub best_confidence: f32,
    pub stable_count: u32,
    pub first_criteria_met_time: Option<f64>,
    pub last_update_time: f64,
    pub finalized_time: Option<f64>,
    pub missed_cycles: u32,
    pub last_contamination: f32,
    pub(crate) matched_this_cycle: bool,
}

impl Track {
    pub(crate) fn new(id: String, det: &DetectionBox, now: f64) -> Self {
        let centroid = det.centroid();
        Self {
            id,
            centroid,
            last_centroid: centroid,
            bbox: det.bbox,
            state: TrackState::Analyzing,
            class_id: det.class_id,
            waste_type: None,
            best_confidence: det.confidence,
            stable_count: 0,
            first_criteria_met_time: None,
            last_update_time: now,
            finalized_time: None,
            missed_cycles: 0,
            last_contamination: 0.0,
            matched_this_cycle: true,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state == TrackState::Finalized
    }

    /// Distance from the most recent observation. Matching follows the
    /// item as it moves; the best-observation centroid can lag behind.
    pub fn distance_to(&self, point: (f32, f32)) -> f32 {
        ((self.last_centroid.0 - point.0).powi(2) + (self.last_centroid.1 - point.1).powi(2)).sqrt()
    }

    /// Seconds the current resolved-type streak has lasted
    pub fn dwell(&self, now: f64) -> f64 {
        self.first_criteria_met_time
            .map(|t| now - t)
            .unwrap_or(0.0)
    }

    pub(crate) fn update_with_detection(&mut self, det: &DetectionBox, stable_motion_px: f32, now: f64) {
        let (cx, cy) = det.centroid();
        let movement =
            ((cx - self.last_centroid.0).powi(2) + (cy - self.last_centroid.1).powi(2)).sqrt();

        if movement < stable_motion_px {
            self.stable_count += 1;
        } else {
            self.stable_count = self.stable_count.saturating_sub(1);
        }

        if det.confidence > self.best_confidence {
            self.best_confidence = det.confidence;
            self.class_id = det.class_id;
            self.centroid = (cx, cy);
            self.bbox = det.bbox;
        }

        self.last_centroid = (cx, cy);
        self.last_update_time = now;
        self.missed_cycles = 0;
        self.matched_this_cycle = true;
    }
}
