// src/tracking/tracker.rs
//
// Centroid-based identity tracker for items on the sorting surface.
//
// Design:
//   - Greedy nearest-centroid matching in detector order (a handful of
//     items are visible at once, so optimal assignment is not needed)
//   - Finalized tracks are excluded from matching and keep their id
//     reserved until they expire
//   - Ids are 4-character alphanumerics drawn by rejection sampling
//     against every active and finalized id
//
// Per cycle the caller runs, for each detection:
//   assign() → (score the item) → advance()
// and then end_cycle() once to age unmatched tracks and release expired
// ids.

use super::track::{Track, TrackState};
use crate::types::{DetectionBox, TrackingConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, info};

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 4;

/// Per-cycle scoring of a matched detection
#[derive(Debug, Clone)]
pub struct Observation {
    /// Waste type when the detection was confident enough to trust it
    pub waste_type: Option<String>,
    pub contamination: f32,
}

/// A track that just reached `Finalized`
#[derive(Debug, Clone)]
pub struct Finalization {
    pub id: String,
    pub waste_type: String,
    pub contamination: f32,
    pub confidence: f32,
    pub dwell_secs: f64,
}

/// Tracks removed during `end_cycle`
#[derive(Debug, Default)]
pub struct Housekeeping {
    /// Unmatched for too long before finalizing. Never reported.
    pub lost: Vec<Track>,
    /// Finalized tracks whose id is now free again
    pub expired: Vec<Track>,
}

pub struct IdentityTracker {
    pub config: TrackingConfig,
    active: Vec<Track>,
    finalized: HashMap<String, Track>,
    rng: StdRng,
}

impl IdentityTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: TrackingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: TrackingConfig, rng: StdRng) -> Self {
        Self {
            config,
            active: Vec::with_capacity(16),
            finalized: HashMap::new(),
            rng,
        }
    }

    /// Match `det` to the nearest non-finalized track within the match
    /// distance, or open a new track. Returns the track id.
    pub fn assign(&mut self, det: &DetectionBox, now: f64) -> String {
        let point = det.centroid();

        let nearest = self
            .active
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.distance_to(point)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((idx, dist)) = nearest {
            if dist <= self.config.match_distance_px {
                let track = &mut self.active[idx];
                track.update_with_detection(det, self.config.stable_motion_px, now);
                debug!(
                    "Track {} matched (dist={:.1}px, stable={}, conf={:.2})",
                    track.id, dist, track.stable_count, det.confidence
                );
                return track.id.clone();
            }
        }

        let id = self.generate_id();
        info!(
            "🆕 Track {} created: class={}, centroid=({:.0},{:.0}), conf={:.2}",
            id, det.class_id, point.0, point.1, det.confidence
        );
        self.active.push(Track::new(id.clone(), det, now));
        id
    }

    /// Drive the lifecycle of an active track with this cycle's scoring.
    /// Returns the finalization when the track crosses into `Finalized`.
    pub fn advance(&mut self, id: &str, obs: Observation, now: f64) -> Option<Finalization> {
        let idx = self.active.iter().position(|t| t.id == id)?;
        let min_stable = self.config.min_stable_count;
        let dwell_secs = self.config.dwell_secs;

        let track = &mut self.active[idx];
        track.last_contamination = obs.contamination;

        match obs.waste_type {
            Some(waste_type) => {
                if track.first_criteria_met_time.is_none() {
                    track.first_criteria_met_time = Some(now);
                    debug!("Track {} resolved as {}, dwell timer started", track.id, waste_type);
                }
                track.waste_type = Some(waste_type);
                track.state = TrackState::Stabilizing;
            }
            None => {
                if track.first_criteria_met_time.take().is_some() {
                    debug!("Track {} lost type resolution, dwell timer reset", track.id);
                }
                track.state = TrackState::Analyzing;
                return None;
            }
        }

        let dwell = track.dwell(now);
        if track.stable_count < min_stable || dwell < dwell_secs {
            return None;
        }

        let mut track = self.active.remove(idx);
        track.state = TrackState::Finalized;
        track.finalized_time = Some(now);

        let finalization = Finalization {
            id: track.id.clone(),
            waste_type: track.waste_type.clone().unwrap_or_default(),
            contamination: track.last_contamination,
            confidence: track.best_confidence,
            dwell_secs: dwell,
        };
        info!(
            "✅ Track {} finalized: {} (stable={}, dwell={:.2}s, contamination={:.1}%)",
            track.id, finalization.waste_type, track.stable_count, dwell, track.last_contamination
        );
        self.finalized.insert(track.id.clone(), track);
        Some(finalization)
    }

    /// Age unmatched tracks, drop lost ones and release expired ids.
    pub fn end_cycle(&mut self, now: f64) -> Housekeeping {
        let mut report = Housekeeping::default();
        let max_lost = self.config.max_lost_cycles;

        for track in &mut self.active {
            if !track.matched_this_cycle {
                track.missed_cycles += 1;
            }
            track.matched_this_cycle = false;
        }

        let (lost, kept): (Vec<Track>, Vec<Track>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|t| t.missed_cycles > max_lost);
        self.active = kept;
        for track in &lost {
            info!(
                "🗑️  Track {} dropped in {} (unmatched {} cycles)",
                track.id,
                track.state.as_str(),
                track.missed_cycles
            );
        }
        report.lost = lost;

        let timeout = self.config.finalize_timeout_secs;
        let expired_ids: Vec<String> = self
            .finalized
            .values()
            .filter(|t| t.finalized_time.map_or(true, |ft| now - ft >= timeout))
            .map(|t| t.id.clone())
            .collect();
        for id in expired_ids {
            if let Some(mut track) = self.finalized.remove(&id) {
                track.state = TrackState::Expired;
                debug!("Track {} expired, id released", track.id);
                report.expired.push(track);
            }
        }

        report
    }

    fn generate_id(&mut self) -> String {
        loop {
            let candidate: String = (0..ID_LEN)
                .map(|_| ID_ALPHABET[self.rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect();
            if !self.is_reserved(&candidate) {
                return candidate;
            }
        }
    }

    /// True when `id` belongs to an active or finalized track
    pub fn is_reserved(&self, id: &str) -> bool {
        self.finalized.contains_key(id) || self.active.iter().any(|t| t.id == id)
    }

    pub fn get_track(&self, id: &str) -> Option<&Track> {
        self.active
            .iter()
            .find(|t| t.id == id)
            .or_else(|| self.finalized.get(id))
    }

    pub fn active_tracks(&self) -> &[Track] {
        &self.active
    }

    pub fn finalized_ids(&self) -> impl Iterator<Item = &str> {
        self.finalized.keys().map(|k| k.as_str())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized.len()
    }

    pub fn reset(&mut self) {
        self.active.clear();
        self.finalized.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================
