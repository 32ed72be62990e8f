// src/tracking/mod.rs
//
// Item identity across frames.
//
//   Filtered detections → tracker (match / create) → lifecycle (advance)
//                                                       └→ Finalization → cooldown gate → result

pub mod cooldown;
pub mod track;
pub mod tracker;

pub use cooldown::TypeCooldown;
pub use track::{Track, TrackState};
pub use tracker::{Finalization, Housekeeping, IdentityTracker, Observation};
