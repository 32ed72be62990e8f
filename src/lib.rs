// src/lib.rs
//
// Recyclable waste sorter: detects items on the sorting surface, follows
// each one across frames, scores residue contamination and reports one
// quality label per physical item.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod detection;
pub mod dispatch;
pub mod pipeline;
pub mod sink;
pub mod tracking;
pub mod types;

pub use types::{Classification, ClassificationResult, Config, DetectionBox, DetectionRecord, Frame};
