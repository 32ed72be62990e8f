// src/analysis/mod.rs
//
// Per-item scoring.
//
// Signal flow:
//   Item crop → residue (HSV mask) → contamination % ─┐
//   Resolved waste type ───────────────────────────────┴→ classifier → Classification

pub mod classifier;
pub mod residue;

pub use classifier::classify;
pub use residue::{ResidueAnalyzer, ResidueError};
