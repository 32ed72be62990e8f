// src/pipeline/latest.rs
//
// Most recent classification for polling consumers. Readers get an
// `Arc` to an immutable result; publishing swaps the whole value.

use crate::types::ClassificationResult;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
pub struct LatestResult {
    slot: Arc<RwLock<Option<Arc<ClassificationResult>>>>,
}

impl LatestResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: Arc<ClassificationResult>) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(result);
    }

    pub fn get(&self) -> Option<Arc<ClassificationResult>> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}
