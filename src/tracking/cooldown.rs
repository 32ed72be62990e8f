// src/tracking/cooldown.rs
//
// Per-waste-type reporting cooldown. A single physical item that got two
// track ids, or two same-type items placed together, finalize close in
// time; only the first of them is reported.

use std::collections::HashMap;
use tracing::info;

pub struct TypeCooldown {
    window_secs: f64,
    last_finalized: HashMap<String, f64>,
}

impl TypeCooldown {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            last_finalized: HashMap::new(),
        }
    }

    /// Record a finalization of `waste_type` at `now`. Returns false when
    /// another finalization of the same type happened inside the window.
    /// Suppressed finalizations still restart the window.
    pub fn admit(&mut self, waste_type: &str, now: f64) -> bool {
        let admitted = match self.last_finalized.get(waste_type) {
            Some(&last) => now - last >= self.window_secs,
            None => true,
        };
        if !admitted {
            info!(
                "⏳ {} finalized within {:.1}s cooldown, suppressed",
                waste_type, self.window_secs
            );
        }
        self.last_finalized.insert(waste_type.to_string(), now);
        admitted
    }

    pub fn reset(&mut self) {
        self.last_finalized.clear();
    }
}
