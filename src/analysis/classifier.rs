// src/analysis/classifier.rs
//
// Quality label from (waste type, contamination). Pure and deterministic.

use crate::types::{Classification, UNKNOWN_WASTE_TYPE};
use tracing::debug;

pub const PET_BOTTLE: &str = "PET Bottle";
pub const HDPE_PLASTIC: &str = "HDPE Plastic";
pub const LDPE: &str = "LDPE";
pub const PP: &str = "PP";
pub const TIN_STEEL_CAN: &str = "Tin/Steel Can";
pub const UHT_BOX: &str = "UHT Box";

const TYPE_WEIGHT: f32 = 0.6;
const CLEANLINESS_WEIGHT: f32 = 0.4;
const HIGH_VALUE_WEIGHTED_MIN: f32 = 7.0;

/// Intrinsic recycling value of a material, 0-10
pub fn type_score(waste_type: &str) -> u8 {
    match waste_type {
        PET_BOTTLE => 10,
        TIN_STEEL_CAN | HDPE_PLASTIC => 9,
        PP => 8,
        LDPE => 7,
        _ => 5,
    }
}

/// Cleanliness score from contamination bands, 0-10
pub fn cleanliness_score(contamination: f32) -> u8 {
    if contamination < 5.0 {
        10
    } else if contamination < 10.0 {
        8
    } else if contamination < 15.0 {
        6
    } else if contamination < 20.0 {
        4
    } else if contamination < 25.0 {
        2
    } else {
        0
    }
}

pub fn weighted_score(waste_type: &str, contamination: f32) -> f32 {
    type_score(waste_type) as f32 * TYPE_WEIGHT
        + cleanliness_score(contamination) as f32 * CLEANLINESS_WEIGHT
}

pub fn classify(waste_type: &str, contamination: f32) -> Classification {
    if waste_type == UHT_BOX || waste_type == UNKNOWN_WASTE_TYPE {
        return Classification::Mixed;
    }

    let weighted = weighted_score(waste_type, contamination);
    debug!(
        "Scoring {}: contamination={:.1}% weighted={:.2}",
        waste_type, contamination, weighted
    );

    match waste_type {
        PET_BOTTLE | HDPE_PLASTIC => {
            if contamination <= 5.0 {
                Classification::HighValue
            } else if contamination <= 15.0 {
                Classification::LowValue
            } else {
                Classification::Rejected
            }
        }
        LDPE | PP => {
            if contamination <= 15.0 {
                Classification::LowValue
            } else {
                Classification::Rejected
            }
        }
        TIN_STEEL_CAN => {
            if contamination <= 25.0 {
                Classification::HighValue
            } else {
                Classification::LowValue
            }
        }
        _ => {
            if weighted >= HIGH_VALUE_WEIGHTED_MIN {
                Classification::HighValue
            } else {
                Classification::LowValue
            }
        }
    }
}
