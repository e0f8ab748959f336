//! Utility functions shared across the codebase

pub mod json;
pub mod math;

// Re-export commonly used utilities
pub use json::{extract_json, number_value};
pub use math::{clamp_percent, clamp_unit, weighted_average};
