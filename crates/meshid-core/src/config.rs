//! Engine tuning knobs: acceptance threshold and detector sensitivity.

use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD: f32 = 0.6;
pub const MIN_THRESHOLD: f32 = 0.1;
pub const MAX_THRESHOLD: f32 = 1.0;
pub const DEFAULT_DETECTOR_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum mapped similarity a gallery entry must exceed to be accepted.
    pub threshold: f32,
    /// Minimum face-presence confidence, passed to the detector at construction.
    pub detector_confidence: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            detector_confidence: DEFAULT_DETECTOR_CONFIDENCE,
        }
    }
}

impl EngineConfig {
    pub fn new(threshold: f32, detector_confidence: f32) -> Self {
        Self {
            threshold: clamp_threshold(threshold),
            detector_confidence: clamp_confidence(detector_confidence),
        }
    }
}

/// Clamp to [0.1, 1.0]. NaN falls back to the default.
pub fn clamp_threshold(value: f32) -> f32 {
    if value.is_nan() {
        return DEFAULT_THRESHOLD;
    }
    value.clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

/// Clamp to [0, 1]. NaN falls back to the default.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        return DEFAULT_DETECTOR_CONFIDENCE;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.threshold, 0.6);
        assert_eq!(cfg.detector_confidence, 0.5);
    }

    #[test]
    fn test_threshold_clamped() {
        assert_eq!(clamp_threshold(0.0), MIN_THRESHOLD);
        assert_eq!(clamp_threshold(-3.0), MIN_THRESHOLD);
        assert_eq!(clamp_threshold(1.7), MAX_THRESHOLD);
        assert_eq!(clamp_threshold(0.75), 0.75);
        assert_eq!(clamp_threshold(f32::NAN), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_new_clamps_both_fields() {
        let cfg = EngineConfig::new(5.0, -1.0);
        assert_eq!(cfg.threshold, 1.0);
        assert_eq!(cfg.detector_confidence, 0.0);
    }
}
