// CalibResult - the outcome of a calibration session
//
// One tagged record with defaulted quality fields rather than a plain/
// enhanced class split: a legacy consumer reads the threshold fields and
// ignores the rest, and partial construction is impossible.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::detect::DetectorConfig;

/// Discrete signal-quality bucket derived from the confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    /// Pre-quality-metric records only; never produced by a new session
    Unknown,
}

impl SignalQuality {
    /// Map a confidence score to its bucket via fixed breakpoints
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            SignalQuality::Excellent
        } else if confidence >= 0.6 {
            SignalQuality::Good
        } else if confidence >= 0.4 {
            SignalQuality::Fair
        } else {
            SignalQuality::Poor
        }
    }

    /// Get human-readable name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            SignalQuality::Excellent => "excellent",
            SignalQuality::Good => "good",
            SignalQuality::Fair => "fair",
            SignalQuality::Poor => "poor",
            SignalQuality::Unknown => "unknown",
        }
    }
}

/// Actionable hints attached to low-quality results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    RepositionMicrophone,
    ReduceBackgroundNoise,
    PressMoreFirmly,
    TryAlternateDevice,
    IncreasePressCount,
}

/// Result of one calibration session
///
/// Produced exclusively by the Calibrator; handed by value to whoever
/// persists it and to the detector as a new config snapshot. Given an
/// identical recorded sample sequence and identical retry-ladder inputs
/// the result is byte-identical across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibResult {
    pub press_threshold: f32,
    pub release_threshold: f32,
    pub debounce_ms: u32,
    pub sample_rate: u32,
    /// Combined separation/consistency score in [0, 1]
    pub confidence_score: f32,
    pub signal_quality: SignalQuality,
    /// Retries consumed before this result (0 = first attempt succeeded)
    pub retry_count: u32,
    pub device_used: Option<String>,
    /// Non-empty whenever the retry ladder was exhausted
    pub recommendations: Vec<Recommendation>,
    /// Distinguishable presses in the accepted recording
    pub press_count: usize,
    pub noise_floor: f32,
    pub press_level: f32,
}

impl CalibResult {
    /// Whether the thresholds are trustworthy enough to apply automatically
    pub fn is_usable(&self) -> bool {
        !matches!(
            self.signal_quality,
            SignalQuality::Poor | SignalQuality::Unknown
        )
    }

    /// Build the detector snapshot this result implies
    pub fn to_detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            press_threshold: self.press_threshold,
            release_threshold: self.release_threshold,
            debounce: Duration::from_millis(self.debounce_ms as u64),
            sample_rate: self.sample_rate,
            device_id: self.device_used.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_breakpoints() {
        assert_eq!(SignalQuality::from_confidence(0.95), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_confidence(0.8), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_confidence(0.79), SignalQuality::Good);
        assert_eq!(SignalQuality::from_confidence(0.6), SignalQuality::Good);
        assert_eq!(SignalQuality::from_confidence(0.59), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_confidence(0.4), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_confidence(0.39), SignalQuality::Poor);
        assert_eq!(SignalQuality::from_confidence(0.0), SignalQuality::Poor);
    }

    #[test]
    fn test_quality_serializes_lowercase() {
        let json = serde_json::to_string(&SignalQuality::Excellent).unwrap();
        assert_eq!(json, "\"excellent\"");
        let parsed: SignalQuality = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(parsed, SignalQuality::Unknown);
    }

    #[test]
    fn test_recommendation_serializes_snake_case() {
        let json = serde_json::to_string(&Recommendation::ReduceBackgroundNoise).unwrap();
        assert_eq!(json, "\"reduce_background_noise\"");
    }

    fn sample_result() -> CalibResult {
        CalibResult {
            press_threshold: 0.35,
            release_threshold: 0.2,
            debounce_ms: 40,
            sample_rate: 44_100,
            confidence_score: 0.9,
            signal_quality: SignalQuality::Excellent,
            retry_count: 0,
            device_used: Some("USB Switch Mic".to_string()),
            recommendations: Vec::new(),
            press_count: 10,
            noise_floor: 0.05,
            press_level: 0.8,
        }
    }

    #[test]
    fn test_is_usable() {
        let mut result = sample_result();
        assert!(result.is_usable());

        result.signal_quality = SignalQuality::Poor;
        assert!(!result.is_usable());

        result.signal_quality = SignalQuality::Fair;
        assert!(result.is_usable());
    }

    #[test]
    fn test_to_detector_config() {
        let result = sample_result();
        let config = result.to_detector_config();
        assert_eq!(config.press_threshold, 0.35);
        assert_eq!(config.release_threshold, 0.2);
        assert_eq!(config.debounce, Duration::from_millis(40));
        assert_eq!(config.device_id.as_deref(), Some("USB Switch Mic"));
    }

    #[test]
    fn test_result_json_roundtrip() {
        let result = sample_result();
        let json = serde_json::to_string(&result).unwrap();
        let parsed: CalibResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }
}
