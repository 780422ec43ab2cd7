// CalibrationRecord - persisted calibration state
//
// Versioned JSON record read and written by the config-management layer.
// Records predating the quality metrics load with defaulted fields
// (confidence 0.0, quality "unknown") so upgrading never invalidates an
// existing calibration.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::result::{CalibResult, SignalQuality};
use crate::detect::DetectorConfig;
use crate::error::{ConfigError, ErrorCode};

/// Current record schema version
pub const RECORD_VERSION: u32 = 2;

/// Default location of the persisted record
pub static DEFAULT_RECORD_PATH: Lazy<PathBuf> = Lazy::new(|| {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("switch_scan")
        .join("calibration.json")
});

fn default_version() -> u32 {
    1
}

fn default_quality() -> SignalQuality {
    SignalQuality::Unknown
}

/// Persisted calibration state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Schema version; legacy records without the field are version 1
    #[serde(default = "default_version")]
    pub version: u32,
    pub press_threshold: f32,
    pub release_threshold: f32,
    pub debounce_ms: u32,
    pub sample_rate: u32,
    /// Defaults to 0.0 for records predating quality metrics
    #[serde(default)]
    pub confidence_score: f32,
    /// Defaults to "unknown" for records predating quality metrics
    #[serde(default = "default_quality")]
    pub signal_quality: SignalQuality,
    #[serde(default)]
    pub device_id: Option<String>,
    /// RFC 3339 timestamp stamped at save time
    #[serde(default)]
    pub calibrated_at: Option<String>,
}

impl CalibrationRecord {
    /// Build a record from a session result
    ///
    /// The timestamp is stamped here, at persistence time, so the
    /// CalibResult itself stays deterministic.
    pub fn from_result(result: &CalibResult) -> Self {
        Self {
            version: RECORD_VERSION,
            press_threshold: result.press_threshold,
            release_threshold: result.release_threshold,
            debounce_ms: result.debounce_ms,
            sample_rate: result.sample_rate,
            confidence_score: result.confidence_score,
            signal_quality: result.signal_quality,
            device_id: result.device_used.clone(),
            calibrated_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Load a record from disk
    ///
    /// # Errors
    /// `ConfigError::InvalidRecord` when the file is missing or corrupt;
    /// `ConfigError::InvalidField` when parsed values fail validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(&path).map_err(|e| ConfigError::InvalidRecord {
                reason: format!("{}: {}", path.as_ref().display(), e),
            })?;
        let record: Self =
            serde_json::from_str(&contents).map_err(|e| ConfigError::InvalidRecord {
                reason: e.to_string(),
            })?;
        record.validate()?;
        Ok(record)
    }

    /// Load a record, falling back to `fallback` on any failure
    ///
    /// A corrupt record must never prevent startup; the failure is logged
    /// and safe defaults are used instead.
    pub fn load_or<P: AsRef<Path>>(path: P, fallback: DetectorConfig) -> DetectorConfig {
        match Self::load(&path) {
            Ok(record) => {
                log::info!(
                    "[Calibration] Loaded record from {:?} (quality={})",
                    path.as_ref(),
                    record.signal_quality.display_name()
                );
                record.to_detector_config()
            }
            Err(err) => {
                log::warn!(
                    "[Calibration] {}. Using fallback detector settings.",
                    err.message()
                );
                fallback
            }
        }
    }

    /// Persist the record as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::InvalidRecord {
                reason: format!("create {}: {}", parent.display(), e),
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidRecord {
            reason: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| ConfigError::InvalidRecord {
            reason: format!("{}: {}", path.as_ref().display(), e),
        })?;
        log::info!("[Calibration] Saved record to {:?}", path.as_ref());
        Ok(())
    }

    /// Sanity-check field values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.press_threshold.is_finite() || self.press_threshold <= 0.0 {
            return Err(ConfigError::InvalidField {
                field: "press_threshold".to_string(),
                reason: format!("{} is not a positive finite value", self.press_threshold),
            });
        }
        if !self.release_threshold.is_finite() || self.release_threshold <= 0.0 {
            return Err(ConfigError::InvalidField {
                field: "release_threshold".to_string(),
                reason: format!("{} is not a positive finite value", self.release_threshold),
            });
        }
        if self.release_threshold >= self.press_threshold {
            return Err(ConfigError::InvalidField {
                field: "release_threshold".to_string(),
                reason: "hysteresis requires release below press".to_string(),
            });
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidField {
                field: "sample_rate".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        if self.debounce_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: "debounce_ms".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Detector snapshot carried by this record
    pub fn to_detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            press_threshold: self.press_threshold,
            release_threshold: self.release_threshold,
            debounce: Duration::from_millis(self.debounce_ms as u64),
            sample_rate: self.sample_rate,
            device_id: self.device_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::result::SignalQuality;

    fn sample_record() -> CalibrationRecord {
        CalibrationRecord {
            version: RECORD_VERSION,
            press_threshold: 0.35,
            release_threshold: 0.2,
            debounce_ms: 40,
            sample_rate: 44_100,
            confidence_score: 0.9,
            signal_quality: SignalQuality::Excellent,
            device_id: Some("USB Switch Mic".to_string()),
            calibrated_at: Some("2026-08-07T12:00:00+00:00".to_string()),
        }
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let dir = std::env::temp_dir().join("switch_scan_record_roundtrip");
        let path = dir.join("calibration.json");
        let record = sample_record();

        record.save(&path).unwrap();
        let loaded = CalibrationRecord::load(&path).unwrap();

        assert_eq!(loaded.press_threshold, record.press_threshold);
        assert_eq!(loaded.release_threshold, record.release_threshold);
        assert_eq!(loaded.debounce_ms, record.debounce_ms);
        assert_eq!(loaded.confidence_score, record.confidence_score);
        assert_eq!(loaded.signal_quality, record.signal_quality);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_legacy_record_gets_documented_defaults() {
        // A minimal pre-quality record: thresholds and debounce only
        let json = r#"{
            "press_threshold": 0.4,
            "release_threshold": 0.25,
            "debounce_ms": 30,
            "sample_rate": 44100
        }"#;

        let record: CalibrationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.confidence_score, 0.0);
        assert_eq!(record.signal_quality, SignalQuality::Unknown);
        assert!(record.device_id.is_none());
        assert!(record.calibrated_at.is_none());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut record = sample_record();
        record.release_threshold = record.press_threshold;
        assert!(matches!(
            record.validate(),
            Err(ConfigError::InvalidField { .. })
        ));

        let mut record = sample_record();
        record.press_threshold = f32::NAN;
        assert!(record.validate().is_err());

        let mut record = sample_record();
        record.sample_rate = 0;
        assert!(record.validate().is_err());

        let mut record = sample_record();
        record.debounce_ms = 0;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = CalibrationRecord::load("/nonexistent/calibration.json");
        assert!(matches!(result, Err(ConfigError::InvalidRecord { .. })));
    }

    #[test]
    fn test_load_or_falls_back_on_corrupt_file() {
        let dir = std::env::temp_dir().join("switch_scan_record_corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calibration.json");
        std::fs::write(&path, "{ not json").unwrap();

        let fallback = DetectorConfig {
            press_threshold: 0.5,
            release_threshold: 0.3,
            debounce: Duration::from_millis(40),
            sample_rate: 44_100,
            device_id: None,
        };
        let config = CalibrationRecord::load_or(&path, fallback.clone());
        assert_eq!(config, fallback);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_result_stamps_version_and_timestamp() {
        let result = CalibResult {
            press_threshold: 0.35,
            release_threshold: 0.2,
            debounce_ms: 40,
            sample_rate: 44_100,
            confidence_score: 0.9,
            signal_quality: SignalQuality::Excellent,
            retry_count: 0,
            device_used: None,
            recommendations: Vec::new(),
            press_count: 10,
            noise_floor: 0.05,
            press_level: 0.8,
        };

        let record = CalibrationRecord::from_result(&result);
        assert_eq!(record.version, RECORD_VERSION);
        assert!(record.calibrated_at.is_some());
        assert!(record.validate().is_ok());
    }
}
