//! Configuration management for the switch-scanning core
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling tuning without recompilation. Any read or parse failure falls
//! back to defaults with a warning; a bad config file must never prevent
//! the keyboard from starting.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Scan-speed presets mapping to dwell seconds
pub const SCAN_PRESETS: [(&str, f64); 3] = [("slow", 0.7), ("medium", 0.45), ("fast", 0.25)];

/// Default location of the runtime config file
pub static DEFAULT_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("switch_scan")
        .join("config.json")
});

/// Resolve a scan preset name to its dwell interval in seconds
pub fn scan_preset_interval(preset: &str) -> Option<f64> {
    let wanted = preset.to_ascii_lowercase();
    SCAN_PRESETS
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, dwell)| *dwell)
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub detector: DetectorSettings,
    pub calibration: CalibrationConfig,
    pub scan: ScanConfig,
    pub audio: AudioConfig,
}

/// Fallback detection parameters used before any calibration has run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// Energy level above which a press is registered
    pub press_threshold: f32,
    /// Energy level below which a release is registered (must be < press)
    pub release_threshold: f32,
    /// Minimum spacing between accepted transitions of the same kind
    pub debounce_ms: u32,
    /// Length of the rectified moving-average energy window in samples
    pub energy_window: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            // Conservative defaults for an uncalibrated contact switch;
            // calibration replaces both thresholds with measured values
            press_threshold: 0.5,
            release_threshold: 0.3,
            debounce_ms: 40,
            energy_window: 64,
        }
    }
}

/// Calibration session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Number of switch presses the user is prompted for
    pub target_press_count: usize,
    /// Retry-ladder budget across re-analysis, re-recording, and device fallback
    pub max_retries: u32,
    /// Wall-clock bound per attempt, independent of press progress
    pub attempt_timeout_secs: f64,
    /// Quiet lead-in before the first prompt slot
    pub lead_in_secs: f64,
    /// Length of each prompted press slot
    pub prompt_slot_secs: f64,
    /// Quiet gap between prompt slots
    pub prompt_gap_secs: f64,
    /// Minimum press-level / noise-floor ratio for an attempt to be accepted
    pub min_separation_ratio: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_press_count: 10,
            max_retries: 3,
            attempt_timeout_secs: 30.0,
            lead_in_secs: 1.5,
            prompt_slot_secs: 0.8,
            prompt_gap_secs: 0.6,
            min_separation_ratio: 1.5,
        }
    }
}

/// Scan state-machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Time in seconds each key remains highlighted
    pub dwell_interval: f64,
    /// Use row/column scanning instead of linear scanning
    pub row_column_scan: bool,
    /// Cool-down after an activation during which presses are discarded
    pub rearm_delay: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dwell_interval: 0.6,
            row_column_scan: false,
            rearm_delay: 0.25,
        }
    }
}

impl ScanConfig {
    /// Apply a named speed preset, leaving other fields untouched
    pub fn with_preset(mut self, preset: &str) -> Self {
        if let Some(dwell) = scan_preset_interval(preset) {
            self.dwell_interval = dwell;
        } else {
            log::warn!("[Config] Unknown scan preset '{}', keeping dwell", preset);
        }
        self
    }
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Frames per capture block
    pub blocksize: usize,
    /// Number of pre-allocated buffers in the capture pool
    pub buffer_pool_size: usize,
    /// Optional input device override (None = system default)
    #[serde(default)]
    pub device_id: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            blocksize: 256,
            buffer_pool_size: 16,
            device_id: None,
        }
    }
}

impl Default for AppConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            detector: DetectorSettings::default(),
            calibration: CalibrationConfig::default(),
            scan: ScanConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Loaded configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the platform default location
    pub fn load() -> Self {
        Self::load_from_file(&*DEFAULT_CONFIG_PATH)
    }
}
