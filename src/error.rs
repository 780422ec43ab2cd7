// Error types for the switch-scanning core
//
// This module defines custom error types for audio, calibration, and
// configuration failures, providing structured error handling with
// numeric error codes for the embedding application.
//
// Signal-quality failures during calibration are deliberately NOT an
// error type here: they drive the retry ladder inside the Calibrator
// and surface as a low-quality CalibResult, never as an Err.

use log::error;
use std::fmt;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// component boundaries.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Log an audio error with structured context
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=Capture, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Log a calibration error with structured context
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=Calibrator, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Log a configuration error with structured context
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=Config, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-device errors
///
/// These errors cover input-device access: enumeration, opening a capture
/// stream, and mid-stream disconnects. All of them are candidates for the
/// device fallback list before being surfaced to the caller.
///
/// Error code range: 1001-1006
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No input device is available on the host
    NoInputDevice,

    /// A device was requested by name but is not present
    DeviceNotFound { name: String },

    /// Microphone permission denied by the OS
    PermissionDenied,

    /// Failed to open or start the capture stream
    StreamOpenFailed { reason: String },

    /// The stream reported a mid-capture failure or the device disappeared
    Disconnected { details: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::NoInputDevice => 1001,
            AudioError::DeviceNotFound { .. } => 1002,
            AudioError::PermissionDenied => 1003,
            AudioError::StreamOpenFailed { .. } => 1004,
            AudioError::Disconnected { .. } => 1005,
            AudioError::LockPoisoned { .. } => 1006,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::NoInputDevice => "No audio input device available".to_string(),
            AudioError::DeviceNotFound { name } => {
                format!("Input device '{}' not found", name)
            }
            AudioError::PermissionDenied => "Microphone permission denied".to_string(),
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::Disconnected { details } => {
                format!("Audio device disconnected: {}", details)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

/// Convert from std::io::Error to AudioError
impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::Disconnected {
            details: err.to_string(),
        }
    }
}

/// Calibration-session errors
///
/// The Calibrator absorbs device and quality failures internally up to its
/// retry limits; these variants cover the only conditions that escape it.
///
/// Error code range: 2001-2004
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// No device could be opened and the fallback list is exhausted
    DeviceUnavailable { last_error: String },

    /// The caller cancelled the session mid-recording
    Aborted,

    /// A calibration session is already running
    AlreadyInProgress,

    /// Shared detector-config lock was poisoned
    StatePoisoned,
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::DeviceUnavailable { .. } => 2001,
            CalibrationError::Aborted => 2002,
            CalibrationError::AlreadyInProgress => 2003,
            CalibrationError::StatePoisoned => 2004,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::DeviceUnavailable { last_error } => {
                format!("No usable audio device remains: {}", last_error)
            }
            CalibrationError::Aborted => "Calibration session aborted by caller".to_string(),
            CalibrationError::AlreadyInProgress => {
                "Calibration session already in progress".to_string()
            }
            CalibrationError::StatePoisoned => "Calibration state lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

/// Configuration errors
///
/// Invalid persisted records and unusable layouts. Callers are expected to
/// fall back to safe defaults on these rather than crash; the scanning loop
/// itself never sees them past startup.
///
/// Error code range: 3001-3004
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Layout contains no scannable keys
    EmptyLayout,

    /// Persisted calibration record is missing, corrupt, or unreadable
    InvalidRecord { reason: String },

    /// Persisted record carries fields that fail sanity validation
    InvalidField { field: String, reason: String },

    /// Layout file is missing or not valid layout JSON
    LayoutUnreadable { reason: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::EmptyLayout => 3001,
            ConfigError::InvalidRecord { .. } => 3002,
            ConfigError::InvalidField { .. } => 3003,
            ConfigError::LayoutUnreadable { .. } => 3004,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::EmptyLayout => "Keyboard layout contains no scannable keys".to_string(),
            ConfigError::InvalidRecord { reason } => {
                format!("Invalid calibration record: {}", reason)
            }
            ConfigError::InvalidField { field, reason } => {
                format!("Invalid calibration field '{}': {}", field, reason)
            }
            ConfigError::LayoutUnreadable { reason } => {
                format!("Unreadable keyboard layout: {}", reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}
