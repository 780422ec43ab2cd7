// Progress tracking for the calibration session
//
// Progress is push-only: the Calibrator publishes these over a broadcast
// channel and never reads anything back, keeping it headless and testable
// without a rendering dependency.

use crate::calibration::result::SignalQuality;

/// Phase of the calibration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CalibrationPhase {
    /// Measuring ambient noise; the user should stay quiet
    LeadIn,
    /// Prompting for switch presses
    Recording,
    /// Deriving thresholds from the recording
    Analyzing,
    /// A retry-ladder step is running
    Retrying,
    /// Session finished (successfully or exhausted)
    Complete,
}

impl CalibrationPhase {
    /// Get human-readable name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            CalibrationPhase::LeadIn => "LEAD-IN",
            CalibrationPhase::Recording => "RECORDING",
            CalibrationPhase::Analyzing => "ANALYZING",
            CalibrationPhase::Retrying => "RETRYING",
            CalibrationPhase::Complete => "COMPLETE",
        }
    }
}

/// Progress snapshot sent to the UI observer
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationProgress {
    pub phase: CalibrationPhase,
    /// Presses detected so far in the current recording
    pub presses_detected: u8,
    /// Presses the user is prompted for
    pub presses_needed: u8,
    /// 1-based attempt number
    pub attempt: u32,
    /// Total attempts the retry ladder may use
    pub max_attempts: u32,
    /// Final quality, present only in the Complete phase
    pub quality: Option<SignalQuality>,
}

impl CalibrationProgress {
    pub fn new(
        phase: CalibrationPhase,
        presses_detected: u8,
        presses_needed: u8,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            phase,
            presses_detected,
            presses_needed,
            attempt,
            max_attempts,
            quality: None,
        }
    }

    /// Terminal progress update carrying the final quality
    pub fn complete(quality: SignalQuality, attempt: u32, max_attempts: u32) -> Self {
        Self {
            phase: CalibrationPhase::Complete,
            presses_detected: 0,
            presses_needed: 0,
            attempt,
            max_attempts,
            quality: Some(quality),
        }
    }

    /// Presses still expected from the user
    pub fn remaining(&self) -> u8 {
        self.presses_needed.saturating_sub(self.presses_detected)
    }

    /// Get progress percentage (0-100)
    pub fn percentage(&self) -> u8 {
        if self.presses_needed == 0 {
            return 0;
        }
        ((self.presses_detected as f32 / self.presses_needed as f32) * 100.0) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.phase == CalibrationPhase::Complete
    }
}
