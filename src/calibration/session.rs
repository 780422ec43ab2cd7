// CalibrationSession - bookkeeping for one calibration attempt sequence
//
// The session owns everything transient: which placements and devices have
// been tried, what each attempt concluded, the abort flag, and the retry
// budget. It is created inside run_session and dropped when it returns;
// nothing here outlives the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CalibrationConfig;

/// One rung of the retry ladder, attempted in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Re-analyze the existing recording with relaxed threshold placement
    ReanalyzeRelaxed,
    /// Discard the recording and prompt the user again
    ReRecord,
    /// Move to the next device on the fallback list and re-record
    FallbackDevice,
}

/// Why an attempt was rejected (or that it was not)
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Accepted,
    /// Press level too close to the noise floor
    LowSeparation { ratio: f32 },
    /// Fewer distinguishable presses than the prompt count
    MissedPresses { detected: usize },
    /// Device could not record
    DeviceFailed { error: String },
    /// Wall-clock timeout expired before the recording completed
    TimedOut,
}

/// Record of one attempt for diagnostics and ladder decisions
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub device: Option<String>,
    pub relaxed_placement: bool,
    pub outcome: AttemptOutcome,
}

/// Session bounds derived from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLimits {
    pub target_press_count: usize,
    pub max_retries: u32,
    pub attempt_timeout: Duration,
}

impl SessionLimits {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            target_press_count: config.target_press_count,
            max_retries: config.max_retries,
            attempt_timeout: Duration::from_secs_f64(config.attempt_timeout_secs),
        }
    }
}

/// Cancellation handle for a running session
///
/// Abort is cooperative: the flag is checked between processed frames, so
/// cancellation tears down the recording without side effects on the
/// previously active detector config.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Transient state of one calibration attempt sequence
#[derive(Debug)]
pub struct CalibrationSession {
    limits: SessionLimits,
    attempts: Vec<AttemptRecord>,
    devices_tried: Vec<String>,
    relaxed_used: bool,
    rerecorded_on_device: bool,
    abort: AbortHandle,
    started: Instant,
}

impl CalibrationSession {
    pub fn new(limits: SessionLimits, abort: AbortHandle) -> Self {
        Self {
            limits,
            attempts: Vec::new(),
            devices_tried: Vec::new(),
            relaxed_used: false,
            rerecorded_on_device: false,
            abort,
            started: Instant::now(),
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn record_attempt(&mut self, record: AttemptRecord) {
        log::info!(
            "[Calibration] Attempt {} on {:?}: {:?}",
            self.attempts.len() + 1,
            record.device.as_deref().unwrap_or("<default>"),
            record.outcome
        );
        self.attempts.push(record);
    }

    /// Attempts made so far
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Retries consumed (attempts beyond the first)
    pub fn retry_count(&self) -> u32 {
        self.attempt_count().saturating_sub(1)
    }

    /// Whether another attempt fits in the budget
    pub fn retries_remaining(&self) -> bool {
        self.attempt_count() < self.limits.max_retries + 1
    }

    /// Decide the next ladder rung
    ///
    /// # Arguments
    /// * `recording_available` - Whether a usable recording exists for
    ///   re-analysis
    pub fn next_step(&self, recording_available: bool) -> Option<RetryStep> {
        if !self.retries_remaining() {
            return None;
        }

        let last_was_device_failure = matches!(
            self.attempts.last().map(|a| &a.outcome),
            Some(AttemptOutcome::DeviceFailed { .. })
        );
        if last_was_device_failure {
            return Some(RetryStep::FallbackDevice);
        }

        if !self.relaxed_used && recording_available {
            return Some(RetryStep::ReanalyzeRelaxed);
        }
        if !self.rerecorded_on_device {
            return Some(RetryStep::ReRecord);
        }
        Some(RetryStep::FallbackDevice)
    }

    pub fn mark_relaxed(&mut self) {
        self.relaxed_used = true;
    }

    pub fn mark_rerecorded(&mut self) {
        self.rerecorded_on_device = true;
    }

    /// Note the device an attempt recorded on; switching devices re-opens
    /// the re-record rung for the new device
    pub fn note_device(&mut self, device: Option<&str>) {
        let name = device.unwrap_or("<default>").to_string();
        if self.devices_tried.last() != Some(&name) {
            self.devices_tried.push(name);
            self.rerecorded_on_device = false;
        }
    }

    pub fn devices_tried(&self) -> &[String] {
        &self.devices_tried
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The failure that best explains the session, for recommendations
    pub fn dominant_failure(&self) -> Option<&AttemptOutcome> {
        // Prefer the most recent signal-shaped failure; fall back to any
        self.attempts
            .iter()
            .rev()
            .map(|a| &a.outcome)
            .find(|o| {
                matches!(
                    o,
                    AttemptOutcome::LowSeparation { .. } | AttemptOutcome::MissedPresses { .. }
                )
            })
            .or_else(|| self.attempts.last().map(|a| &a.outcome))
    }
}
