// Calibrator - bounded recording session with a retry ladder
//
// run_session records a prompted clip, derives detection parameters, and
// validates them. Rejected attempts walk the retry ladder in order:
// re-analyze the same recording with a relaxed profile, re-record, then
// escalate to an alternate device from the fallback list. Exhausting the
// ladder is not an error: the session returns a poor-quality CalibResult
// with recommendations. Only an unusable device with no fallback left, or
// an explicit abort, escapes as an Err.
//
// Recording is pulled through the AudioProvider seam so tests and the CLI
// replay recorded clips deterministically.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::audio::capture::CaptureEngine;
use crate::audio::device::DeviceManager;
use crate::audio::stubs::ScriptedSource;
use crate::audio::FrameSource;
use crate::calibration::analysis::{
    analyze, choose_debounce, confidence_score, place_thresholds, AnalysisProfile,
    PromptSchedule, SignalStats,
};
use crate::calibration::progress::{CalibrationPhase, CalibrationProgress};
use crate::calibration::result::{CalibResult, Recommendation, SignalQuality};
use crate::calibration::session::{
    AbortHandle, AttemptOutcome, AttemptRecord, CalibrationSession, RetryStep, SessionLimits,
};
use crate::config::{AudioConfig, CalibrationConfig, DetectorSettings};
use crate::detect::energy_trace;
use crate::error::{log_audio_error, AudioError, CalibrationError, ErrorCode};

/// Confidence ceiling stamped on exhausted-ladder results so the score
/// never contradicts the forced poor bucket
const EXHAUSTED_CONFIDENCE_CAP: f32 = 0.35;

/// Confidence below which even an accepted result carries hints
const ADVICE_THRESHOLD: f32 = 0.7;

/// Supplies recordable audio to a calibration session
pub trait AudioProvider {
    /// Open a frame source on `device` (None = system default)
    fn open_source(&mut self, device: Option<&str>) -> Result<Box<dyn FrameSource>, AudioError>;

    /// Ordered device names to escalate to, excluding those already tried
    fn fallback_devices(&self, preferred: Option<&str>, tried: &[String]) -> Vec<String>;
}

/// Live provider backed by cpal capture
pub struct CpalProvider {
    audio: AudioConfig,
    // Keeps the most recent stream alive while its source is in use
    engine: Option<CaptureEngine>,
}

impl CpalProvider {
    pub fn new(audio: AudioConfig) -> Self {
        Self {
            audio,
            engine: None,
        }
    }
}

impl AudioProvider for CpalProvider {
    fn open_source(&mut self, device: Option<&str>) -> Result<Box<dyn FrameSource>, AudioError> {
        // Drop any previous stream before opening the next one
        self.engine = None;
        let (engine, source) = CaptureEngine::open(device, &self.audio)?;
        self.engine = Some(engine);
        Ok(Box::new(source))
    }

    fn fallback_devices(&self, preferred: Option<&str>, tried: &[String]) -> Vec<String> {
        DeviceManager::fallback_candidates(preferred, tried)
            .into_iter()
            .map(|candidate| candidate.name)
            .collect()
    }
}

/// One scripted recording attempt
pub enum ScriptedTake {
    Clip { samples: Vec<f32>, sample_rate: u32 },
    Fail(AudioError),
}

/// Deterministic provider for tests and offline tooling
///
/// Takes are consumed in order, one per open_source call, regardless of
/// the requested device.
pub struct ScriptedProvider {
    takes: VecDeque<ScriptedTake>,
    fallback: Vec<String>,
    blocksize: usize,
}

impl ScriptedProvider {
    pub fn new(takes: Vec<ScriptedTake>, fallback: Vec<String>, blocksize: usize) -> Self {
        Self {
            takes: takes.into(),
            fallback,
            blocksize,
        }
    }
}

impl AudioProvider for ScriptedProvider {
    fn open_source(&mut self, _device: Option<&str>) -> Result<Box<dyn FrameSource>, AudioError> {
        match self.takes.pop_front() {
            Some(ScriptedTake::Clip {
                samples,
                sample_rate,
            }) => Ok(Box::new(ScriptedSource::new(
                samples,
                sample_rate,
                self.blocksize,
            ))),
            Some(ScriptedTake::Fail(err)) => Err(err),
            None => Err(AudioError::NoInputDevice),
        }
    }

    fn fallback_devices(&self, _preferred: Option<&str>, tried: &[String]) -> Vec<String> {
        self.fallback
            .iter()
            .filter(|name| !tried.contains(name))
            .cloned()
            .collect()
    }
}

enum RecordFailure {
    Aborted,
    TimedOut,
    Device(AudioError),
}

/// Runs calibration sessions
pub struct Calibrator {
    detector: DetectorSettings,
    config: CalibrationConfig,
    progress_tx: Option<broadcast::Sender<CalibrationProgress>>,
}

impl Calibrator {
    pub fn new(detector: DetectorSettings, config: CalibrationConfig) -> Self {
        Self {
            detector,
            config,
            progress_tx: None,
        }
    }

    /// Attach the push-only progress observer
    pub fn with_progress(mut self, tx: broadcast::Sender<CalibrationProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Run one full calibration session
    ///
    /// # Arguments
    /// * `provider` - Audio source and fallback-device supplier
    /// * `preferred_device` - Configured device override
    /// * `abort` - Cooperative cancellation handle
    ///
    /// # Returns
    /// A CalibResult describing the outcome; quality is `poor` with
    /// non-empty recommendations when the retry ladder is exhausted.
    ///
    /// # Errors
    /// * `DeviceUnavailable` - Nothing was ever recorded and no fallback remains
    /// * `Aborted` - The abort handle fired mid-session
    pub fn run_session(
        &self,
        provider: &mut dyn AudioProvider,
        preferred_device: Option<String>,
        abort: AbortHandle,
    ) -> Result<CalibResult, CalibrationError> {
        let limits = SessionLimits::from_config(&self.config);
        let schedule = PromptSchedule::from_config(&self.config);
        let mut session = CalibrationSession::new(limits.clone(), abort.clone());
        let mut device = preferred_device;
        let mut profile = AnalysisProfile::standard();
        let mut recording: Option<(Vec<f32>, u32)> = None;
        let mut last_stats: Option<SignalStats> = None;

        loop {
            let attempt = session.attempt_count() + 1;

            if recording.is_none() {
                match self.record(provider, device.as_deref(), &schedule, &limits, &abort, attempt)
                {
                    Ok(clip) => {
                        session.note_device(device.as_deref());
                        recording = Some(clip);
                    }
                    Err(RecordFailure::Aborted) => return Err(CalibrationError::Aborted),
                    Err(RecordFailure::TimedOut) => {
                        log::warn!("[Calibrator] Attempt {} timed out before completion", attempt);
                        session.record_attempt(AttemptRecord {
                            device: device.clone(),
                            relaxed_placement: profile.is_relaxed(),
                            outcome: AttemptOutcome::TimedOut,
                        });
                    }
                    Err(RecordFailure::Device(err)) => {
                        log_audio_error(&err, "calibration_record");
                        session.note_device(device.as_deref());
                        session.record_attempt(AttemptRecord {
                            device: device.clone(),
                            relaxed_placement: profile.is_relaxed(),
                            outcome: AttemptOutcome::DeviceFailed {
                                error: err.message(),
                            },
                        });
                        let fallbacks =
                            provider.fallback_devices(device.as_deref(), session.devices_tried());
                        if fallbacks.is_empty() {
                            return Err(CalibrationError::DeviceUnavailable {
                                last_error: err.message(),
                            });
                        }
                    }
                }
            }

            if let Some((clip, sample_rate)) = &recording {
                self.emit(CalibrationProgress::new(
                    CalibrationPhase::Analyzing,
                    0,
                    limits.target_press_count as u8,
                    attempt,
                    limits.max_retries + 1,
                ));

                let stats =
                    analyze(clip, *sample_rate, &schedule, self.detector.energy_window, &profile);
                match self.validate(&stats) {
                    AttemptOutcome::Accepted => {
                        // Every recorded attempt so far was a failure, so
                        // the count of records equals the retries consumed
                        let result = self.build_result(
                            clip,
                            *sample_rate,
                            &stats,
                            &profile,
                            session.attempt_count(),
                            device.clone(),
                        );
                        self.emit(CalibrationProgress::complete(
                            result.signal_quality,
                            attempt,
                            limits.max_retries + 1,
                        ));
                        log::info!(
                            "[Calibrator] Session accepted: quality={} confidence={:.2} retries={}",
                            result.signal_quality.display_name(),
                            result.confidence_score,
                            result.retry_count
                        );
                        return Ok(result);
                    }
                    outcome => {
                        last_stats = Some(stats);
                        session.record_attempt(AttemptRecord {
                            device: device.clone(),
                            relaxed_placement: profile.is_relaxed(),
                            outcome,
                        });
                    }
                }
            }

            match session.next_step(recording.is_some()) {
                None => break,
                Some(RetryStep::ReanalyzeRelaxed) => {
                    profile = AnalysisProfile::relaxed();
                    session.mark_relaxed();
                }
                Some(RetryStep::ReRecord) => {
                    recording = None;
                    session.mark_rerecorded();
                }
                Some(RetryStep::FallbackDevice) => {
                    let fallbacks =
                        provider.fallback_devices(device.as_deref(), session.devices_tried());
                    match fallbacks.into_iter().next() {
                        Some(name) => {
                            log::info!("[Calibrator] Escalating to fallback device '{}'", name);
                            device = Some(name);
                            recording = None;
                        }
                        None => {
                            log::warn!("[Calibrator] No fallback device remains");
                            break;
                        }
                    }
                }
            }

            self.emit(CalibrationProgress::new(
                CalibrationPhase::Retrying,
                0,
                limits.target_press_count as u8,
                session.attempt_count() + 1,
                limits.max_retries + 1,
            ));
        }

        let result = self.exhausted_result(last_stats.as_ref(), recording.as_ref(), &session, device);
        self.emit(CalibrationProgress::complete(
            result.signal_quality,
            session.attempt_count(),
            limits.max_retries + 1,
        ));
        log::warn!(
            "[Calibrator] Retry ladder exhausted after {} attempt(s)",
            session.attempt_count()
        );
        Ok(result)
    }

    /// Analyze a pre-recorded clip without a live session
    ///
    /// Used by offline tooling. Runs the standard profile, falls back to
    /// the relaxed re-analysis rung on rejection, and reports a poor
    /// result if both reject. Fully deterministic.
    pub fn analyze_clip(&self, samples: &[f32], sample_rate: u32) -> CalibResult {
        let schedule = PromptSchedule::from_config(&self.config);

        let standard = AnalysisProfile::standard();
        let stats = analyze(samples, sample_rate, &schedule, self.detector.energy_window, &standard);
        if matches!(self.validate(&stats), AttemptOutcome::Accepted) {
            return self.build_result(samples, sample_rate, &stats, &standard, 0, None);
        }

        let relaxed = AnalysisProfile::relaxed();
        let relaxed_stats =
            analyze(samples, sample_rate, &schedule, self.detector.energy_window, &relaxed);
        if matches!(self.validate(&relaxed_stats), AttemptOutcome::Accepted) {
            return self.build_result(samples, sample_rate, &relaxed_stats, &relaxed, 1, None);
        }

        let limits = SessionLimits::from_config(&self.config);
        let mut session = CalibrationSession::new(limits, AbortHandle::new());
        session.record_attempt(AttemptRecord {
            device: None,
            relaxed_placement: false,
            outcome: self.validate(&stats),
        });
        session.record_attempt(AttemptRecord {
            device: None,
            relaxed_placement: true,
            outcome: self.validate(&relaxed_stats),
        });
        self.exhausted_result(
            Some(&relaxed_stats),
            Some(&(samples.to_vec(), sample_rate)),
            &session,
            None,
        )
    }

    fn validate(&self, stats: &SignalStats) -> AttemptOutcome {
        if stats.separation_ratio < self.config.min_separation_ratio {
            AttemptOutcome::LowSeparation {
                ratio: stats.separation_ratio,
            }
        } else if stats.detected_presses < self.config.target_press_count {
            AttemptOutcome::MissedPresses {
                detected: stats.detected_presses,
            }
        } else {
            AttemptOutcome::Accepted
        }
    }

    fn build_result(
        &self,
        clip: &[f32],
        sample_rate: u32,
        stats: &SignalStats,
        profile: &AnalysisProfile,
        retry_count: u32,
        device_used: Option<String>,
    ) -> CalibResult {
        let (press_threshold, release_threshold) = place_thresholds(stats, profile);
        let debounce_ms = choose_debounce(
            clip,
            sample_rate,
            press_threshold,
            release_threshold,
            self.detector.energy_window,
        );
        let confidence = confidence_score(stats);
        let quality = SignalQuality::from_confidence(confidence);

        let recommendations = if confidence < ADVICE_THRESHOLD {
            vec![
                Recommendation::RepositionMicrophone,
                Recommendation::ReduceBackgroundNoise,
            ]
        } else {
            Vec::new()
        };

        CalibResult {
            press_threshold,
            release_threshold,
            debounce_ms,
            sample_rate,
            confidence_score: confidence,
            signal_quality: quality,
            retry_count,
            device_used,
            recommendations,
            press_count: stats.detected_presses,
            noise_floor: stats.noise_floor,
            press_level: stats.press_level,
        }
    }

    /// Build the terminal result after the ladder ran dry
    ///
    /// Quality is forced to poor regardless of the computed bucket and
    /// recommendations are derived from the dominant failure, so the
    /// caller always receives something actionable rather than an error.
    fn exhausted_result(
        &self,
        stats: Option<&SignalStats>,
        recording: Option<&(Vec<f32>, u32)>,
        session: &CalibrationSession,
        device_used: Option<String>,
    ) -> CalibResult {
        let relaxed = AnalysisProfile::relaxed();
        let (press_threshold, release_threshold) = match stats {
            Some(stats) => place_thresholds(stats, &relaxed),
            None => (
                self.detector.press_threshold,
                self.detector.release_threshold,
            ),
        };

        let (sample_rate, debounce_ms) = match recording {
            Some((clip, rate)) => (
                *rate,
                choose_debounce(
                    clip,
                    *rate,
                    press_threshold,
                    release_threshold,
                    self.detector.energy_window,
                ),
            ),
            None => (0, self.detector.debounce_ms),
        };

        let confidence = stats
            .map(confidence_score)
            .unwrap_or(0.0)
            .min(EXHAUSTED_CONFIDENCE_CAP);

        let recommendations = match session.dominant_failure() {
            Some(AttemptOutcome::LowSeparation { .. }) => vec![
                Recommendation::ReduceBackgroundNoise,
                Recommendation::PressMoreFirmly,
                Recommendation::RepositionMicrophone,
            ],
            Some(AttemptOutcome::MissedPresses { .. }) => vec![
                Recommendation::PressMoreFirmly,
                Recommendation::IncreasePressCount,
            ],
            Some(AttemptOutcome::DeviceFailed { .. }) => {
                vec![Recommendation::TryAlternateDevice]
            }
            _ => vec![
                Recommendation::RepositionMicrophone,
                Recommendation::TryAlternateDevice,
            ],
        };

        CalibResult {
            press_threshold,
            release_threshold,
            debounce_ms,
            sample_rate,
            confidence_score: confidence,
            signal_quality: SignalQuality::Poor,
            retry_count: session.retry_count(),
            device_used,
            recommendations,
            press_count: stats.map(|s| s.detected_presses).unwrap_or(0),
            noise_floor: stats.map(|s| s.noise_floor).unwrap_or(0.0),
            press_level: stats.map(|s| s.press_level).unwrap_or(0.0),
        }
    }

    /// Record one prompted clip, reporting per-slot press progress
    fn record(
        &self,
        provider: &mut dyn AudioProvider,
        device: Option<&str>,
        schedule: &PromptSchedule,
        limits: &SessionLimits,
        abort: &AbortHandle,
        attempt: u32,
    ) -> Result<(Vec<f32>, u32), RecordFailure> {
        let mut source = provider.open_source(device).map_err(RecordFailure::Device)?;
        let sample_rate = source.sample_rate();
        let total = schedule.total_samples(sample_rate);
        let lead_in_samples =
            (schedule.lead_in.as_secs_f64() * sample_rate as f64).round() as usize;

        let target = limits.target_press_count as u8;
        let max_attempts = limits.max_retries + 1;
        let deadline = Instant::now() + limits.attempt_timeout;

        self.emit(CalibrationProgress::new(
            CalibrationPhase::LeadIn,
            0,
            target,
            attempt,
            max_attempts,
        ));

        let mut clip: Vec<f32> = Vec::with_capacity(total);
        let mut provisional_floor: Option<f32> = None;
        let mut slots_checked = 0usize;
        let mut detected: u8 = 0;
        let margin = AnalysisProfile::standard().detection_margin;

        while clip.len() < total {
            if abort.is_aborted() {
                return Err(RecordFailure::Aborted);
            }
            if Instant::now() > deadline {
                return Err(RecordFailure::TimedOut);
            }

            match source.next_frame() {
                Ok(Some(frame)) => clip.extend_from_slice(&frame.samples),
                // A finite source shorter than the schedule: analyze what exists
                Ok(None) => break,
                Err(err) => return Err(RecordFailure::Device(err)),
            }

            if provisional_floor.is_none() && lead_in_samples > 0 && clip.len() >= lead_in_samples
            {
                let trace = energy_trace(&clip[..lead_in_samples], self.detector.energy_window);
                let floor = trace.iter().copied().fold(0.0f32, |acc, v| acc.max(v));
                provisional_floor = Some(floor.max(1e-4));
                self.emit(CalibrationProgress::new(
                    CalibrationPhase::Recording,
                    0,
                    target,
                    attempt,
                    max_attempts,
                ));
            }

            if let Some(floor) = provisional_floor {
                while slots_checked < schedule.count {
                    let (start, end) = schedule.slot_bounds(slots_checked, sample_rate);
                    if clip.len() < end {
                        break;
                    }
                    let trace = energy_trace(&clip[start..end], self.detector.energy_window);
                    let peak = trace.iter().copied().fold(0.0f32, |acc, v| acc.max(v));
                    if peak >= floor * margin {
                        detected += 1;
                    }
                    slots_checked += 1;
                    self.emit(CalibrationProgress::new(
                        CalibrationPhase::Recording,
                        detected,
                        target,
                        attempt,
                        max_attempts,
                    ));
                }
            }
        }

        Ok((clip, sample_rate))
    }

    fn emit(&self, progress: CalibrationProgress) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress);
        }
    }
}

#[cfg(test)]
#[path = "calibrator_tests.rs"]
mod tests;
