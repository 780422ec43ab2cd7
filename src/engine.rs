//! SwitchEngine: orchestration of the capture → detect → scan pipeline.
//!
//! Wires the cpal capture stream into the detect worker, the detect
//! worker into the bounded event channel, and the event channel into the
//! timer-driven scan runner. Also the entry point for calibration
//! sessions, which stop scanning, run through the retry ladder, and
//! publish a fresh DetectorConfig snapshot on success.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::broadcast;

use crate::audio::{CaptureEngine, FrameSource};
use crate::calibration::{
    AbortHandle, AudioProvider, CalibResult, CalibrationProgress, CalibrationRecord, Calibrator,
    DEFAULT_RECORD_PATH,
};
use crate::config::AppConfig;
use crate::detect::{
    spawn_detect_worker, DetectorConfig, DetectorStatus, SharedDetectorConfig,
};
use crate::error::{AudioError, CalibrationError, ConfigError, ErrorCode};
use crate::events::{event_channel, KeyActivation, DEFAULT_EVENT_CAPACITY};
use crate::scan::{
    spawn_scan_runner, Highlight, KeyLayout, ScanController, ScanMode, ScanTiming,
};

/// Errors surfaced when starting the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Audio(AudioError),
    Config(ConfigError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Audio(err) => write!(f, "{}", err.message()),
            EngineError::Config(err) => write!(f, "{}", err.message()),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<AudioError> for EngineError {
    fn from(err: AudioError) -> Self {
        EngineError::Audio(err)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

/// Orchestrates the scanning pipeline and calibration sessions
pub struct SwitchEngine {
    config: AppConfig,
    shared_config: SharedDetectorConfig,

    activations_tx: broadcast::Sender<KeyActivation>,
    highlights_tx: broadcast::Sender<Highlight>,
    progress_tx: broadcast::Sender<CalibrationProgress>,
    status_tx: broadcast::Sender<DetectorStatus>,

    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    capture: Option<CaptureEngine>,
    overload_counter: Option<Arc<AtomicU64>>,
    running: bool,
    record_path: PathBuf,
}

impl SwitchEngine {
    /// Create an engine from configuration, restoring any persisted
    /// calibration record (falling back to defaults on a bad record)
    pub fn new(config: AppConfig) -> Self {
        let fallback = DetectorConfig::from_settings(&config.detector, &config.audio);
        let mut initial = CalibrationRecord::load_or(&*DEFAULT_RECORD_PATH, fallback);
        // An explicit device override in config wins over the record
        if config.audio.device_id.is_some() {
            initial.device_id = config.audio.device_id.clone();
        }

        Self::with_detector_config(config, initial)
    }

    /// Create an engine with an explicit starting snapshot (tests, CLI)
    pub fn with_detector_config(config: AppConfig, initial: DetectorConfig) -> Self {
        let (activations_tx, _) = broadcast::channel(64);
        let (highlights_tx, _) = broadcast::channel(64);
        let (progress_tx, _) = broadcast::channel(64);
        let (status_tx, _) = broadcast::channel(16);

        Self {
            config,
            shared_config: SharedDetectorConfig::new(initial),
            activations_tx,
            highlights_tx,
            progress_tx,
            status_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            capture: None,
            overload_counter: None,
            running: false,
            record_path: DEFAULT_RECORD_PATH.clone(),
        }
    }

    /// Override where the calibration record is persisted
    pub fn with_record_path(mut self, path: PathBuf) -> Self {
        self.record_path = path;
        self
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Key activations for the external action dispatcher
    pub fn subscribe_activations(&self) -> broadcast::Receiver<KeyActivation> {
        self.activations_tx.subscribe()
    }

    /// Highlight changes for the UI
    pub fn subscribe_highlights(&self) -> broadcast::Receiver<Highlight> {
        self.highlights_tx.subscribe()
    }

    /// Calibration progress for the UI observer
    pub fn subscribe_progress(&self) -> broadcast::Receiver<CalibrationProgress> {
        self.progress_tx.subscribe()
    }

    /// Detector pipeline status (running / suspended / stopped)
    pub fn subscribe_status(&self) -> broadcast::Receiver<DetectorStatus> {
        self.status_tx.subscribe()
    }

    // ========================================================================
    // SCANNING
    // ========================================================================

    /// Start scanning with live microphone capture
    pub fn start_scanning(&mut self, layout: &KeyLayout) -> Result<(), EngineError> {
        let device = self.shared_config.snapshot().device_id;
        let (capture, source) = CaptureEngine::open(device.as_deref(), &self.config.audio)?;
        self.capture = Some(capture);
        self.start_scanning_with_source(layout, Box::new(source))
    }

    /// Start scanning over an explicit frame source (tests, replays)
    pub fn start_scanning_with_source(
        &mut self,
        layout: &KeyLayout,
        source: Box<dyn FrameSource>,
    ) -> Result<(), EngineError> {
        if self.running {
            return Err(EngineError::Audio(AudioError::StreamOpenFailed {
                reason: "pipeline already running".to_string(),
            }));
        }

        let mode = if self.config.scan.row_column_scan {
            ScanMode::RowColumn
        } else {
            ScanMode::Linear
        };
        let controller =
            ScanController::new(layout, mode, ScanTiming::from_config(&self.config.scan))?;

        self.shutdown = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = event_channel(DEFAULT_EVENT_CAPACITY);
        self.overload_counter = Some(event_rx.overload_counter());

        // Subscribe before the worker starts so no status notice is missed
        let status_rx = self.status_tx.subscribe();
        let detect_handle = spawn_detect_worker(
            source,
            self.shared_config.clone(),
            self.config.detector.clone(),
            event_tx,
            self.status_tx.clone(),
            Arc::clone(&self.shutdown),
        );
        let scan_handle = spawn_scan_runner(
            controller,
            event_rx,
            status_rx,
            self.activations_tx.clone(),
            self.highlights_tx.clone(),
            Arc::clone(&self.shutdown),
        );

        self.workers.push(detect_handle);
        self.workers.push(scan_handle);
        self.running = true;
        log::info!("[SwitchEngine] Scanning pipeline started");
        Ok(())
    }

    /// Stop the pipeline and release the capture stream
    pub fn stop(&mut self) {
        if !self.running && self.workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.capture = None;
        self.running = false;
        log::info!("[SwitchEngine] Scanning pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Switch events lost to channel overflow since the pipeline started
    pub fn overload_faults(&self) -> u64 {
        self.overload_counter
            .as_ref()
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // ========================================================================
    // CALIBRATION
    // ========================================================================

    /// Current detector snapshot
    pub fn detector_config(&self) -> DetectorConfig {
        self.shared_config.snapshot()
    }

    /// Run a calibration session, applying the result on success
    ///
    /// Scanning is stopped first; the previously active DetectorConfig
    /// stays untouched unless the session produces a usable result.
    pub fn run_calibration(
        &mut self,
        provider: &mut dyn AudioProvider,
        abort: AbortHandle,
    ) -> Result<CalibResult, CalibrationError> {
        if self.running {
            self.stop();
        }

        let device = self.shared_config.snapshot().device_id;
        let calibrator = Calibrator::new(
            self.config.detector.clone(),
            self.config.calibration.clone(),
        )
        .with_progress(self.progress_tx.clone());

        let result = calibrator.run_session(provider, device, abort)?;
        if result.is_usable() {
            self.apply_calibration(&result);
        } else {
            log::warn!(
                "[SwitchEngine] Calibration quality {} - keeping previous detector config",
                result.signal_quality.display_name()
            );
        }
        Ok(result)
    }

    /// Analyze a pre-recorded clip without touching the live pipeline
    pub fn run_calibration_clip(&self, samples: &[f32], sample_rate: u32) -> CalibResult {
        Calibrator::new(
            self.config.detector.clone(),
            self.config.calibration.clone(),
        )
        .analyze_clip(samples, sample_rate)
    }

    /// Publish a result as the active detector snapshot and persist it
    pub fn apply_calibration(&self, result: &CalibResult) {
        self.shared_config.replace(result.to_detector_config());
        let record = CalibrationRecord::from_result(result);
        if let Err(err) = record.save(&self.record_path) {
            log::warn!(
                "[SwitchEngine] Failed to persist calibration record: {}",
                err.message()
            );
        }
    }
}

impl Drop for SwitchEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ScriptedSource;
    use crate::config::AppConfig;
    use crate::fixtures::press_clip;
    use crate::scan::layout::linear_layout;
    use std::time::Duration;

    fn engine() -> SwitchEngine {
        let mut config = AppConfig::default();
        // Long dwell so a press lands inside the first unit's window
        config.scan.dwell_interval = 5.0;
        let initial = DetectorConfig {
            press_threshold: 0.35,
            release_threshold: 0.15,
            debounce: Duration::from_millis(40),
            sample_rate: 44_100,
            device_id: None,
        };
        let record_path = std::env::temp_dir()
            .join("switch_scan_engine_tests")
            .join("calibration.json");
        SwitchEngine::with_detector_config(config, initial).with_record_path(record_path)
    }

    #[test]
    fn test_empty_layout_never_starts() {
        let mut engine = engine();
        let layout = KeyLayout { pages: Vec::new() };
        let source = ScriptedSource::new(vec![0.0; 1024], 44_100, 256);

        let result = engine.start_scanning_with_source(&layout, Box::new(source));
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::EmptyLayout))
        ));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_pipeline_press_activates_first_key() {
        let mut engine = engine();
        let layout = linear_layout(&["a", "b", "c"]);
        let mut activations = engine.subscribe_activations();

        // One press burst 500 ms in; dwell is 5 s so "a" is highlighted
        let clip = press_clip(44_100, 0.05, 0.8, &[500], 200, 1500);
        let source = ScriptedSource::new(clip, 44_100, 256);

        engine
            .start_scanning_with_source(&layout, Box::new(source))
            .unwrap();

        // The scripted clip drains quickly; give the workers a moment
        std::thread::sleep(Duration::from_millis(500));
        engine.stop();

        let activation = activations.try_recv().expect("press activates a key");
        assert_eq!(activation.key_id, "a");
        assert_eq!(engine.overload_faults(), 0);
    }

    #[test]
    fn test_double_start_is_rejected() {
        let mut engine = engine();
        let layout = linear_layout(&["a"]);

        let clip = press_clip(44_100, 0.05, 0.0, &[], 0, 60_000);
        engine
            .start_scanning_with_source(
                &layout,
                Box::new(ScriptedSource::new(clip.clone(), 44_100, 256)),
            )
            .unwrap();

        let second = engine.start_scanning_with_source(
            &layout,
            Box::new(ScriptedSource::new(clip, 44_100, 256)),
        );
        assert!(second.is_err());

        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_apply_calibration_replaces_snapshot() {
        let engine = engine();
        let result = CalibResult {
            press_threshold: 0.42,
            release_threshold: 0.21,
            debounce_ms: 30,
            sample_rate: 44_100,
            confidence_score: 0.9,
            signal_quality: crate::calibration::SignalQuality::Excellent,
            retry_count: 0,
            device_used: None,
            recommendations: Vec::new(),
            press_count: 10,
            noise_floor: 0.05,
            press_level: 0.8,
        };

        engine.apply_calibration(&result);
        let snapshot = engine.detector_config();
        assert_eq!(snapshot.press_threshold, 0.42);
        assert_eq!(snapshot.debounce, Duration::from_millis(30));
    }
}
