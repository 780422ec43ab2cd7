// Detection pipeline - frames in, clean SwitchEvents out
//
// The detect worker runs on its own thread directly downstream of the
// capture callback: it pulls frames from the FrameSource, runs the
// SignalDetector and Debouncer synchronously, and pushes SwitchEvents
// into the bounded event channel consumed by the scan runner.
//
// DetectorConfig is shared copy-on-write: the calibrator replaces the
// whole snapshot behind an RwLock and bumps a version counter; the worker
// re-reads only when the version moves, so it always observes one
// internally consistent threshold pair, never a torn update.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::audio::FrameSource;
use crate::config::{AudioConfig, DetectorSettings};
use crate::error::log_audio_error;
use crate::events::EventSender;

pub mod debounce;
pub mod detector;

pub use debounce::Debouncer;
pub use detector::{energy_trace, RawTransition, SignalDetector};

/// Immutable snapshot of detection parameters
///
/// A new snapshot is produced whenever calibration completes; existing
/// snapshots are never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub press_threshold: f32,
    pub release_threshold: f32,
    pub debounce: Duration,
    pub sample_rate: u32,
    pub device_id: Option<String>,
}

impl DetectorConfig {
    /// Build the pre-calibration snapshot from static settings
    pub fn from_settings(settings: &DetectorSettings, audio: &AudioConfig) -> Self {
        Self {
            press_threshold: settings.press_threshold,
            release_threshold: settings.release_threshold,
            debounce: Duration::from_millis(settings.debounce_ms as u64),
            sample_rate: audio.sample_rate,
            device_id: audio.device_id.clone(),
        }
    }
}

/// Versioned, atomically-replaced detector configuration
///
/// Writer: Calibrator (on session completion). Reader: detect worker.
/// The version counter is bumped after the write lock is released so a
/// reader that observes the new version always sees the new snapshot.
#[derive(Clone)]
pub struct SharedDetectorConfig {
    inner: Arc<RwLock<DetectorConfig>>,
    version: Arc<AtomicU64>,
}

impl SharedDetectorConfig {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Clone the current snapshot
    ///
    /// A poisoned lock is recovered: snapshots are only ever replaced
    /// wholesale, so the stored value is consistent even after a writer
    /// panic.
    pub fn snapshot(&self) -> DetectorConfig {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                log::warn!("[DetectorConfig] Lock poisoned, recovering snapshot");
                poisoned.into_inner().clone()
            }
        }
    }

    /// Replace the snapshot and publish the new version
    pub fn replace(&self, config: DetectorConfig) {
        {
            let mut guard = match self.inner.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = config;
        }
        let version = self.version.fetch_add(1, Ordering::Release) + 1;
        log::info!("[DetectorConfig] Snapshot replaced (version {})", version);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Pipeline status broadcast alongside the event stream
///
/// The scan runner maps `Suspended` onto its SUSPENDED state and resumes
/// on the next `Running` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DetectorStatus {
    /// Worker is delivering events
    Running,
    /// Device lost mid-stream; events will not arrive until recovery
    Suspended,
    /// Source drained (recorded clip) or shutdown requested
    Stopped,
}

/// Spawn the detect worker thread
///
/// # Arguments
/// * `source` - Frame producer (live capture or scripted clip)
/// * `shared` - Versioned detector configuration
/// * `settings` - Static settings (energy window length)
/// * `events` - Producer half of the switch-event channel
/// * `status_tx` - Pipeline status notifications
/// * `shutdown` - Cooperative stop flag, checked between frames
pub fn spawn_detect_worker(
    mut source: Box<dyn FrameSource>,
    shared: SharedDetectorConfig,
    settings: DetectorSettings,
    events: EventSender,
    status_tx: broadcast::Sender<DetectorStatus>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let sample_rate = source.sample_rate();
        let mut config = shared.snapshot();
        let mut seen_version = shared.version();

        let mut detector = SignalDetector::new(
            config.press_threshold,
            config.release_threshold,
            settings.energy_window,
        );
        let mut debouncer = Debouncer::new(config.debounce);
        let mut transitions: Vec<RawTransition> = Vec::with_capacity(8);

        let _ = status_tx.send(DetectorStatus::Running);
        log::info!(
            "[Detect] Worker started at {} Hz (press={}, release={})",
            sample_rate,
            config.press_threshold,
            config.release_threshold
        );

        loop {
            if shutdown.load(Ordering::SeqCst) {
                let _ = status_tx.send(DetectorStatus::Stopped);
                break;
            }

            let version = shared.version();
            if version != seen_version {
                seen_version = version;
                config = shared.snapshot();
                detector.set_thresholds(config.press_threshold, config.release_threshold);
                debouncer.set_interval(config.debounce);
                log::info!(
                    "[Detect] Applied config version {} (press={}, release={})",
                    version,
                    config.press_threshold,
                    config.release_threshold
                );
            }

            match source.next_frame() {
                Ok(Some(frame)) => {
                    transitions.clear();
                    detector.process(&frame.samples, &mut transitions);
                    for transition in &transitions {
                        let timestamp = Duration::from_secs_f64(
                            transition.sample_index as f64 / sample_rate as f64,
                        );
                        if let Some(event) = debouncer.accept(transition.kind, timestamp) {
                            events.send(event);
                        }
                    }
                }
                Ok(None) => {
                    log::info!("[Detect] Frame source drained, stopping worker");
                    let _ = status_tx.send(DetectorStatus::Stopped);
                    break;
                }
                Err(err) => {
                    log_audio_error(&err, "detect_worker");
                    let _ = status_tx.send(DetectorStatus::Suspended);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stubs::{FaultySource, ScriptedSource};
    use crate::events::{event_channel, SwitchEventKind};
    use crate::fixtures::press_clip;

    fn settings() -> DetectorSettings {
        DetectorSettings {
            press_threshold: 0.35,
            release_threshold: 0.15,
            debounce_ms: 40,
            energy_window: 64,
        }
    }

    fn shared_config() -> SharedDetectorConfig {
        SharedDetectorConfig::new(DetectorConfig {
            press_threshold: 0.35,
            release_threshold: 0.15,
            debounce: Duration::from_millis(40),
            sample_rate: 44_100,
            device_id: None,
        })
    }

    #[test]
    fn test_shared_config_replace_bumps_version() {
        let shared = shared_config();
        assert_eq!(shared.version(), 0);

        let mut next = shared.snapshot();
        next.press_threshold = 0.5;
        shared.replace(next.clone());

        assert_eq!(shared.version(), 1);
        assert_eq!(shared.snapshot(), next);
    }

    #[test]
    fn test_worker_emits_press_release_pairs() {
        let clip = press_clip(44_100, 0.05, 0.8, &[500, 1500, 2500], 200, 3500);
        let source = ScriptedSource::new(clip, 44_100, 256);
        let (tx, mut rx) = event_channel(32);
        let (status_tx, mut status_rx) = broadcast::channel(8);

        let handle = spawn_detect_worker(
            Box::new(source),
            shared_config(),
            settings(),
            tx,
            status_tx,
            Arc::new(AtomicBool::new(false)),
        );
        handle.join().unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.try_next() {
            events.push(event);
        }

        let presses = events
            .iter()
            .filter(|e| e.kind == SwitchEventKind::Press)
            .count();
        let releases = events
            .iter()
            .filter(|e| e.kind == SwitchEventKind::Release)
            .count();
        assert_eq!(presses, 3, "one press per burst: {:?}", events);
        assert_eq!(releases, 3, "one release per burst: {:?}", events);

        // Status: Running then Stopped
        assert_eq!(status_rx.try_recv().unwrap(), DetectorStatus::Running);
        assert_eq!(status_rx.try_recv().unwrap(), DetectorStatus::Stopped);
    }

    #[test]
    fn test_worker_reports_device_loss() {
        let clip = press_clip(44_100, 0.05, 0.8, &[], 0, 1000);
        let source = FaultySource::new(ScriptedSource::new(clip, 44_100, 256), 3);
        let (tx, _rx) = event_channel(8);
        let (status_tx, mut status_rx) = broadcast::channel(8);

        let handle = spawn_detect_worker(
            Box::new(source),
            shared_config(),
            settings(),
            tx,
            status_tx,
            Arc::new(AtomicBool::new(false)),
        );
        handle.join().unwrap();

        assert_eq!(status_rx.try_recv().unwrap(), DetectorStatus::Running);
        assert_eq!(status_rx.try_recv().unwrap(), DetectorStatus::Suspended);
    }

    #[test]
    fn test_worker_honors_shutdown_flag() {
        let clip = press_clip(44_100, 0.05, 0.8, &[500], 200, 60_000);
        let source = ScriptedSource::new(clip, 44_100, 256);
        let (tx, _rx) = event_channel(8);
        let (status_tx, _status_rx) = broadcast::channel(8);
        let shutdown = Arc::new(AtomicBool::new(true));

        let handle = spawn_detect_worker(
            Box::new(source),
            shared_config(),
            settings(),
            tx,
            status_tx,
            shutdown,
        );
        // Pre-set flag: worker must exit without draining a minute of audio
        handle.join().unwrap();
    }
}
