// Calibration module - recording session, analysis, and persistence
//
// The Calibrator owns the whole workflow: record a prompted clip through
// the AudioProvider seam, derive thresholds and a debounce interval with
// the pure analysis functions, validate, and walk the retry ladder on
// rejection. The outcome is always a CalibResult; quality failures are
// reported, never thrown. CalibrationRecord is the persisted form with
// backward-compatible defaults for pre-quality records.

pub mod analysis;
pub mod calibrator;
pub mod progress;
pub mod record;
pub mod result;
pub mod session;

pub use calibrator::{AudioProvider, Calibrator, CpalProvider, ScriptedProvider, ScriptedTake};
pub use progress::{CalibrationPhase, CalibrationProgress};
pub use record::{CalibrationRecord, DEFAULT_RECORD_PATH, RECORD_VERSION};
pub use result::{CalibResult, Recommendation, SignalQuality};
pub use session::{AbortHandle, SessionLimits};
