// Audio module - capture, device fallback, and frame delivery
//
// Frames flow from the cpal capture callback through a lock-free buffer
// pool into the detect worker. The FrameSource trait is the seam between
// capture and detection so calibration replay and tests can substitute
// recorded clips for a live microphone.

pub mod buffer_pool;
pub mod capture;
pub mod device;
pub mod frame;
pub mod stubs;

pub use buffer_pool::{FramePool, DEFAULT_POOL_COUNT};
pub use capture::{CaptureEngine, CaptureSource};
pub use device::{DeviceCandidate, DeviceManager};
pub use frame::AudioFrame;
pub use stubs::ScriptedSource;

use crate::error::AudioError;

/// A producer of fixed-size audio frames at a known rate
///
/// `next_frame` blocks until a frame is available. `Ok(None)` marks the end
/// of a finite stream (recorded clips); live capture only ends with an
/// error. Device loss surfaces as `AudioError::Disconnected`.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError>;

    /// Actual sample rate of the delivered frames in Hz
    fn sample_rate(&self) -> u32;
}
