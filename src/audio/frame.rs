// AudioFrame - immutable block of captured samples

use std::time::Duration;

/// An ordered block of mono amplitude samples with capture metadata
///
/// Frames are transient: the producer owns a frame until it is handed to
/// the detector, which consumes it. The timestamp is the offset of the
/// first sample since stream start, derived from the running sample count
/// rather than wall-clock time so replayed clips produce identical frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub timestamp: Duration,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, timestamp: Duration) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration covered by this frame
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 441], 44_100, Duration::ZERO);
        let ms = frame.duration().as_secs_f64() * 1000.0;
        assert!((ms - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_empty_frame() {
        let frame = AudioFrame::new(Vec::new(), 44_100, Duration::ZERO);
        assert!(frame.is_empty());
        assert_eq!(frame.len(), 0);
        assert_eq!(frame.duration(), Duration::ZERO);
    }
}
