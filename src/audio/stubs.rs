//! Deterministic frame sources for tests and offline calibration
//!
//! `ScriptedSource` replays an in-memory clip (or a mono WAV file) through
//! the same `FrameSource` seam the live capture uses, so the calibrator and
//! the detect worker can be exercised without hardware and with bit-exact
//! repeatability. `FaultySource` simulates a device that disappears
//! mid-stream.

use std::path::Path;
use std::time::Duration;

use crate::audio::frame::AudioFrame;
use crate::audio::FrameSource;
use crate::error::AudioError;

/// Replays a fixed sample clip as successive frames
pub struct ScriptedSource {
    samples: Vec<f32>,
    sample_rate: u32,
    blocksize: usize,
    position: usize,
}

impl ScriptedSource {
    /// Create a source over an in-memory clip
    ///
    /// # Arguments
    /// * `samples` - Mono samples to replay
    /// * `sample_rate` - Sample rate in Hz
    /// * `blocksize` - Frame length; the final frame may be shorter
    pub fn new(samples: Vec<f32>, sample_rate: u32, blocksize: usize) -> Self {
        Self {
            samples,
            sample_rate,
            blocksize: blocksize.max(1),
            position: 0,
        }
    }

    /// Load a WAV clip as a mono source
    ///
    /// Multi-channel files are downmixed by averaging; integer formats are
    /// normalized to [-1.0, 1.0].
    pub fn from_wav<P: AsRef<Path>>(path: P, blocksize: usize) -> Result<Self, AudioError> {
        let mut reader =
            hound::WavReader::open(&path).map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("{}: {}", path.as_ref().display(), e),
            })?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::StreamOpenFailed {
                    reason: e.to_string(),
                })?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AudioError::StreamOpenFailed {
                        reason: e.to_string(),
                    })?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        Ok(Self::new(samples, spec.sample_rate, blocksize))
    }

    /// Remaining samples not yet delivered
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }

    /// Consume the source, returning the full clip
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }

        let end = (self.position + self.blocksize).min(self.samples.len());
        let timestamp =
            Duration::from_secs_f64(self.position as f64 / self.sample_rate as f64);
        let frame = AudioFrame::new(
            self.samples[self.position..end].to_vec(),
            self.sample_rate,
            timestamp,
        );
        self.position = end;
        Ok(Some(frame))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Delivers frames from an inner source, then fails with a device error
///
/// Used to exercise the SUSPENDED path of the scan controller and the
/// device fallback branch of the calibrator.
pub struct FaultySource {
    inner: ScriptedSource,
    frames_before_failure: usize,
    delivered: usize,
}

impl FaultySource {
    pub fn new(inner: ScriptedSource, frames_before_failure: usize) -> Self {
        Self {
            inner,
            frames_before_failure,
            delivered: 0,
        }
    }
}

impl FrameSource for FaultySource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError> {
        if self.delivered >= self.frames_before_failure {
            return Err(AudioError::Disconnected {
                details: "scripted device loss".to_string(),
            });
        }
        self.delivered += 1;
        self.inner.next_frame()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_source_frames() {
        let samples: Vec<f32> = (0..600).map(|i| i as f32 / 600.0).collect();
        let mut source = ScriptedSource::new(samples, 44_100, 256);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.len(), 256);
        assert_eq!(first.timestamp, Duration::ZERO);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.len(), 256);
        let expected = Duration::from_secs_f64(256.0 / 44_100.0);
        assert_eq!(second.timestamp, expected);

        let third = source.next_frame().unwrap().unwrap();
        assert_eq!(third.len(), 88, "final frame is the remainder");

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_scripted_source_is_repeatable() {
        let samples: Vec<f32> = (0..1000).map(|i| (i % 7) as f32 * 0.1).collect();
        let mut a = ScriptedSource::new(samples.clone(), 44_100, 128);
        let mut b = ScriptedSource::new(samples, 44_100, 128);

        loop {
            let fa = a.next_frame().unwrap();
            let fb = b.next_frame().unwrap();
            assert_eq!(fa, fb);
            if fa.is_none() {
                break;
            }
        }
    }

    #[test]
    fn test_faulty_source_fails_after_budget() {
        let inner = ScriptedSource::new(vec![0.0; 1024], 44_100, 256);
        let mut source = FaultySource::new(inner, 2);

        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        match source.next_frame() {
            Err(AudioError::Disconnected { .. }) => {}
            other => panic!("Expected Disconnected, got {:?}", other),
        }
    }
}
