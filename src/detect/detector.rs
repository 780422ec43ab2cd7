// SignalDetector - hysteresis-gated press/release detection
//
// Maintains a rectified-amplitude moving average as the energy estimate and
// applies a two-threshold hysteresis latch: rising through press_threshold
// while low emits a raw press, falling through release_threshold (strictly
// below press_threshold) while high emits a raw release. The gap between
// the two thresholds is what prevents oscillation when the signal hovers
// at a single boundary.
//
// The detector is deliberately dumb about time: it counts samples and
// leaves debouncing entirely to the Debouncer. It never fails on sample
// content; device loss is reported by the frame source, not here.

use crate::events::SwitchEventKind;

/// Fraction of press_threshold used to repair a non-hysteretic pair
const RELEASE_FALLBACK_RATIO: f32 = 0.6;

/// A raw, un-debounced transition at an absolute sample position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTransition {
    pub kind: SwitchEventKind,
    /// Absolute sample index since detector creation (or last full reset)
    pub sample_index: u64,
}

/// Two-threshold hysteresis detector over an energy envelope
#[derive(Debug)]
pub struct SignalDetector {
    press_threshold: f32,
    release_threshold: f32,
    /// Smoothing factor of the rectified moving average (1 / window)
    alpha: f32,
    energy: f32,
    latched_high: bool,
    samples_seen: u64,
}

impl SignalDetector {
    /// Create a detector
    ///
    /// # Arguments
    /// * `press_threshold` - Rising threshold on the energy envelope
    /// * `release_threshold` - Falling threshold; forced below press when a
    ///   degenerate pair is supplied
    /// * `energy_window` - Moving-average length in samples
    pub fn new(press_threshold: f32, release_threshold: f32, energy_window: usize) -> Self {
        let release_threshold = sanitize_release(press_threshold, release_threshold);
        Self {
            press_threshold,
            release_threshold,
            alpha: 1.0 / energy_window.max(1) as f32,
            energy: 0.0,
            latched_high: false,
            samples_seen: 0,
        }
    }

    /// Replace the threshold pair, preserving latch and envelope state
    ///
    /// Called when a new DetectorConfig snapshot is observed mid-stream.
    pub fn set_thresholds(&mut self, press_threshold: f32, release_threshold: f32) {
        self.press_threshold = press_threshold;
        self.release_threshold = sanitize_release(press_threshold, release_threshold);
    }

    /// Process one frame, appending raw transitions to `out`
    pub fn process(&mut self, samples: &[f32], out: &mut Vec<RawTransition>) {
        for &sample in samples {
            self.energy += self.alpha * (sample.abs() - self.energy);

            if !self.latched_high && self.energy >= self.press_threshold {
                self.latched_high = true;
                out.push(RawTransition {
                    kind: SwitchEventKind::Press,
                    sample_index: self.samples_seen,
                });
            } else if self.latched_high && self.energy <= self.release_threshold {
                self.latched_high = false;
                out.push(RawTransition {
                    kind: SwitchEventKind::Release,
                    sample_index: self.samples_seen,
                });
            }

            self.samples_seen += 1;
        }
    }

    /// Clear latch and envelope for a fresh stream; the sample counter
    /// restarts so timestamps stay relative to stream start
    pub fn reset(&mut self) {
        self.energy = 0.0;
        self.latched_high = false;
        self.samples_seen = 0;
    }

    /// Current energy-envelope value
    pub fn energy(&self) -> f32 {
        self.energy
    }

    pub fn is_high(&self) -> bool {
        self.latched_high
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }
}

fn sanitize_release(press: f32, release: f32) -> f32 {
    if release < press {
        release
    } else {
        log::warn!(
            "[SignalDetector] release_threshold {} >= press_threshold {}, forcing hysteresis",
            release,
            press
        );
        press * RELEASE_FALLBACK_RATIO
    }
}

/// Rectified-amplitude moving-average envelope of a whole clip
///
/// The calibrator runs this exact envelope over recorded samples so the
/// thresholds it derives refer to the same quantity the live detector
/// compares against.
pub fn energy_trace(samples: &[f32], energy_window: usize) -> Vec<f32> {
    let alpha = 1.0 / energy_window.max(1) as f32;
    let mut energy = 0.0f32;
    samples
        .iter()
        .map(|&sample| {
            energy += alpha * (sample.abs() - energy);
            energy
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Alternating-sign burst so the rectified envelope settles at `amp`
    fn burst(amp: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| if i % 2 == 0 { amp } else { -amp })
            .collect()
    }

    fn collect(detector: &mut SignalDetector, samples: &[f32]) -> Vec<RawTransition> {
        let mut out = Vec::new();
        detector.process(samples, &mut out);
        out
    }

    #[test]
    fn test_press_then_release() {
        let mut detector = SignalDetector::new(0.35, 0.15, 64);

        let mut clip = burst(0.05, 2000);
        clip.extend(burst(0.8, 2000));
        clip.extend(burst(0.05, 4000));

        let transitions = collect(&mut detector, &clip);
        assert_eq!(transitions.len(), 2, "one press and one release");
        assert_eq!(transitions[0].kind, SwitchEventKind::Press);
        assert_eq!(transitions[1].kind, SwitchEventKind::Release);
        assert!(transitions[0].sample_index < transitions[1].sample_index);
    }

    #[test]
    fn test_hysteresis_blocks_oscillation_at_press_threshold() {
        let mut detector = SignalDetector::new(0.35, 0.15, 64);

        // Hover around the press threshold: rises above, dips slightly
        // below, rises again. Without hysteresis this would re-trigger.
        let mut clip = burst(0.8, 2000);
        clip.extend(burst(0.30, 2000)); // below press, above release
        clip.extend(burst(0.8, 2000));
        clip.extend(burst(0.02, 4000));

        let transitions = collect(&mut detector, &clip);
        let presses = transitions
            .iter()
            .filter(|t| t.kind == SwitchEventKind::Press)
            .count();
        assert_eq!(presses, 1, "dip above release threshold must not re-arm");
    }

    #[test]
    fn test_silence_produces_nothing() {
        let mut detector = SignalDetector::new(0.35, 0.15, 64);
        let transitions = collect(&mut detector, &vec![0.0; 44_100]);
        assert!(transitions.is_empty());
    }

    #[test]
    fn test_quiet_noise_stays_below_threshold() {
        let mut detector = SignalDetector::new(0.35, 0.15, 64);
        let transitions = collect(&mut detector, &burst(0.05, 44_100));
        assert!(transitions.is_empty());
    }

    #[test]
    fn test_degenerate_threshold_pair_is_repaired() {
        let mut detector = SignalDetector::new(0.4, 0.4, 64);

        let mut clip = burst(0.9, 2000);
        clip.extend(burst(0.0, 4000));
        let transitions = collect(&mut detector, &clip);

        // With release forced to 0.4 * 0.6 = 0.24 the latch still cycles
        assert_eq!(transitions.len(), 2);
    }

    #[test]
    fn test_set_thresholds_preserves_latch() {
        let mut detector = SignalDetector::new(0.35, 0.15, 64);
        collect(&mut detector, &burst(0.8, 2000));
        assert!(detector.is_high());

        detector.set_thresholds(0.5, 0.25);
        assert!(detector.is_high(), "latch survives a config swap");

        let transitions = collect(&mut detector, &burst(0.02, 4000));
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, SwitchEventKind::Release);
    }

    #[test]
    fn test_sample_counter_spans_frames() {
        let mut detector = SignalDetector::new(0.35, 0.15, 64);

        collect(&mut detector, &burst(0.05, 1000));
        assert_eq!(detector.samples_seen(), 1000);

        let transitions = collect(&mut detector, &burst(0.8, 1000));
        assert_eq!(detector.samples_seen(), 2000);
        assert!(transitions[0].sample_index >= 1000);
    }

    #[test]
    fn test_energy_trace_matches_detector_envelope() {
        let clip = burst(0.5, 500);
        let trace = energy_trace(&clip, 64);

        let mut detector = SignalDetector::new(10.0, 5.0, 64);
        let mut out = Vec::new();
        detector.process(&clip, &mut out);

        assert_eq!(trace.len(), clip.len());
        assert!((trace.last().unwrap() - detector.energy()).abs() < 1e-6);
    }
}
