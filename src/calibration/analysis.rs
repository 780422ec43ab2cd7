// Calibration signal analysis
//
// Pure functions from recorded samples to detection parameters. Everything
// here is deterministic: identical samples and identical inputs produce
// bit-identical outputs, which is what makes calibration results
// reproducible and the retry ladder testable.
//
// Pipeline:
// 1. Partition the energy envelope into quiet and active intervals using
//    the known prompt timing.
// 2. noise_floor = high percentile of quiet energy; press_level = median
//    of per-slot peak energies.
// 3. Place the hysteresis pair between the two with a safety margin.
// 4. Sweep the debounce interval over the same recording with the live
//    detector/debouncer stack, mirroring how the thresholds will be used.
// 5. Score confidence from separation and press-to-press consistency.

use std::time::Duration;

use crate::config::CalibrationConfig;
use crate::detect::{energy_trace, Debouncer, SignalDetector};
use crate::events::SwitchEventKind;

/// Percentile of quiet-interval energy taken as the noise floor
pub const NOISE_FLOOR_PERCENTILE: f32 = 0.95;

/// Floor guard against division by zero on digitally silent input
const MIN_NOISE_FLOOR: f32 = 1e-4;

/// Separation ratio mapped to confidence 0.0 (anything at or below)
const RATIO_SCORE_FLOOR: f32 = 1.2;

/// Separation ratio mapped to confidence 1.0 (anything at or above)
const RATIO_SCORE_CEIL: f32 = 5.0;

/// Debounce sweep bounds in milliseconds, even steps
const DEBOUNCE_SWEEP_MS: (u32, u32) = (10, 60);

/// Block length used when replaying recordings through the detector
const REPLAY_BLOCK: usize = 64;

/// Timing of the recording prompts
///
/// The schedule is what lets the analysis partition the recording without
/// any signal-dependent segmentation: lead-in and inter-prompt gaps are
/// quiet by instruction, prompt slots are active.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSchedule {
    pub lead_in: Duration,
    pub slot: Duration,
    pub gap: Duration,
    pub count: usize,
}

impl PromptSchedule {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            lead_in: Duration::from_secs_f64(config.lead_in_secs),
            slot: Duration::from_secs_f64(config.prompt_slot_secs),
            gap: Duration::from_secs_f64(config.prompt_gap_secs),
            count: config.target_press_count,
        }
    }

    /// Total recording length
    pub fn total(&self) -> Duration {
        let slots = self.slot * self.count as u32;
        let gaps = self.gap * self.count.saturating_sub(1) as u32;
        self.lead_in + slots + gaps
    }

    pub fn total_samples(&self, sample_rate: u32) -> usize {
        (self.total().as_secs_f64() * sample_rate as f64).round() as usize
    }

    /// Sample bounds of prompt slot `index`
    pub fn slot_bounds(&self, index: usize, sample_rate: u32) -> (usize, usize) {
        let rate = sample_rate as f64;
        let start =
            self.lead_in.as_secs_f64() + index as f64 * (self.slot + self.gap).as_secs_f64();
        let end = start + self.slot.as_secs_f64();
        ((start * rate).round() as usize, (end * rate).round() as usize)
    }

    /// Sample ranges expected to be quiet (lead-in plus inter-prompt gaps)
    pub fn quiet_ranges(&self, sample_rate: u32) -> Vec<(usize, usize)> {
        let rate = sample_rate as f64;
        let mut ranges = Vec::with_capacity(self.count);
        ranges.push((0, (self.lead_in.as_secs_f64() * rate).round() as usize));

        for index in 0..self.count.saturating_sub(1) {
            let (_, slot_end) = self.slot_bounds(index, sample_rate);
            let gap_end = slot_end + (self.gap.as_secs_f64() * rate).round() as usize;
            ranges.push((slot_end, gap_end));
        }
        ranges
    }
}

/// Analysis parameters for one attempt
///
/// `standard` is the first-attempt profile; `relaxed` is what the
/// re-analysis rung of the retry ladder switches to: thresholds closer to
/// the floor and a softer slot-detection margin so weaker presses still
/// count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisProfile {
    /// Press threshold position along the floor-to-press span
    pub press_fraction: f32,
    /// Release threshold position along the floor-to-press span
    pub release_fraction: f32,
    /// Minimum hysteresis gap as a fraction of the span
    pub min_gap_fraction: f32,
    /// A slot peak must clear noise_floor times this to count as a press
    pub detection_margin: f32,
}

impl AnalysisProfile {
    pub fn standard() -> Self {
        Self {
            press_fraction: 0.40,
            release_fraction: 0.20,
            min_gap_fraction: 0.10,
            detection_margin: 1.2,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            press_fraction: 0.30,
            release_fraction: 0.12,
            min_gap_fraction: 0.08,
            detection_margin: 1.05,
        }
    }

    pub fn is_relaxed(&self) -> bool {
        *self == Self::relaxed()
    }
}

impl Default for AnalysisProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// Measurements extracted from one recording
#[derive(Debug, Clone, PartialEq)]
pub struct SignalStats {
    pub noise_floor: f32,
    pub press_level: f32,
    /// Peak envelope value per prompt slot
    pub slot_peaks: Vec<f32>,
    /// Peaks of the slots that cleared the detection margin
    pub detected_peaks: Vec<f32>,
    pub detected_presses: usize,
    pub separation_ratio: f32,
}

/// Partition the recording and measure floor, level, and per-slot peaks
pub fn analyze(
    samples: &[f32],
    sample_rate: u32,
    schedule: &PromptSchedule,
    energy_window: usize,
    profile: &AnalysisProfile,
) -> SignalStats {
    let trace = energy_trace(samples, energy_window);

    let mut quiet: Vec<f32> = Vec::new();
    for (start, end) in schedule.quiet_ranges(sample_rate) {
        let end = end.min(trace.len());
        if start < end {
            quiet.extend_from_slice(&trace[start..end]);
        }
    }
    let noise_floor = percentile(&mut quiet, NOISE_FLOOR_PERCENTILE).max(MIN_NOISE_FLOOR);

    let mut slot_peaks = Vec::with_capacity(schedule.count);
    for index in 0..schedule.count {
        let (start, end) = schedule.slot_bounds(index, sample_rate);
        let end = end.min(trace.len());
        let peak = if start < end {
            trace[start..end]
                .iter()
                .copied()
                .fold(0.0f32, |acc, v| acc.max(v))
        } else {
            0.0
        };
        slot_peaks.push(peak);
    }

    let detected_peaks: Vec<f32> = slot_peaks
        .iter()
        .copied()
        .filter(|peak| *peak >= noise_floor * profile.detection_margin)
        .collect();
    let detected_presses = detected_peaks.len();

    let press_level = if detected_peaks.is_empty() {
        // Degenerate recording: fall back to the loudest slot so the
        // separation ratio honestly reflects how little signal there is
        slot_peaks.iter().copied().fold(0.0f32, |acc, v| acc.max(v))
    } else {
        median(detected_peaks.clone())
    };

    SignalStats {
        noise_floor,
        press_level,
        slot_peaks,
        detected_peaks,
        detected_presses,
        separation_ratio: press_level / noise_floor,
    }
}

/// Place the hysteresis pair strictly between noise floor and press level
pub fn place_thresholds(stats: &SignalStats, profile: &AnalysisProfile) -> (f32, f32) {
    let span = (stats.press_level - stats.noise_floor).max(0.0);
    let press = stats.noise_floor + profile.press_fraction * span;
    let mut release = stats.noise_floor + profile.release_fraction * span;

    let min_gap = profile.min_gap_fraction * span;
    if press - release < min_gap {
        release = press - min_gap;
    }

    (press, release)
}

/// Confidence in [0, 1] from separation and press consistency
///
/// Separation scales the press-to-floor ratio across a fixed band;
/// consistency is the inverse coefficient of variation of detected slot
/// peaks. Both clamp to [0, 1] and mix 60/40.
pub fn confidence_score(stats: &SignalStats) -> f32 {
    let separation = clamp01(
        (stats.separation_ratio - RATIO_SCORE_FLOOR) / (RATIO_SCORE_CEIL - RATIO_SCORE_FLOOR),
    );

    let consistency = if stats.detected_peaks.len() < 2 {
        0.0
    } else {
        let mean = stats.detected_peaks.iter().sum::<f32>() / stats.detected_peaks.len() as f32;
        if mean <= 0.0 {
            0.0
        } else {
            let variance = stats
                .detected_peaks
                .iter()
                .map(|peak| (peak - mean) * (peak - mean))
                .sum::<f32>()
                / stats.detected_peaks.len() as f32;
            clamp01(1.0 - variance.sqrt() / mean)
        }
    };

    clamp01(0.6 * separation + 0.4 * consistency)
}

/// Count press events of a replay at the given parameters
///
/// Runs the actual SignalDetector/Debouncer stack over the recording in
/// small blocks, exactly as the live pipeline would consume it.
pub fn count_press_events(
    samples: &[f32],
    sample_rate: u32,
    press_threshold: f32,
    release_threshold: f32,
    energy_window: usize,
    debounce_ms: u32,
) -> Vec<Duration> {
    let mut detector = SignalDetector::new(press_threshold, release_threshold, energy_window);
    let mut debouncer = Debouncer::new(Duration::from_millis(debounce_ms as u64));
    let mut transitions = Vec::new();
    let mut presses = Vec::new();

    for block in samples.chunks(REPLAY_BLOCK) {
        transitions.clear();
        detector.process(block, &mut transitions);
        for transition in &transitions {
            let timestamp =
                Duration::from_secs_f64(transition.sample_index as f64 / sample_rate as f64);
            if let Some(event) = debouncer.accept(transition.kind, timestamp) {
                if event.kind == SwitchEventKind::Press {
                    presses.push(event.timestamp);
                }
            }
        }
    }
    presses
}

/// Pick a debounce interval by sweeping the recording
///
/// Ground truth is the press count at the shortest interval; the chosen
/// interval is the first one retaining at least 99% of it, raised further
/// while any two presses still land closer together than the interval.
pub fn choose_debounce(
    samples: &[f32],
    sample_rate: u32,
    press_threshold: f32,
    release_threshold: f32,
    energy_window: usize,
) -> u32 {
    let (sweep_min, sweep_max) = DEBOUNCE_SWEEP_MS;
    let count_at = |debounce_ms: u32| {
        count_press_events(
            samples,
            sample_rate,
            press_threshold,
            release_threshold,
            energy_window,
            debounce_ms,
        )
    };

    let ground_truth = count_at(sweep_min).len().max(1);

    let mut chosen = None;
    for debounce_ms in (sweep_min..=sweep_max).step_by(2) {
        let recall = count_at(debounce_ms).len() as f32 / ground_truth as f32;
        if recall >= 0.99 {
            chosen = Some(debounce_ms);
            break;
        }
    }
    let mut debounce_ms = chosen.unwrap_or_else(|| {
        log::warn!(
            "[Calibration] No debounce in sweep kept full recall, using {} ms",
            sweep_min
        );
        sweep_min
    });

    let mut events = count_at(debounce_ms);
    while has_duplicates(&events, debounce_ms) && debounce_ms < sweep_max {
        debounce_ms += 2;
        events = count_at(debounce_ms);
    }

    debounce_ms
}

fn has_duplicates(events: &[Duration], debounce_ms: u32) -> bool {
    let min_gap = Duration::from_millis(debounce_ms as u64);
    events.windows(2).any(|pair| pair[1] - pair[0] < min_gap)
}

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Percentile over an unsorted buffer (sorts in place)
fn percentile(values: &mut [f32], p: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = ((values.len() - 1) as f32 * p).round() as usize;
    values[index.min(values.len() - 1)]
}

fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
