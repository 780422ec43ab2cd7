// Deterministic synthetic clips for tests and offline tooling
//
// Clips are built from alternating-sign blocks so the rectified energy
// envelope settles exactly at the block amplitude. No randomness: the same
// arguments always produce the same samples, which the calibration
// determinism guarantees rely on.

use crate::calibration::analysis::PromptSchedule;

/// Fill `out[range]` with an alternating-sign block at `amp`
fn fill(out: &mut [f32], start: usize, end: usize, amp: f32) {
    let end = end.min(out.len());
    for (offset, sample) in out[start..end].iter_mut().enumerate() {
        *sample = if offset % 2 == 0 { amp } else { -amp };
    }
}

/// A clip with press bursts over a constant noise floor
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz
/// * `noise_amp` - Amplitude of the quiet background
/// * `press_amp` - Amplitude of each press burst
/// * `press_starts_ms` - Burst start offsets in milliseconds
/// * `press_len_ms` - Burst length in milliseconds
/// * `total_ms` - Total clip length in milliseconds
pub fn press_clip(
    sample_rate: u32,
    noise_amp: f32,
    press_amp: f32,
    press_starts_ms: &[u64],
    press_len_ms: u64,
    total_ms: u64,
) -> Vec<f32> {
    let rate = sample_rate as u64;
    let total = (total_ms * rate / 1000) as usize;
    let mut clip = vec![0.0f32; total];
    fill(&mut clip, 0, total, noise_amp);

    let burst_len = (press_len_ms * rate / 1000) as usize;
    for &start_ms in press_starts_ms {
        let start = (start_ms * rate / 1000) as usize;
        if start < total {
            fill(&mut clip, start, start + burst_len, press_amp);
        }
    }
    clip
}

/// A clip matching a calibration prompt schedule
///
/// Quiet intervals carry `noise_amp`; each prompt slot with a non-zero
/// entry in `press_amps` gets a burst over the middle half of the slot.
/// A zero entry simulates a missed press.
pub fn schedule_clip(
    schedule: &PromptSchedule,
    sample_rate: u32,
    noise_amp: f32,
    press_amps: &[f32],
) -> Vec<f32> {
    let total = schedule.total_samples(sample_rate);
    let mut clip = vec![0.0f32; total];
    fill(&mut clip, 0, total, noise_amp);

    for (index, &amp) in press_amps.iter().enumerate().take(schedule.count) {
        if amp <= 0.0 {
            continue;
        }
        let (start, end) = schedule.slot_bounds(index, sample_rate);
        let quarter = (end - start) / 4;
        fill(&mut clip, start + quarter, end - quarter, amp);
    }
    clip
}
