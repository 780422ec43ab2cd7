// Debouncer - collapses switch chatter into clean SwitchEvents
//
// This is the sole place bounce artifacts are removed; the detector and
// the scan controller both assume clean events. Rules:
// - a transition matching the kind of the last accepted transition of
//   that kind is dropped when it lands within the debounce interval
// - a transition of the opposite kind is dropped within the debounce
//   interval of the last accepted opposite transition, which is what
//   swallows the bounce tail right after an edge
// - accepted timestamps are strictly increasing

use std::time::Duration;

use crate::events::{SwitchEvent, SwitchEventKind};

#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    last_press: Option<Duration>,
    last_release: Option<Duration>,
    last_emitted: Option<Duration>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_press: None,
            last_release: None,
            last_emitted: None,
        }
    }

    /// Update the interval mid-stream (new DetectorConfig snapshot)
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Accept or drop one raw transition
    ///
    /// # Returns
    /// * `Some(SwitchEvent)` - Transition accepted as a clean event
    /// * `None` - Dropped as chatter or out-of-order
    pub fn accept(&mut self, kind: SwitchEventKind, timestamp: Duration) -> Option<SwitchEvent> {
        // Monotonicity guard: never emit a timestamp at or before the last
        if let Some(last) = self.last_emitted {
            if timestamp <= last {
                return None;
            }
        }

        let (same, opposite) = match kind {
            SwitchEventKind::Press => (self.last_press, self.last_release),
            SwitchEventKind::Release => (self.last_release, self.last_press),
        };

        if let Some(last) = same {
            if timestamp - last < self.interval {
                return None;
            }
        }
        if let Some(last) = opposite {
            if timestamp - last < self.interval {
                return None;
            }
        }

        match kind {
            SwitchEventKind::Press => self.last_press = Some(timestamp),
            SwitchEventKind::Release => self.last_release = Some(timestamp),
        }
        self.last_emitted = Some(timestamp);

        Some(SwitchEvent { kind, timestamp })
    }

    /// Forget history (new capture stream)
    pub fn reset(&mut self) {
        self.last_press = None;
        self.last_release = None;
        self.last_emitted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(40);

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_clean_actuations_pass_through() {
        let mut debouncer = Debouncer::new(DEBOUNCE);

        // Three actuations, edges spaced well past the interval
        let sequence = [
            (SwitchEventKind::Press, 100),
            (SwitchEventKind::Release, 200),
            (SwitchEventKind::Press, 300),
            (SwitchEventKind::Release, 400),
            (SwitchEventKind::Press, 500),
            (SwitchEventKind::Release, 600),
        ];

        let accepted: Vec<_> = sequence
            .iter()
            .filter_map(|&(kind, t)| debouncer.accept(kind, ms(t)))
            .collect();

        assert_eq!(accepted.len(), 6, "no drops on a clean sequence");
        let presses = accepted
            .iter()
            .filter(|e| e.kind == SwitchEventKind::Press)
            .count();
        assert_eq!(presses, 3, "exactly one press per actuation");

        // Strictly increasing timestamps
        for pair in accepted.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_chatter_is_collapsed() {
        let mut debouncer = Debouncer::new(DEBOUNCE);

        // Two intended actuations with sub-interval bounce noise around
        // each edge: press at 100 bounces until 110, release at 200
        // bounces until 208, then the same shape again at 300/400.
        let sequence = [
            (SwitchEventKind::Press, 100),
            (SwitchEventKind::Release, 102),
            (SwitchEventKind::Press, 104),
            (SwitchEventKind::Release, 106),
            (SwitchEventKind::Press, 110),
            (SwitchEventKind::Release, 200),
            (SwitchEventKind::Press, 204),
            (SwitchEventKind::Release, 208),
            (SwitchEventKind::Press, 300),
            (SwitchEventKind::Release, 303),
            (SwitchEventKind::Press, 306),
            (SwitchEventKind::Release, 400),
        ];

        let accepted: Vec<_> = sequence
            .iter()
            .filter_map(|&(kind, t)| debouncer.accept(kind, ms(t)))
            .collect();

        let presses: Vec<_> = accepted
            .iter()
            .filter(|e| e.kind == SwitchEventKind::Press)
            .collect();
        let releases: Vec<_> = accepted
            .iter()
            .filter(|e| e.kind == SwitchEventKind::Release)
            .collect();

        assert_eq!(presses.len(), 2, "press count equals intended actuations");
        assert_eq!(releases.len(), 2, "release count equals intended actuations");
        assert_eq!(presses[0].timestamp, ms(100));
        assert_eq!(presses[1].timestamp, ms(300));
    }

    #[test]
    fn test_same_kind_gap_invariant() {
        let mut debouncer = Debouncer::new(DEBOUNCE);

        let mut accepted = Vec::new();
        // Presses every 10 ms for 400 ms; releases far apart
        for t in (0..400).step_by(10) {
            if let Some(ev) = debouncer.accept(SwitchEventKind::Press, ms(t)) {
                accepted.push(ev);
            }
        }

        for pair in accepted.windows(2) {
            assert!(
                pair[1].timestamp - pair[0].timestamp >= DEBOUNCE,
                "same-kind gap below debounce interval: {:?} then {:?}",
                pair[0].timestamp,
                pair[1].timestamp
            );
        }
    }

    #[test]
    fn test_out_of_order_timestamps_dropped() {
        let mut debouncer = Debouncer::new(DEBOUNCE);

        assert!(debouncer.accept(SwitchEventKind::Press, ms(100)).is_some());
        assert!(debouncer.accept(SwitchEventKind::Release, ms(100)).is_none());
        assert!(debouncer.accept(SwitchEventKind::Release, ms(90)).is_none());
        assert!(debouncer.accept(SwitchEventKind::Release, ms(150)).is_some());
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut debouncer = Debouncer::new(DEBOUNCE);

        assert!(debouncer.accept(SwitchEventKind::Press, ms(100)).is_some());
        debouncer.reset();

        // A new stream restarts at t=0; without reset this would be
        // rejected as out-of-order
        assert!(debouncer.accept(SwitchEventKind::Press, ms(5)).is_some());
    }

    #[test]
    fn test_interval_update_applies() {
        let mut debouncer = Debouncer::new(DEBOUNCE);

        assert!(debouncer.accept(SwitchEventKind::Press, ms(100)).is_some());
        debouncer.set_interval(ms(10));
        assert!(
            debouncer.accept(SwitchEventKind::Release, ms(115)).is_some(),
            "shorter interval takes effect immediately"
        );
    }
}
