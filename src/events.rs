// Switch events and the bounded channel connecting detection to scanning
//
// The detect worker produces clean SwitchEvents; the scan runner consumes
// them. The channel is a small bounded tokio broadcast ring: the producer
// never blocks, and on overflow the oldest unconsumed event is overwritten.
// A lagging receiver observes the overwrite as `Lagged(n)`, which is
// recorded as an overload fault and logged. Scan cadence is orders of
// magnitude slower than audio production, so any overflow indicates a bug
// upstream, not expected load.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default capacity of the switch-event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 8;

/// Kind of debounced switch transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SwitchEventKind {
    Press,
    Release,
}

/// A clean, debounced switch transition
///
/// Invariant: for any two consecutive accepted events of the same kind,
/// the timestamp gap is at least the configured debounce interval, and
/// timestamps are strictly increasing overall. The Debouncer is the sole
/// component allowed to construct these for the live pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchEvent {
    pub kind: SwitchEventKind,
    /// Offset since capture-stream start
    pub timestamp: Duration,
}

impl SwitchEvent {
    pub fn press(timestamp: Duration) -> Self {
        Self {
            kind: SwitchEventKind::Press,
            timestamp,
        }
    }

    pub fn release(timestamp: Duration) -> Self {
        Self {
            kind: SwitchEventKind::Release,
            timestamp,
        }
    }
}

/// Key activation emitted by the scan controller
///
/// Delivered to the external action dispatcher; the core has no knowledge
/// of typing semantics beyond emitting this event.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyActivation {
    pub key_id: String,
    /// Milliseconds since scan start
    pub timestamp_ms: u64,
}

/// Create a bounded switch-event channel
///
/// # Arguments
/// * `capacity` - Ring size; `DEFAULT_EVENT_CAPACITY` for the live pipeline
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = broadcast::channel(capacity);
    let overload_faults = Arc::new(AtomicU64::new(0));
    (
        EventSender { tx },
        EventReceiver {
            rx,
            overload_faults,
        },
    )
}

/// Producer half of the switch-event channel
///
/// Sending never blocks and never fails the producer: with no receiver
/// attached the event is simply discarded.
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<SwitchEvent>,
}

impl EventSender {
    pub fn send(&self, event: SwitchEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe an additional receiver (diagnostics, tests)
    pub fn subscribe(&self) -> broadcast::Receiver<SwitchEvent> {
        self.tx.subscribe()
    }
}

/// Consumer half of the switch-event channel
pub struct EventReceiver {
    rx: broadcast::Receiver<SwitchEvent>,
    overload_faults: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Receive the next event, waiting if none is queued
    ///
    /// Returns `None` once the producer is gone and the ring is drained.
    /// Overwritten events are counted as overload faults and skipped.
    pub async fn recv(&mut self) -> Option<SwitchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => {
                    self.record_overload(n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive
    pub fn try_next(&mut self) -> Option<SwitchEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => {
                    self.record_overload(n);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Total events lost to overflow since creation
    pub fn overload_faults(&self) -> u64 {
        self.overload_faults.load(Ordering::Relaxed)
    }

    /// Shared handle to the overload-fault counter for telemetry
    pub fn overload_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.overload_faults)
    }

    fn record_overload(&self, lost: u64) {
        self.overload_faults.fetch_add(lost, Ordering::Relaxed);
        log::warn!(
            "[EventChannel] Overload fault: {} switch event(s) dropped (oldest first)",
            lost
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_try_next() {
        let (tx, mut rx) = event_channel(DEFAULT_EVENT_CAPACITY);

        tx.send(SwitchEvent::press(Duration::from_millis(10)));
        tx.send(SwitchEvent::release(Duration::from_millis(80)));

        assert_eq!(
            rx.try_next(),
            Some(SwitchEvent::press(Duration::from_millis(10)))
        );
        assert_eq!(
            rx.try_next(),
            Some(SwitchEvent::release(Duration::from_millis(80)))
        );
        assert_eq!(rx.try_next(), None);
        assert_eq!(rx.overload_faults(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest_and_records_fault() {
        let (tx, mut rx) = event_channel(4);

        // Push twice the capacity without consuming
        for i in 0..8u64 {
            tx.send(SwitchEvent::press(Duration::from_millis(i * 100)));
        }

        // The oldest four were overwritten; the first readable event is #4
        let first = rx.try_next().expect("ring should hold newest events");
        assert_eq!(first.timestamp, Duration::from_millis(400));
        assert_eq!(rx.overload_faults(), 4);

        // The remaining three are intact and in order
        let mut remaining = Vec::new();
        while let Some(ev) = rx.try_next() {
            remaining.push(ev.timestamp);
        }
        assert_eq!(
            remaining,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(600),
                Duration::from_millis(700)
            ]
        );
    }

    #[test]
    fn test_send_without_receiver_does_not_panic() {
        let (tx, rx) = event_channel(4);
        drop(rx);
        tx.send(SwitchEvent::press(Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn test_async_recv_sees_closed() {
        let (tx, mut rx) = event_channel(4);
        tx.send(SwitchEvent::press(Duration::from_millis(5)));
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_key_activation_roundtrip() {
        let activation = KeyActivation {
            key_id: "space".to_string(),
            timestamp_ms: 1234,
        };
        let json = serde_json::to_string(&activation).unwrap();
        let parsed: KeyActivation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, activation);
    }
}
