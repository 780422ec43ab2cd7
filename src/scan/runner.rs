// Scan runner - the timer-driven scheduling context
//
// Runs the ScanController on a dedicated thread with a current-thread
// tokio runtime. The dwell timer is the only scheduled wake-up; switch
// events and detector-status notices arrive over broadcast channels and
// never block. Consuming never blocks the producer side of the event
// channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::detect::DetectorStatus;
use crate::events::{EventReceiver, KeyActivation};
use crate::scan::controller::{Highlight, ScanController};

/// Cap on timer sleep so shutdown is noticed promptly even while
/// suspended (when no dwell deadline exists)
const WAKE_CAP: Duration = Duration::from_millis(200);

/// Spawn the scan runner thread
///
/// # Arguments
/// * `controller` - Started or not; `start` is called with the spawn time
/// * `events` - Consumer half of the switch-event channel
/// * `status_rx` - Detector status notifications for suspend/resume
/// * `activations_tx` - Outbound key activations for the action dispatcher
/// * `highlights_tx` - Outbound highlight changes for the UI
/// * `shutdown` - Cooperative stop flag
pub fn spawn_scan_runner(
    mut controller: ScanController,
    mut events: EventReceiver,
    mut status_rx: broadcast::Receiver<DetectorStatus>,
    activations_tx: broadcast::Sender<KeyActivation>,
    highlights_tx: broadcast::Sender<Highlight>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("scan runner runtime");

        rt.block_on(async move {
            controller.start(Instant::now());

            let mut last_highlight: Option<Highlight> = None;
            publish_highlight(&controller, &highlights_tx, &mut last_highlight);

            let mut events_open = true;
            let mut status_open = true;

            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let now = Instant::now();
                let wake = match controller.next_deadline() {
                    Some(deadline) => deadline.min(now + WAKE_CAP),
                    None => now + WAKE_CAP,
                };

                tokio::select! {
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {
                        controller.on_timer(Instant::now());
                    }
                    event = events.recv(), if events_open => {
                        match event {
                            Some(event) => {
                                if let Some(activation) =
                                    controller.handle_event(event, Instant::now())
                                {
                                    log::info!(
                                        "[ScanRunner] Activated '{}' at {} ms",
                                        activation.key_id,
                                        activation.timestamp_ms
                                    );
                                    let _ = activations_tx.send(activation);
                                }
                            }
                            None => {
                                // Producer gone; keep scanning on the timer,
                                // status notices decide suspension
                                events_open = false;
                            }
                        }
                    }
                    status = status_rx.recv(), if status_open => {
                        match status {
                            Ok(DetectorStatus::Suspended) => {
                                controller.suspend(Instant::now());
                            }
                            Ok(DetectorStatus::Running) => {
                                if controller.is_suspended() {
                                    controller.resume(Instant::now());
                                }
                            }
                            Ok(DetectorStatus::Stopped) => {
                                controller.suspend(Instant::now());
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => {
                                status_open = false;
                            }
                        }
                    }
                }

                publish_highlight(&controller, &highlights_tx, &mut last_highlight);
            }
        });
    })
}

fn publish_highlight(
    controller: &ScanController,
    highlights_tx: &broadcast::Sender<Highlight>,
    last: &mut Option<Highlight>,
) {
    let current = controller.current_highlight();
    if current != *last {
        if let Some(highlight) = &current {
            let _ = highlights_tx.send(highlight.clone());
        }
        *last = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_channel, SwitchEvent};
    use crate::scan::controller::{ScanMode, ScanTiming};
    use crate::scan::layout::linear_layout;

    fn controller(ids: &[&str], dwell_ms: u64) -> ScanController {
        ScanController::new(
            &linear_layout(ids),
            ScanMode::Linear,
            ScanTiming {
                dwell_interval: Duration::from_millis(dwell_ms),
                rearm_delay: Duration::from_millis(30),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_runner_activates_on_press_and_shuts_down() {
        let controller = controller(&["a", "b"], 5_000);
        let (event_tx, event_rx) = event_channel(8);
        let (status_tx, status_rx) = broadcast::channel(8);
        let (activations_tx, mut activations_rx) = broadcast::channel(8);
        let (highlights_tx, mut highlights_rx) = broadcast::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = spawn_scan_runner(
            controller,
            event_rx,
            status_rx,
            activations_tx,
            highlights_tx,
            Arc::clone(&shutdown),
        );

        // Long dwell: "a" is still highlighted when the press lands
        std::thread::sleep(Duration::from_millis(50));
        event_tx.send(SwitchEvent::press(Duration::from_millis(50)));
        std::thread::sleep(Duration::from_millis(300));

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        drop(status_tx);

        let activation = activations_rx.try_recv().expect("one activation");
        assert_eq!(activation.key_id, "a");
        assert!(activations_rx.try_recv().is_err(), "exactly one activation");

        let first_highlight = highlights_rx.try_recv().expect("initial highlight");
        assert_eq!(
            first_highlight,
            Highlight::Unit {
                key_id: "a".to_string()
            }
        );
    }

    #[test]
    fn test_runner_suspends_on_detector_loss() {
        let controller = controller(&["a", "b"], 5_000);
        let (event_tx, event_rx) = event_channel(8);
        let (status_tx, status_rx) = broadcast::channel(8);
        let (activations_tx, mut activations_rx) = broadcast::channel(8);
        let (highlights_tx, _highlights_rx) = broadcast::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = spawn_scan_runner(
            controller,
            event_rx,
            status_rx,
            activations_tx,
            highlights_tx,
            Arc::clone(&shutdown),
        );

        std::thread::sleep(Duration::from_millis(50));
        status_tx.send(DetectorStatus::Suspended).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        // Presses while suspended must not activate anything
        event_tx.send(SwitchEvent::press(Duration::from_millis(200)));
        std::thread::sleep(Duration::from_millis(100));

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        assert!(
            activations_rx.try_recv().is_err(),
            "no activation while suspended"
        );
    }
}
