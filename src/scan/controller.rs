// ScanController - finite state machine over the scannable layout
//
// States: Idle (pre-start), Dwell (one unit or row highlighted, timer
// armed), RowSelected (row-column mode, scanning columns inside the fixed
// row), AwaitRearm (post-activation cool-down absorbing the matching
// release and any early press), Suspended (upstream detector unavailable;
// cursor and remaining dwell frozen).
//
// The controller is headless and clockless: every entry point takes `now`
// explicitly, the runner owns the actual timer. Nothing here blocks.

use std::time::{Duration, Instant};

use crate::error::ConfigError;
use crate::events::{KeyActivation, SwitchEvent, SwitchEventKind};
use crate::scan::layout::{KeyLayout, ScanRow, ScanUnit};

/// Scanning strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Every key in document order
    Linear,
    /// First pick a row, then a key within it
    RowColumn,
}

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ScanState {
    Idle,
    Dwell,
    RowSelected,
    AwaitRearm,
    Suspended,
}

/// What the UI should currently highlight
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Highlight {
    Unit { key_id: String },
    Row { row: usize },
}

/// Scan configuration consumed by the controller
#[derive(Debug, Clone)]
pub struct ScanTiming {
    pub dwell_interval: Duration,
    pub rearm_delay: Duration,
}

impl ScanTiming {
    pub fn from_config(config: &crate::config::ScanConfig) -> Self {
        Self {
            dwell_interval: Duration::from_secs_f64(config.dwell_interval),
            rearm_delay: Duration::from_secs_f64(config.rearm_delay),
        }
    }
}

pub struct ScanController {
    mode: ScanMode,
    units: Vec<ScanUnit>,
    rows: Vec<ScanRow>,
    timing: ScanTiming,

    state: ScanState,
    unit_cursor: usize,
    row_cursor: usize,
    col_cursor: usize,
    deadline: Option<Instant>,
    started_at: Option<Instant>,

    // Suspend bookkeeping: where to come back to and how much dwell is left
    prior_state: ScanState,
    frozen_remaining: Option<Duration>,
}

impl ScanController {
    /// Build a controller over a layout
    ///
    /// # Errors
    /// `ConfigError::EmptyLayout` when the layout has no scannable keys;
    /// the controller never enters Dwell in that case.
    pub fn new(layout: &KeyLayout, mode: ScanMode, timing: ScanTiming) -> Result<Self, ConfigError> {
        let units = layout.flatten();
        let rows = layout.scan_rows();
        if units.is_empty() {
            return Err(ConfigError::EmptyLayout);
        }

        Ok(Self {
            mode,
            units,
            rows,
            timing,
            state: ScanState::Idle,
            unit_cursor: 0,
            row_cursor: 0,
            col_cursor: 0,
            deadline: None,
            started_at: None,
            prior_state: ScanState::Idle,
            frozen_remaining: None,
        })
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Begin scanning at the first unit (or row)
    pub fn start(&mut self, now: Instant) {
        if self.state != ScanState::Idle {
            return;
        }
        self.started_at = Some(now);
        self.unit_cursor = 0;
        self.row_cursor = 0;
        self.col_cursor = 0;
        self.state = ScanState::Dwell;
        self.deadline = Some(now + self.current_dwell());
        log::info!(
            "[ScanController] Started: {} unit(s), mode {:?}",
            self.units.len(),
            self.mode
        );
    }

    /// Next instant the runner should call `on_timer`
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The highlight for the current state (frozen while suspended)
    pub fn current_highlight(&self) -> Option<Highlight> {
        let state = if self.state == ScanState::Suspended {
            self.prior_state
        } else {
            self.state
        };
        match state {
            ScanState::Dwell => match self.mode {
                ScanMode::Linear => Some(Highlight::Unit {
                    key_id: self.units[self.unit_cursor].key_id.clone(),
                }),
                ScanMode::RowColumn => Some(Highlight::Row {
                    row: self.row_cursor,
                }),
            },
            ScanState::RowSelected => {
                let row = &self.rows[self.row_cursor];
                Some(Highlight::Unit {
                    key_id: row.units[self.col_cursor].key_id.clone(),
                })
            }
            _ => None,
        }
    }

    /// Advance on dwell expiry
    ///
    /// Calling early (before the deadline) is a no-op, so the runner may
    /// wake spuriously without disturbing the scan cadence.
    pub fn on_timer(&mut self, now: Instant) {
        let deadline = match self.deadline {
            Some(deadline) if now >= deadline => deadline,
            _ => return,
        };

        match self.state {
            ScanState::Dwell => {
                match self.mode {
                    ScanMode::Linear => {
                        // Cyclic wrap keeps the scan alive forever
                        self.unit_cursor = (self.unit_cursor + 1) % self.units.len();
                    }
                    ScanMode::RowColumn => {
                        self.row_cursor = (self.row_cursor + 1) % self.rows.len();
                    }
                }
                self.deadline = Some(deadline + self.current_dwell());
            }
            ScanState::RowSelected => {
                let row_len = self.rows[self.row_cursor].units.len();
                self.col_cursor = (self.col_cursor + 1) % row_len;
                self.deadline = Some(deadline + self.current_dwell());
            }
            ScanState::AwaitRearm => {
                // Cool-down over; cursors were advanced at activation
                self.state = ScanState::Dwell;
                self.deadline = Some(deadline + self.current_dwell());
            }
            ScanState::Idle | ScanState::Suspended => {}
        }
    }

    /// Consume one switch event
    ///
    /// # Returns
    /// The activation to dispatch, when the press selected a key.
    pub fn handle_event(&mut self, event: SwitchEvent, now: Instant) -> Option<KeyActivation> {
        match event.kind {
            // Releases only matter as the absorbed tail of an activation
            SwitchEventKind::Release => None,
            SwitchEventKind::Press => self.handle_press(now),
        }
    }

    fn handle_press(&mut self, now: Instant) -> Option<KeyActivation> {
        match (self.state, self.mode) {
            (ScanState::Dwell, ScanMode::Linear) => {
                let unit = &self.units[self.unit_cursor];
                let activation = self.activation_for(unit, now);
                self.unit_cursor = (self.unit_cursor + 1) % self.units.len();
                self.enter_rearm(now);
                Some(activation)
            }
            (ScanState::Dwell, ScanMode::RowColumn) => {
                // First press fixes the row and starts column scanning
                self.state = ScanState::RowSelected;
                self.col_cursor = 0;
                self.deadline = Some(now + self.current_dwell());
                None
            }
            (ScanState::RowSelected, _) => {
                let unit = &self.rows[self.row_cursor].units[self.col_cursor];
                let activation = self.activation_for(unit, now);
                self.row_cursor = (self.row_cursor + 1) % self.rows.len();
                self.col_cursor = 0;
                self.enter_rearm(now);
                Some(activation)
            }
            // A press during the rearm window is discarded; this is what
            // keeps one physical actuation from activating twice
            (ScanState::AwaitRearm, _) => None,
            (ScanState::Idle, _) | (ScanState::Suspended, _) => None,
        }
    }

    /// Freeze on upstream detector loss
    pub fn suspend(&mut self, now: Instant) {
        if matches!(self.state, ScanState::Suspended | ScanState::Idle) {
            return;
        }
        self.prior_state = self.state;
        self.frozen_remaining = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(now));
        self.state = ScanState::Suspended;
        self.deadline = None;
        log::warn!("[ScanController] Suspended: detector unavailable");
    }

    /// Resume from the frozen cursor after detector recovery
    pub fn resume(&mut self, now: Instant) {
        if self.state != ScanState::Suspended {
            return;
        }
        self.state = self.prior_state;
        let remaining = self.frozen_remaining.take().unwrap_or_else(|| self.current_dwell());
        self.deadline = Some(now + remaining);
        log::info!("[ScanController] Resumed from suspension");
    }

    pub fn is_suspended(&self) -> bool {
        self.state == ScanState::Suspended
    }

    /// Dwell for whatever is currently highlighted
    fn current_dwell(&self) -> Duration {
        let multiplier = match (self.state, self.mode) {
            (ScanState::RowSelected, _) => self.rows[self.row_cursor].units[self.col_cursor]
                .dwell_multiplier,
            (_, ScanMode::Linear) => self.units[self.unit_cursor].dwell_multiplier,
            // Row highlighting uses the base interval
            (_, ScanMode::RowColumn) => 1.0,
        };
        self.timing.dwell_interval.mul_f32(multiplier.max(0.1))
    }

    fn enter_rearm(&mut self, now: Instant) {
        self.state = ScanState::AwaitRearm;
        self.deadline = Some(now + self.timing.rearm_delay);
    }

    fn activation_for(&self, unit: &ScanUnit, now: Instant) -> KeyActivation {
        let timestamp_ms = self
            .started_at
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0);
        KeyActivation {
            key_id: unit.key_id.clone(),
            timestamp_ms,
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
