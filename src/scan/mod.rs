// Scan module - layout flattening, the scan state machine, and its runner
//
// ScanController is a pure, clockless FSM; the runner supplies the dwell
// timer and the channel plumbing. The layout is read-only input from the
// external layout collaborator.

pub mod controller;
pub mod layout;
pub mod runner;

pub use controller::{Highlight, ScanController, ScanMode, ScanState, ScanTiming};
pub use layout::{KeyDef, KeyLayout, KeyPage, KeyRow, ScanRow, ScanUnit};
pub use runner::spawn_scan_runner;
