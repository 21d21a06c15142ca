//! Recording controller
//!
//! Drives one capture session and its upload as a single state machine:
//! - device acquisition and encoder start
//! - fragment collection until stop
//! - device release before upload
//! - upload outcome as the terminal state

mod controller;
mod state;

pub use controller::{ControllerError, RecordingController};
pub use state::{ControllerState, Outcome};
