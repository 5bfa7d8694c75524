//! Axis Controller.
//!
//! Per-axis closed loop: sensor fusion, PID + feedforward, output clamp.
//! Gains set to zero disable their term.

pub mod angle;
pub mod autotune;
pub mod axis;
pub mod feedforward;
pub mod fusion;
pub mod output;
pub mod pid;

pub use axis::{AxisController, AxisOutput, AxisState};
