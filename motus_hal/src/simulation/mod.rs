//! Simulated board.
//!
//! Provides a deterministic stand-in for the stepper board: a chain of
//! register-level driver devices, one first-order motor plant per axis,
//! a GPIO bank and an independent watchdog recorder. Time only advances
//! when the caller says so (plus a fixed cost per bus transfer), so test
//! runs are reproducible.

mod board;
mod device;
mod io;
mod physics;
mod watchdog;

pub use board::SimBoard;
pub use device::ChainDevice;
pub use io::GpioBank;
pub use physics::AxisPlant;
pub use watchdog::SimWatchdog;
