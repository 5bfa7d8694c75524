//! Board capability traits.
//!
//! This module defines:
//! - `MotionHal` trait - GPIO, bus transfer, tick counter and delay
//! - `IndependentWatchdog` trait - hardware watchdog refreshed by the safety gate
//! - `BoardInfo` struct - identification reported at startup
//!
//! # Timing Contracts
//!
//! | Operation | Max Duration | RT Constraint |
//! |-----------|--------------|---------------|
//! | `gpio_read` / `gpio_write` | a few µs | **HARD** |
//! | `bus_transfer` | `timeout_us` | **HARD** (bounded by caller) |
//! | `get_tick` | constant | **HARD** |
//! | `delay` | `ms` | init only |

use super::types::{BusError, Pin};

/// Identification reported by a board implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    /// Board identifier (e.g., "simulation").
    pub name: &'static str,
    /// Number of driver devices on the chain.
    pub chain_length: usize,
}

/// Synchronous, bounded-time capability set consumed by the motion core.
///
/// The core owns no knowledge of peripheral registers beyond this
/// interface. Every method must return within a bounded time; a transfer
/// that cannot complete inside `timeout_us` returns [`BusError::Timeout`].
pub trait MotionHal {
    /// Board identification.
    fn info(&self) -> BoardInfo;

    /// Sample a discrete input (or read back an output).
    fn gpio_read(&mut self, pin: Pin) -> bool;

    /// Drive a discrete output.
    fn gpio_write(&mut self, pin: Pin, level: bool);

    /// Full-duplex transfer of one chain frame.
    ///
    /// `tx` and `rx` have equal length. Holding the bus is confined to this
    /// call; no state persists between transfers.
    fn bus_transfer(&mut self, tx: &[u8], rx: &mut [u8], timeout_us: u32) -> Result<(), BusError>;

    /// Monotonic tick counter [µs].
    fn get_tick(&self) -> u64;

    /// Blocking delay, used only during initialization.
    fn delay(&mut self, ms: u32);
}

/// Independent hardware watchdog.
///
/// Once started it cannot be stopped. Refreshing is the only way to keep
/// it from firing; `hardware_reset` forces the reset path immediately.
pub trait IndependentWatchdog {
    /// Arm the watchdog with the given timeout [ms].
    fn start(&mut self, timeout_ms: u32);

    /// Refresh (kick) the watchdog.
    fn refresh(&mut self);

    /// Force an immediate hardware reset.
    fn hardware_reset(&mut self);
}
