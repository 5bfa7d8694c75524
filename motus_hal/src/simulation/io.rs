//! Discrete I/O simulation.

use motus_common::hal::types::Pin;

const PINS: usize = 4;

const fn index(pin: Pin) -> usize {
    match pin {
        Pin::EmergencyInput => 0,
        Pin::ResetConfirm => 1,
        Pin::DriverEnable => 2,
        Pin::FaultLamp => 3,
    }
}

/// Levels of every board pin. Inputs are driven by the test harness,
/// outputs by the core.
#[derive(Debug, Clone, Default)]
pub struct GpioBank {
    levels: [bool; PINS],
    writes: [u64; PINS],
}

impl GpioBank {
    /// Current level of `pin`.
    #[inline]
    pub fn level(&self, pin: Pin) -> bool {
        self.levels[index(pin)]
    }

    /// Set `pin`. Returns `true` when the level changed.
    pub fn set(&mut self, pin: Pin, level: bool) -> bool {
        let i = index(pin);
        self.writes[i] += 1;
        core::mem::replace(&mut self.levels[i], level) != level
    }

    /// Number of writes to `pin` so far.
    #[inline]
    pub fn writes(&self, pin: Pin) -> u64 {
        self.writes[index(pin)]
    }
}
