//! Independent watchdog stand-in.

use tracing::{error, info};

use motus_common::hal::driver::IndependentWatchdog;

/// Records every interaction instead of resetting the process.
#[derive(Debug, Clone, Default)]
pub struct SimWatchdog {
    timeout_ms: Option<u32>,
    refreshes: u64,
    resets: u32,
}

impl SimWatchdog {
    /// Timeout armed by `start`, if started.
    #[inline]
    pub fn timeout_ms(&self) -> Option<u32> {
        self.timeout_ms
    }

    /// Refreshes received.
    #[inline]
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Hardware resets requested.
    #[inline]
    pub fn resets(&self) -> u32 {
        self.resets
    }
}

impl IndependentWatchdog for SimWatchdog {
    fn start(&mut self, timeout_ms: u32) {
        info!(timeout_ms, "simulated watchdog armed");
        self.timeout_ms = Some(timeout_ms);
    }

    fn refresh(&mut self) {
        self.refreshes += 1;
    }

    fn hardware_reset(&mut self) {
        error!("simulated watchdog: hardware reset requested");
        self.resets += 1;
    }
}
