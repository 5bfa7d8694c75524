//! Watchdog refresh gate.
//!
//! The independent watchdog is refreshed only after a fully successful
//! cycle. The gate also enforces the fail-safe in software: a refresh
//! missing for twice the timeout forces an immediate hardware reset, which
//! has no software recovery path.

use tracing::{error, warn};

use motus_common::hal::driver::IndependentWatchdog;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStatus {
    /// Refreshed within the timeout.
    Ok,
    /// Refresh overdue by at least one timeout [age µs].
    Late(u64),
    /// Hardware reset requested.
    Reset,
}

/// Refresh gate in front of an [`IndependentWatchdog`].
#[derive(Debug, Clone)]
pub struct WatchdogGate {
    timeout_us: u64,
    last_refresh_us: u64,
    started: bool,
    late: bool,
    reset_issued: bool,
    misses: u64,
}

impl WatchdogGate {
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            timeout_us: u64::from(timeout_ms) * 1000,
            last_refresh_us: 0,
            started: false,
            late: false,
            reset_issued: false,
            misses: 0,
        }
    }

    /// Arm the hardware watchdog.
    pub fn start<W: IndependentWatchdog + ?Sized>(&mut self, watchdog: &mut W, now_us: u64) {
        watchdog.start((self.timeout_us / 1000) as u32);
        self.started = true;
        self.last_refresh_us = now_us;
    }

    /// Refresh after a successful cycle.
    pub fn cycle_succeeded<W: IndependentWatchdog + ?Sized>(&mut self, watchdog: &mut W, now_us: u64) {
        if !self.started || self.reset_issued {
            return;
        }
        watchdog.refresh();
        self.last_refresh_us = now_us;
        self.late = false;
    }

    /// Check refresh age; forces the reset at twice the timeout.
    pub fn check<W: IndependentWatchdog + ?Sized>(&mut self, watchdog: &mut W, now_us: u64) -> WatchdogStatus {
        if !self.started {
            return WatchdogStatus::Ok;
        }
        if self.reset_issued {
            return WatchdogStatus::Reset;
        }
        let age = self.age_us(now_us);
        if age >= 2 * self.timeout_us {
            error!(age_us = age, timeout_us = self.timeout_us, "watchdog refresh missed, forcing hardware reset");
            self.reset_issued = true;
            watchdog.hardware_reset();
            return WatchdogStatus::Reset;
        }
        if age >= self.timeout_us {
            if !self.late {
                self.late = true;
                self.misses += 1;
                warn!(age_us = age, "watchdog refresh overdue");
            }
            return WatchdogStatus::Late(age);
        }
        WatchdogStatus::Ok
    }

    /// Time since the last refresh [µs].
    #[inline]
    pub fn age_us(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.last_refresh_us)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    #[inline]
    pub fn reset_issued(&self) -> bool {
        self.reset_issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        timeout_ms: Option<u32>,
        refreshes: u32,
        resets: u32,
    }

    impl IndependentWatchdog for Recorder {
        fn start(&mut self, timeout_ms: u32) {
            self.timeout_ms = Some(timeout_ms);
        }
        fn refresh(&mut self) {
            self.refreshes += 1;
        }
        fn hardware_reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn refresh_keeps_gate_ok() {
        let mut wd = Recorder::default();
        let mut gate = WatchdogGate::new(50);
        gate.start(&mut wd, 0);
        assert_eq!(wd.timeout_ms, Some(50));
        for t in (1_000..200_000).step_by(1_000) {
            assert_eq!(gate.check(&mut wd, t), WatchdogStatus::Ok);
            gate.cycle_succeeded(&mut wd, t);
        }
        assert_eq!(wd.resets, 0);
        assert_eq!(wd.refreshes, 199);
    }

    #[test]
    fn missed_refresh_resets_at_twice_timeout() {
        let mut wd = Recorder::default();
        let mut gate = WatchdogGate::new(50);
        gate.start(&mut wd, 0);
        assert_eq!(gate.check(&mut wd, 49_999), WatchdogStatus::Ok);
        assert_eq!(gate.check(&mut wd, 50_000), WatchdogStatus::Late(50_000));
        assert_eq!(gate.misses(), 1);
        assert_eq!(gate.check(&mut wd, 99_999), WatchdogStatus::Late(99_999));
        assert_eq!(gate.misses(), 1);
        assert_eq!(wd.resets, 0);
        assert_eq!(gate.check(&mut wd, 100_000), WatchdogStatus::Reset);
        assert_eq!(gate.check(&mut wd, 150_000), WatchdogStatus::Reset);
        assert_eq!(wd.resets, 1);
        // No refresh once the reset is under way.
        gate.cycle_succeeded(&mut wd, 150_000);
        assert_eq!(wd.refreshes, 0);
    }
}
