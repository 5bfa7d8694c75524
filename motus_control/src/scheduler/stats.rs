//! Per-task timing statistics.

/// Cooperative tasks, in execution order within one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    Safety,
    MotorControl,
    Communication,
    Telemetry,
}

impl TaskId {
    pub const COUNT: usize = 4;
    pub const ALL: [TaskId; Self::COUNT] = [Self::Safety, Self::MotorControl, Self::Communication, Self::Telemetry];

    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }

    /// Name carried in deadline-miss errors and logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::MotorControl => "motor_control",
            Self::Communication => "communication",
            Self::Telemetry => "telemetry",
        }
    }
}

/// Execution time statistics of one task (or of the whole tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleStats {
    /// Completed runs.
    pub cycle_count: u64,
    /// Last run duration [µs].
    pub last_us: u64,
    /// Shortest run [µs].
    pub min_us: u64,
    /// Longest run [µs].
    pub max_us: u64,
    /// Sum of all durations [µs], for the average.
    pub sum_us: u64,
    /// Runs that exceeded the budget.
    pub overruns: u64,
    /// Back-to-back overruns ending with the last run.
    pub consecutive_overruns: u32,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_us: 0,
            min_us: u64::MAX,
            max_us: 0,
            sum_us: 0,
            overruns: 0,
            consecutive_overruns: 0,
        }
    }

    /// Record one run against `budget_us`. Returns the overrun [µs], if any.
    pub fn record(&mut self, duration_us: u64, budget_us: u64) -> Option<u64> {
        self.cycle_count += 1;
        self.last_us = duration_us;
        self.min_us = self.min_us.min(duration_us);
        self.max_us = self.max_us.max(duration_us);
        self.sum_us = self.sum_us.saturating_add(duration_us);
        if duration_us > budget_us {
            self.overruns += 1;
            self.consecutive_overruns = self.consecutive_overruns.saturating_add(1);
            Some(duration_us - budget_us)
        } else {
            self.consecutive_overruns = 0;
            None
        }
    }

    /// Average duration [µs].
    pub fn avg_us(&self) -> u64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_us / self.cycle_count
        }
    }
}
