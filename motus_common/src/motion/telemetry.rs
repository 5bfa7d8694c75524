//! Outbound telemetry payloads.
//!
//! Snapshots are plain copies; producing one never borrows core state
//! beyond the call.

use heapless::Vec as HVec;
use serde::{Deserialize, Serialize};

use crate::consts::MAX_AXES;

use super::state::{AxisId, FaultCode, SafetyState};

/// Read-only copy of one axis' state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisSnapshot {
    pub axis: AxisId,
    /// Setpoint position [units].
    pub commanded_position: f64,
    /// Setpoint velocity [units/s].
    pub commanded_velocity: f64,
    /// Fused position [units].
    pub measured_position: f64,
    /// Fused velocity [units/s].
    pub measured_velocity: f64,
    /// Velocity actually sent to the driver [units/s].
    pub output_velocity: f64,
    /// `AxisFaultFlags` bits.
    pub fault_bits: u16,
    /// Age of the last good sensor sample [µs].
    pub sample_age_us: u64,
    /// Output clamped this tick.
    pub saturated: bool,
    /// A segment is executing.
    pub segment_active: bool,
}

/// Safety supervisor view.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SafetySnapshot {
    pub state: SafetyState,
    pub fault_code: FaultCode,
    pub emergency_latched: bool,
    /// Time since the watchdog was last refreshed [µs].
    pub watchdog_age_us: u64,
}

/// Monotonic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub ticks: u64,
    pub comm_retries: u64,
    pub comm_failures: u64,
    pub task_overruns: u64,
    pub deadline_misses: u64,
    pub dropped_sensor_events: u64,
    pub dropped_commands: u64,
    pub rejected_commands: u64,
    pub estop_latency_violations: u64,
    pub watchdog_misses: u64,
}

/// Periodic outbound snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Board tick at capture [µs].
    pub timestamp_us: u64,
    pub safety: SafetySnapshot,
    pub axes: HVec<AxisSnapshot, MAX_AXES>,
    pub counters: TelemetryCounters,
}

impl TelemetrySnapshot {
    /// Snapshot of one axis, if present.
    pub fn axis(&self, axis: AxisId) -> Option<&AxisSnapshot> {
        self.axes.iter().find(|a| a.axis == axis)
    }
}
