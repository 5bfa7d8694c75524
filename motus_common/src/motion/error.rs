//! Error taxonomy for the motion core.
//!
//! Five classes, each with its own propagation rule:
//! - [`CommunicationError`]: retried locally as a whole transaction, then escalated.
//! - [`DriverFault`]: never retried; always escalated to the safety supervisor.
//! - [`SafetyViolation`]: never retried; always escalated.
//! - [`ConfigurationError`]: rejected at the boundary, never partially applied.
//! - [`ResourceError`]: bus busy, deadline miss, queue overflow.
//!
//! Per-axis fault flags use `bitflags` for compact telemetry transport.

use bitflags::bitflags;
use thiserror::Error;

use super::state::{AxisId, MonitoredChannel, ThresholdLevel};

// ─── Communication ──────────────────────────────────────────────────

/// Bus transaction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommunicationError {
    /// Transfer did not complete within its timeout.
    #[error("bus transaction timed out")]
    Timeout,
    /// Reply slot failed the framing check (reserved status bits set).
    #[error("framing error in reply slot {slot}")]
    Framing {
        /// Frame slot index (0 = farthest device).
        slot: u8,
    },
    /// Transport-level checksum mismatch.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// A device did not confirm its configuration on read-back.
    #[error("device at chain position {position} failed configuration read-back")]
    InitVerify {
        /// Physical chain position.
        position: u8,
    },
    /// Whole-transaction retries exhausted.
    #[error("transaction failed after {attempts} attempts (last: {last})")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u8,
        /// Failure of the final attempt.
        last: TransferFailure,
    },
}

/// Failure kind of a single transfer attempt (used inside `RetriesExhausted`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("timeout")]
    Timeout,
    #[error("framing")]
    Framing,
    #[error("checksum")]
    Checksum,
    #[error("bus busy")]
    Busy,
}

// ─── Driver faults ──────────────────────────────────────────────────

bitflags! {
    /// Decoded driver fault flags.
    ///
    /// DESTRUCTIVE flags (OVERCURRENT, STALL) force an immediate axis stop
    /// regardless of supervisor state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DriverFault: u16 {
        /// Short to ground / supply on a bridge output. **DESTRUCTIVE**.
        const OVERCURRENT       = 0x0001;
        /// Over-temperature shutdown.
        const THERMAL_SHUTDOWN  = 0x0002;
        /// Over-temperature pre-warning (transient).
        const THERMAL_WARNING   = 0x0004;
        /// Load stall detected. **DESTRUCTIVE**.
        const STALL             = 0x0008;
        /// Charge pump / supply undervoltage.
        const UNDERVOLTAGE      = 0x0010;
        /// Open load on a coil (informational).
        const OPEN_LOAD         = 0x0020;
        /// Device reset since last read.
        const RESET             = 0x0040;
    }
}

impl DriverFault {
    /// Flags that force an immediate axis stop.
    pub const DESTRUCTIVE_MASK: Self =
        Self::from_bits_truncate(Self::OVERCURRENT.bits() | Self::STALL.bits());

    /// Flags that only warrant a warning.
    pub const TRANSIENT_MASK: Self =
        Self::from_bits_truncate(Self::THERMAL_WARNING.bits() | Self::OPEN_LOAD.bits());

    /// Returns true if any destructive flag is set.
    #[inline]
    pub const fn is_destructive(&self) -> bool {
        self.intersects(Self::DESTRUCTIVE_MASK)
    }

    /// Returns true if set flags are all transient.
    #[inline]
    pub const fn is_transient(&self) -> bool {
        !self.is_empty() && Self::TRANSIENT_MASK.contains(*self)
    }
}

/// Driver fault report for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("driver fault on axis {axis}: {faults:?}")]
pub struct DriverFaultReport {
    /// Faulting axis.
    pub axis: AxisId,
    /// Decoded flags.
    pub faults: DriverFault,
}

// ─── Safety violations ──────────────────────────────────────────────

/// A monitored condition breached.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SafetyViolation {
    /// A channel reading crossed a soft or hard threshold.
    #[error("{channel:?} {level:?} threshold crossed (value {value}, axis {axis:?})")]
    ChannelThreshold {
        channel: MonitoredChannel,
        level: ThresholdLevel,
        value: f64,
        /// `None` for machine-wide channels (supply voltage).
        axis: Option<AxisId>,
    },
    /// Redundant readings disagreed for too many consecutive samples.
    #[error("dual-channel discrepancy on axis {axis}: {difference}")]
    DualChannelDiscrepancy { axis: AxisId, difference: f64 },
    /// Warning persisted beyond its allowed duration.
    #[error("warning uncorrected for {elapsed_us} µs")]
    WarningTimeout { elapsed_us: u64 },
    /// No usable sensor sample within the prediction horizon.
    #[error("sensor on axis {axis} stale for {age_us} µs")]
    SensorStale { axis: AxisId, age_us: u64 },
    /// Current or temperature reading older than its bound, or never received.
    #[error("{channel:?} reading on axis {axis} stale for {age_us} µs")]
    AnalogStale {
        axis: AxisId,
        channel: MonitoredChannel,
        age_us: u64,
    },
}

// ─── Configuration ──────────────────────────────────────────────────

/// Parameter rejected before use.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigurationError {
    /// Numeric parameter outside its valid range.
    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// Structurally invalid request or configuration.
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigurationError {
    /// Check `value` against `[min, max]`, rejecting NaN.
    #[inline]
    pub fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), Self> {
        if value.is_finite() && value >= min && value <= max {
            Ok(())
        } else {
            Err(Self::OutOfRange {
                field,
                value,
                min,
                max,
            })
        }
    }
}

// ─── Resource ───────────────────────────────────────────────────────

/// Shared-resource or timing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The serial bus was held by another transaction.
    #[error("bus busy")]
    BusBusy,
    /// A task ran past its deadline.
    #[error("{task} missed its deadline by {overrun_us} µs")]
    DeadlineMiss {
        task: &'static str,
        overrun_us: u64,
    },
    /// A bounded queue rejected an element.
    #[error("{queue} queue full")]
    QueueFull { queue: &'static str },
}

// ─── Top-level ──────────────────────────────────────────────────────

/// Any error raised by the motion core.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Communication(#[from] CommunicationError),
    #[error(transparent)]
    Driver(#[from] DriverFaultReport),
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

// ─── Per-axis fault flags ───────────────────────────────────────────

bitflags! {
    /// Per-axis fault flags carried in `AxisState` and telemetry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AxisFaultFlags: u16 {
        /// Position beyond soft limit.
        const SOFT_LIMIT       = 0x0001;
        /// Position beyond hard limit.
        const HARD_LIMIT       = 0x0002;
        /// Sensor sample stale, running on model prediction.
        const SENSOR_PREDICTED = 0x0004;
        /// Sensor stale beyond prediction horizon.
        const SENSOR_LOST      = 0x0008;
        /// Driver reported a fault.
        const DRIVER_FAULT     = 0x0010;
        /// Chain transaction failed.
        const COMM_FAULT       = 0x0020;
        /// Redundant channels disagree.
        const DUAL_CHANNEL     = 0x0040;
        /// Axis stopped locally after a destructive driver fault.
        const FORCED_STOP      = 0x0080;
        /// Control output clamped to its safe bound this tick.
        const OUTPUT_SATURATED = 0x0100;
    }
}
