//! Prelude module for common re-exports.
//!
//! # Usage
//!
//! ```rust
//! use motus_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::motion::config::{
    AxisConfig, ChainConfig, LimitBand, MachineConfig, PidGains, SafetyConfig, SchedulerConfig,
    Threshold,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_AXES, MAX_PHASES, TICK_US};

// ─── Motion Types ───────────────────────────────────────────────────
pub use crate::motion::command::{
    AxisTarget, MotionLimits, MotionParameters, MotorCommand, MotorCommandKind,
};
pub use crate::motion::error::{
    AxisFaultFlags, CommunicationError, ConfigurationError, CoreError, DriverFault,
    DriverFaultReport, ResourceError, SafetyViolation,
};
pub use crate::motion::state::{
    AxisId, FaultCode, MonitoredChannel, ProfileKind, SafetyState, SegmentStatus, ThresholdLevel,
};
pub use crate::motion::telemetry::{AxisSnapshot, SafetySnapshot, TelemetrySnapshot};

// ─── Hardware Boundary ──────────────────────────────────────────────
pub use crate::hal::driver::{IndependentWatchdog, MotionHal};
pub use crate::hal::registers::DriverModel;
pub use crate::hal::types::{BusError, Pin, SensorEvent};
