//! Escalation rules for the error taxonomy.
//!
//! ## Propagation Model
//!
//! | Class | Escalation |
//! |-------|------------|
//! | `CommunicationError` | single attempts → `Retry`; exhausted retries → `Fault` |
//! | `DriverFault` transient | `Warning` |
//! | `DriverFault` destructive | `AxisStop` (local, immediate) + `Fault` |
//! | `DriverFault` overcurrent or repeated destructive | `EmergencyStop` |
//! | `SafetyViolation` | by threshold level: soft → `Warning`, hard → `Fault` |
//! | `ConfigurationError` | rejected at the boundary, no escalation |
//! | `ResourceError` | `Warning`; repeated deadline miss → `Fault` |
//!
//! Every function is allocation-free and returns by value.

use motus_common::motion::error::{
    CommunicationError, CoreError, DriverFault, ResourceError, SafetyViolation,
};
use motus_common::motion::state::{FaultCode, ThresholdLevel};

/// Task name carried by `ResourceError::DeadlineMiss` for a whole tick.
pub const TICK_DEADLINE: &str = "tick";

// ─── Escalation ─────────────────────────────────────────────────────

/// Severity the supervisor applies for an error. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Escalation {
    /// Handled locally (whole-transaction retry, rejected command).
    Retry,
    /// Speed reduced machine-wide.
    Warning,
    /// Faulting axis stopped locally; the machine enters Fault.
    AxisStop,
    /// Every axis ramps down; new motion rejected.
    Fault,
    /// Latched stop of every axis.
    EmergencyStop,
}

impl Escalation {
    /// Whether the supervisor must leave Safe for this escalation.
    #[inline]
    pub const fn affects_state(&self) -> bool {
        !matches!(self, Self::Retry)
    }
}

/// Escalation plus the fault code published with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalated {
    pub escalation: Escalation,
    pub code: FaultCode,
}

impl Escalated {
    #[inline]
    pub const fn new(escalation: Escalation, code: FaultCode) -> Self {
        Self { escalation, code }
    }
}

// ─── Classification ─────────────────────────────────────────────────

/// Communication failures.
///
/// Individual transfer failures are retried inside the protocol engine;
/// only a failure that survived every retry reaches the supervisor.
pub fn classify_communication(error: &CommunicationError) -> Escalated {
    let escalation = match error {
        CommunicationError::Timeout
        | CommunicationError::Framing { .. }
        | CommunicationError::ChecksumMismatch => Escalation::Retry,
        CommunicationError::RetriesExhausted { .. } | CommunicationError::InitVerify { .. } => {
            Escalation::Fault
        }
    };
    Escalated::new(escalation, FaultCode::Communication)
}

/// Driver faults of one axis.
///
/// `destructive_count` is the number of destructive reports seen on the
/// axis including this one. Returns `None` for an empty fault set.
pub fn classify_driver(faults: DriverFault, destructive_count: u32, estop_count: u32) -> Option<Escalated> {
    if faults.is_empty() {
        return None;
    }
    if faults.contains(DriverFault::OVERCURRENT) {
        return Some(Escalated::new(Escalation::EmergencyStop, FaultCode::DriverOvercurrent));
    }
    if faults.is_destructive() {
        if destructive_count >= estop_count {
            return Some(Escalated::new(Escalation::EmergencyStop, FaultCode::RepeatedDriverFault));
        }
        return Some(Escalated::new(Escalation::AxisStop, FaultCode::DriverStall));
    }
    if faults.contains(DriverFault::THERMAL_SHUTDOWN) {
        return Some(Escalated::new(Escalation::Fault, FaultCode::DriverThermalShutdown));
    }
    if faults.contains(DriverFault::UNDERVOLTAGE) {
        return Some(Escalated::new(Escalation::Fault, FaultCode::DriverUndervoltage));
    }
    if faults.contains(DriverFault::RESET) {
        // Configuration lost; the device runs on power-up defaults.
        return Some(Escalated::new(Escalation::Fault, FaultCode::DriverReset));
    }
    if faults.contains(DriverFault::THERMAL_WARNING) {
        return Some(Escalated::new(Escalation::Warning, FaultCode::DriverThermalWarning));
    }
    Some(Escalated::new(Escalation::Warning, FaultCode::DriverOpenLoad))
}

/// Safety violations are never retried.
pub fn classify_violation(violation: &SafetyViolation) -> Escalated {
    match *violation {
        SafetyViolation::ChannelThreshold { channel, level, .. } => {
            let escalation = match level {
                ThresholdLevel::Normal => Escalation::Retry,
                ThresholdLevel::Soft => Escalation::Warning,
                ThresholdLevel::Hard => Escalation::Fault,
            };
            Escalated::new(escalation, FaultCode::for_channel(channel, level))
        }
        SafetyViolation::DualChannelDiscrepancy { .. } => Escalated::new(Escalation::Fault, FaultCode::DualChannel),
        SafetyViolation::WarningTimeout { .. } => Escalated::new(Escalation::Fault, FaultCode::WarningTimeout),
        SafetyViolation::SensorStale { .. } => Escalated::new(Escalation::Fault, FaultCode::SensorStale),
        SafetyViolation::AnalogStale { .. } => Escalated::new(Escalation::Fault, FaultCode::AnalogStale),
    }
}

/// Resource errors. `consecutive` counts back-to-back occurrences of the
/// same error; `threshold` is the configured escalation count.
pub fn classify_resource(error: &ResourceError, consecutive: u32, threshold: u32) -> Escalated {
    match error {
        ResourceError::BusBusy => Escalated::new(Escalation::Retry, FaultCode::Communication),
        ResourceError::DeadlineMiss { task, .. } => {
            if *task == TICK_DEADLINE {
                if consecutive >= threshold {
                    Escalated::new(Escalation::Fault, FaultCode::DeadlineMiss)
                } else {
                    Escalated::new(Escalation::Retry, FaultCode::DeadlineMiss)
                }
            } else if consecutive >= threshold {
                Escalated::new(Escalation::Warning, FaultCode::TaskOverrun)
            } else {
                Escalated::new(Escalation::Retry, FaultCode::TaskOverrun)
            }
        }
        ResourceError::QueueFull { .. } => Escalated::new(Escalation::Warning, FaultCode::EventQueueOverflow),
    }
}

/// First-occurrence classification of any core error.
///
/// Configuration errors never escalate: the offending request is simply
/// rejected.
pub fn classify(error: &CoreError) -> Option<Escalated> {
    match error {
        CoreError::Communication(e) => Some(classify_communication(e)),
        CoreError::Driver(report) => classify_driver(report.faults, 1, u32::MAX),
        CoreError::Safety(v) => Some(classify_violation(v)),
        CoreError::Configuration(_) => None,
        CoreError::Resource(e) => Some(classify_resource(e, 1, u32::MAX)),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
