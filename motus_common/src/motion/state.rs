//! State enums for the motion core.
//!
//! All enums use `#[repr(u8)]`/`#[repr(u16)]` so they pack into telemetry
//! words without translation tables.

use serde::{Deserialize, Serialize};

/// Axis identifier: index into the axis array (0-based).
///
/// Physical chain position is configured separately per axis.
pub type AxisId = u8;

/// Safety supervisor state.
///
/// `EmergencyStop` is latched: it exits only through an explicit reset
/// after the hardware trigger is confirmed cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum SafetyState {
    /// Power-up or post-reset; no motion until the first clean evaluation.
    #[default]
    Init = 0,
    /// All monitored channels inside their soft thresholds.
    Safe = 1,
    /// At least one channel beyond its soft threshold; speed is reduced.
    Warning = 2,
    /// Hard threshold, persistent warning or destructive fault; axes ramp down.
    Fault = 3,
    /// Latched emergency stop; every axis commanded to zero immediately.
    EmergencyStop = 4,
}

impl SafetyState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Safe),
            2 => Some(Self::Warning),
            3 => Some(Self::Fault),
            4 => Some(Self::EmergencyStop),
            _ => None,
        }
    }

    /// Whether new motion may be started in this state.
    #[inline]
    pub const fn allows_motion(&self) -> bool {
        matches!(self, Self::Safe | Self::Warning)
    }
}

/// Trajectory profile shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// Accelerate, cruise, decelerate with piecewise-constant acceleration.
    #[default]
    Trapezoidal,
    /// Jerk-limited, up to seven phases.
    #[serde(alias = "s-curve")]
    Scurve,
}

/// Lifecycle of a motion segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SegmentStatus {
    /// Being executed by the axis controller.
    Active = 0,
    /// Reached its end time.
    Completed = 1,
    /// Replaced mid-flight by a replanned segment.
    Superseded = 2,
    /// Aborted by a safety event.
    Cancelled = 3,
}

/// Physical quantity monitored by the safety supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MonitoredChannel {
    /// Motor phase current [A].
    Current = 0,
    /// Measured axis speed [units/s].
    Speed = 1,
    /// Measured axis position [units].
    Position = 2,
    /// Driver / motor temperature [°C].
    Temperature = 3,
    /// Motor supply voltage [V].
    SupplyVoltage = 4,
}

impl MonitoredChannel {
    /// Number of monitored channels (size of per-channel counter arrays).
    pub const COUNT: usize = 5;

    /// All channels in counter-array order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Current,
        Self::Speed,
        Self::Position,
        Self::Temperature,
        Self::SupplyVoltage,
    ];

    /// Index into per-channel counter arrays.
    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

/// Result of comparing a reading against a threshold pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThresholdLevel {
    /// Inside soft limits.
    Normal,
    /// Beyond the soft limit, inside the hard limit.
    Soft,
    /// Beyond the hard limit.
    Hard,
}

/// Fault code published with the safety state.
///
/// Records the cause of the most recent escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u16)]
pub enum FaultCode {
    #[default]
    None = 0,
    CurrentSoft = 0x0101,
    CurrentHard = 0x0102,
    SpeedSoft = 0x0111,
    SpeedHard = 0x0112,
    PositionSoft = 0x0121,
    PositionHard = 0x0122,
    TemperatureSoft = 0x0131,
    TemperatureHard = 0x0132,
    SupplySoft = 0x0141,
    SupplyHard = 0x0142,
    DualChannel = 0x0200,
    WarningTimeout = 0x0201,
    SensorStale = 0x0202,
    AnalogStale = 0x0203,
    DriverThermalWarning = 0x0300,
    DriverThermalShutdown = 0x0301,
    DriverUndervoltage = 0x0302,
    DriverStall = 0x0303,
    DriverOvercurrent = 0x0304,
    RepeatedDriverFault = 0x0305,
    DriverOpenLoad = 0x0306,
    DriverReset = 0x0307,
    Communication = 0x0400,
    DeadlineMiss = 0x0500,
    TaskOverrun = 0x0501,
    EventQueueOverflow = 0x0502,
    HardwareEmergency = 0x0600,
    SoftwareEmergency = 0x0601,
}

impl FaultCode {
    /// Fault code for a threshold crossing on `channel`.
    pub const fn for_channel(channel: MonitoredChannel, level: ThresholdLevel) -> Self {
        match (channel, level) {
            (_, ThresholdLevel::Normal) => Self::None,
            (MonitoredChannel::Current, ThresholdLevel::Soft) => Self::CurrentSoft,
            (MonitoredChannel::Current, ThresholdLevel::Hard) => Self::CurrentHard,
            (MonitoredChannel::Speed, ThresholdLevel::Soft) => Self::SpeedSoft,
            (MonitoredChannel::Speed, ThresholdLevel::Hard) => Self::SpeedHard,
            (MonitoredChannel::Position, ThresholdLevel::Soft) => Self::PositionSoft,
            (MonitoredChannel::Position, ThresholdLevel::Hard) => Self::PositionHard,
            (MonitoredChannel::Temperature, ThresholdLevel::Soft) => Self::TemperatureSoft,
            (MonitoredChannel::Temperature, ThresholdLevel::Hard) => Self::TemperatureHard,
            (MonitoredChannel::SupplyVoltage, ThresholdLevel::Soft) => Self::SupplySoft,
            (MonitoredChannel::SupplyVoltage, ThresholdLevel::Hard) => Self::SupplyHard,
        }
    }
}
