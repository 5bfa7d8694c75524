//! Machine configuration for the motion core.
//!
//! All config types use `serde::Deserialize` for TOML loading.
//! Numeric parameters have const `MIN`/`MAX` bounds; optional fields use
//! `#[serde(default)]`. A configuration is validated as a whole and
//! rejected entirely on the first out-of-range field.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "bench-rig"
//!
//! [chain]
//! model = "standard"
//!
//! [[axes]]
//! name = "X"
//! chain_position = 0
//! steps_per_unit = 1600.0
//! max_velocity = 50.0
//! max_acceleration = 500.0
//! max_jerk = 10000.0
//! position_limits = { hard_min = -5.0, soft_min = 0.0, soft_max = 300.0, hard_max = 305.0 }
//! speed = { soft = 55.0, hard = 65.0 }
//! current = { soft = 1.6, hard = 1.9 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigLoader, SharedConfig};
use crate::consts::{MAX_AXES, TICK_US, TICK_US_MAX, TICK_US_MIN};
use crate::hal::registers::{DriverModel, vactual};

use super::error::ConfigurationError;
use super::state::{ProfileKind, ThresholdLevel};

// ─── Thresholds ─────────────────────────────────────────────────────

/// Symmetric soft/hard threshold pair applied to the magnitude of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Soft limit; crossing it raises a warning.
    pub soft: f64,
    /// Hard limit; crossing it raises a fault.
    pub hard: f64,
}

impl Threshold {
    /// Classify `value` by its magnitude.
    #[inline]
    pub fn classify(&self, value: f64) -> ThresholdLevel {
        let magnitude = value.abs();
        if !magnitude.is_finite() || magnitude > self.hard {
            ThresholdLevel::Hard
        } else if magnitude > self.soft {
            ThresholdLevel::Soft
        } else {
            ThresholdLevel::Normal
        }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigurationError> {
        ConfigurationError::check_range(field, self.soft, f64::MIN_POSITIVE, self.hard)?;
        ConfigurationError::check_range(field, self.hard, self.soft, f64::MAX)
    }
}

/// Asymmetric band: `hard_min <= soft_min < soft_max <= hard_max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitBand {
    pub hard_min: f64,
    pub soft_min: f64,
    pub soft_max: f64,
    pub hard_max: f64,
}

impl LimitBand {
    /// Classify `value` against the band.
    #[inline]
    pub fn classify(&self, value: f64) -> ThresholdLevel {
        if !value.is_finite() || value < self.hard_min || value > self.hard_max {
            ThresholdLevel::Hard
        } else if value < self.soft_min || value > self.soft_max {
            ThresholdLevel::Soft
        } else {
            ThresholdLevel::Normal
        }
    }

    /// Whether `value` lies inside the soft band.
    #[inline]
    pub fn contains_soft(&self, value: f64) -> bool {
        value >= self.soft_min && value <= self.soft_max
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigurationError> {
        let ordered = self.hard_min <= self.soft_min
            && self.soft_min < self.soft_max
            && self.soft_max <= self.hard_max;
        let finite = [self.hard_min, self.soft_min, self.soft_max, self.hard_max]
            .iter()
            .all(|v| v.is_finite());
        if ordered && finite {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid {
                field,
                reason: "expected hard_min <= soft_min < soft_max <= hard_max",
            })
        }
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

/// Tick period, task budgets and overrun escalation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Control tick period [µs] (default: 1000 = 1 kHz).
    #[serde(default = "default_tick_us")]
    pub tick_us: u32,
    /// Execution budget of the safety task [µs].
    #[serde(default = "default_safety_budget")]
    pub safety_budget_us: u32,
    /// Execution budget of the motor control task, bus transaction included [µs].
    #[serde(default = "default_control_budget")]
    pub control_budget_us: u32,
    /// Execution budget of the communication task [µs].
    #[serde(default = "default_comm_budget")]
    pub comm_budget_us: u32,
    /// Execution budget of the telemetry task [µs].
    #[serde(default = "default_telemetry_budget")]
    pub telemetry_budget_us: u32,
    /// Communication task period [ticks] (default: 5).
    #[serde(default = "default_comm_period")]
    pub comm_period_ticks: u32,
    /// Telemetry task period [ticks] (default: 100).
    #[serde(default = "default_telemetry_period")]
    pub telemetry_period_ticks: u32,
    /// Consecutive overruns of one task that escalate to Warning (default: 3).
    #[serde(default = "default_overrun_threshold")]
    pub overrun_threshold: u32,
    /// Consecutive missed tick deadlines that escalate to Fault (default: 5).
    #[serde(default = "default_deadline_miss_threshold")]
    pub deadline_miss_threshold: u32,
}

fn default_tick_us() -> u32 {
    TICK_US
}
fn default_safety_budget() -> u32 {
    200
}
fn default_control_budget() -> u32 {
    500
}
fn default_comm_budget() -> u32 {
    150
}
fn default_telemetry_budget() -> u32 {
    150
}
fn default_comm_period() -> u32 {
    5
}
fn default_telemetry_period() -> u32 {
    100
}
fn default_overrun_threshold() -> u32 {
    3
}
fn default_deadline_miss_threshold() -> u32 {
    5
}

impl SchedulerConfig {
    pub const PERIOD_TICKS_MAX: u32 = 100_000;
    pub const THRESHOLD_MAX: u32 = 1000;

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let tick = f64::from(self.tick_us);
        ConfigurationError::check_range("scheduler.tick_us", tick, f64::from(TICK_US_MIN), f64::from(TICK_US_MAX))?;
        for (field, budget) in [
            ("scheduler.safety_budget_us", self.safety_budget_us),
            ("scheduler.control_budget_us", self.control_budget_us),
            ("scheduler.comm_budget_us", self.comm_budget_us),
            ("scheduler.telemetry_budget_us", self.telemetry_budget_us),
        ] {
            ConfigurationError::check_range(field, f64::from(budget), 1.0, tick)?;
        }
        let total = u64::from(self.safety_budget_us) + u64::from(self.control_budget_us);
        if total > u64::from(self.tick_us) {
            return Err(ConfigurationError::Invalid {
                field: "scheduler.control_budget_us",
                reason: "safety and control budgets exceed the tick period",
            });
        }
        let max_period = f64::from(Self::PERIOD_TICKS_MAX);
        ConfigurationError::check_range("scheduler.comm_period_ticks", f64::from(self.comm_period_ticks), 1.0, max_period)?;
        ConfigurationError::check_range(
            "scheduler.telemetry_period_ticks",
            f64::from(self.telemetry_period_ticks),
            1.0,
            max_period,
        )?;
        let max_threshold = f64::from(Self::THRESHOLD_MAX);
        ConfigurationError::check_range("scheduler.overrun_threshold", f64::from(self.overrun_threshold), 1.0, max_threshold)?;
        ConfigurationError::check_range(
            "scheduler.deadline_miss_threshold",
            f64::from(self.deadline_miss_threshold),
            1.0,
            max_threshold,
        )
    }

    /// Tick period in seconds.
    #[inline]
    pub fn tick_s(&self) -> f64 {
        f64::from(self.tick_us) * 1e-6
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_us: default_tick_us(),
            safety_budget_us: default_safety_budget(),
            control_budget_us: default_control_budget(),
            comm_budget_us: default_comm_budget(),
            telemetry_budget_us: default_telemetry_budget(),
            comm_period_ticks: default_comm_period(),
            telemetry_period_ticks: default_telemetry_period(),
            overrun_threshold: default_overrun_threshold(),
            deadline_miss_threshold: default_deadline_miss_threshold(),
        }
    }
}

// ─── Driver chain ───────────────────────────────────────────────────

/// Daisy-chained driver bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Device model on the chain.
    #[serde(default)]
    pub model: DriverModel,
    /// Device clock [Hz]; model default when absent.
    #[serde(default)]
    pub clock_hz: Option<f64>,
    /// Timeout of one bus transfer [µs] (default: 200).
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_us: u32,
    /// Whole-transaction retries before escalation (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Ticks between status read requests (default: 10).
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval: u32,
    /// Hold-to-standstill delay code written to IHOLDDELAY (0..=15, default: 6).
    #[serde(default = "default_hold_delay")]
    pub hold_delay: u8,
}

fn default_transfer_timeout() -> u32 {
    200
}
fn default_max_retries() -> u8 {
    3
}
fn default_status_poll_interval() -> u32 {
    10
}
fn default_hold_delay() -> u8 {
    6
}

impl ChainConfig {
    pub const CLOCK_HZ_MIN: f64 = 4_000_000.0;
    pub const CLOCK_HZ_MAX: f64 = 20_000_000.0;
    pub const TRANSFER_TIMEOUT_US_MIN: u32 = 10;
    pub const TRANSFER_TIMEOUT_US_MAX: u32 = 5_000;
    pub const MAX_RETRIES_MAX: u8 = 10;
    pub const HOLD_DELAY_MAX: u8 = 15;

    /// Effective device clock [Hz].
    #[inline]
    pub fn clock(&self) -> f64 {
        self.clock_hz.unwrap_or_else(|| self.model.default_clock_hz())
    }

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_range("chain.clock_hz", self.clock(), Self::CLOCK_HZ_MIN, Self::CLOCK_HZ_MAX)?;
        ConfigurationError::check_range(
            "chain.transfer_timeout_us",
            f64::from(self.transfer_timeout_us),
            f64::from(Self::TRANSFER_TIMEOUT_US_MIN),
            f64::from(Self::TRANSFER_TIMEOUT_US_MAX),
        )?;
        ConfigurationError::check_range("chain.max_retries", f64::from(self.max_retries), 0.0, f64::from(Self::MAX_RETRIES_MAX))?;
        ConfigurationError::check_range(
            "chain.status_poll_interval",
            f64::from(self.status_poll_interval),
            2.0,
            f64::from(SchedulerConfig::PERIOD_TICKS_MAX),
        )?;
        ConfigurationError::check_range("chain.hold_delay", f64::from(self.hold_delay), 0.0, f64::from(Self::HOLD_DELAY_MAX))
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            model: DriverModel::default(),
            clock_hz: None,
            transfer_timeout_us: default_transfer_timeout(),
            max_retries: default_max_retries(),
            status_poll_interval: default_status_poll_interval(),
            hold_delay: default_hold_delay(),
        }
    }
}

// ─── Safety ─────────────────────────────────────────────────────────

/// Machine-wide safety supervisor settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Maximum uncorrected Warning duration before Fault [ms] (default: 500).
    #[serde(default = "default_warning_timeout")]
    pub warning_timeout_ms: u32,
    /// Speed scale applied to every axis while in Warning (default: 0.5).
    #[serde(default = "default_warning_speed_scale")]
    pub warning_speed_scale: f64,
    /// Consecutive discrepant samples escalated to Fault (default: 5).
    #[serde(default = "default_dual_channel_samples")]
    pub dual_channel_samples: u32,
    /// Bound from trigger detection to stop command issuance [µs] (default: 1000).
    #[serde(default = "default_estop_latency")]
    pub estop_latency_bound_us: u32,
    /// Independent watchdog timeout [ms] (default: 50).
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_ms: u32,
    /// Destructive driver faults on one axis that escalate to EmergencyStop (default: 3).
    #[serde(default = "default_driver_fault_estop_count")]
    pub driver_fault_estop_count: u32,
    /// Maximum age of a current or temperature reading before Fault [ms] (default: 100).
    #[serde(default = "default_analog_staleness")]
    pub analog_staleness_ms: u32,
    /// Motor supply voltage band [V].
    #[serde(default = "default_supply_voltage")]
    pub supply_voltage: LimitBand,
}

fn default_warning_timeout() -> u32 {
    500
}
fn default_warning_speed_scale() -> f64 {
    0.5
}
fn default_dual_channel_samples() -> u32 {
    5
}
fn default_estop_latency() -> u32 {
    1000
}
fn default_watchdog_timeout() -> u32 {
    50
}
fn default_driver_fault_estop_count() -> u32 {
    3
}
fn default_analog_staleness() -> u32 {
    100
}
fn default_supply_voltage() -> LimitBand {
    LimitBand {
        hard_min: 18.0,
        soft_min: 20.0,
        soft_max: 28.0,
        hard_max: 30.0,
    }
}

impl SafetyConfig {
    pub const WARNING_TIMEOUT_MS_MIN: u32 = 10;
    pub const WARNING_TIMEOUT_MS_MAX: u32 = 60_000;
    pub const WARNING_SPEED_SCALE_MIN: f64 = 0.05;
    pub const DUAL_CHANNEL_SAMPLES_MAX: u32 = 1000;
    pub const ESTOP_LATENCY_US_MIN: u32 = 100;
    pub const ESTOP_LATENCY_US_MAX: u32 = 100_000;
    pub const WATCHDOG_TIMEOUT_MS_MIN: u32 = 2;
    pub const WATCHDOG_TIMEOUT_MS_MAX: u32 = 10_000;
    pub const ANALOG_STALENESS_MS_MAX: u32 = 60_000;

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_range(
            "safety.warning_timeout_ms",
            f64::from(self.warning_timeout_ms),
            f64::from(Self::WARNING_TIMEOUT_MS_MIN),
            f64::from(Self::WARNING_TIMEOUT_MS_MAX),
        )?;
        ConfigurationError::check_range(
            "safety.warning_speed_scale",
            self.warning_speed_scale,
            Self::WARNING_SPEED_SCALE_MIN,
            1.0,
        )?;
        ConfigurationError::check_range(
            "safety.dual_channel_samples",
            f64::from(self.dual_channel_samples),
            1.0,
            f64::from(Self::DUAL_CHANNEL_SAMPLES_MAX),
        )?;
        ConfigurationError::check_range(
            "safety.estop_latency_bound_us",
            f64::from(self.estop_latency_bound_us),
            f64::from(Self::ESTOP_LATENCY_US_MIN),
            f64::from(Self::ESTOP_LATENCY_US_MAX),
        )?;
        ConfigurationError::check_range(
            "safety.watchdog_timeout_ms",
            f64::from(self.watchdog_timeout_ms),
            f64::from(Self::WATCHDOG_TIMEOUT_MS_MIN),
            f64::from(Self::WATCHDOG_TIMEOUT_MS_MAX),
        )?;
        ConfigurationError::check_range(
            "safety.driver_fault_estop_count",
            f64::from(self.driver_fault_estop_count),
            1.0,
            100.0,
        )?;
        ConfigurationError::check_range(
            "safety.analog_staleness_ms",
            f64::from(self.analog_staleness_ms),
            1.0,
            f64::from(Self::ANALOG_STALENESS_MS_MAX),
        )?;
        self.supply_voltage.validate("safety.supply_voltage")
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            warning_timeout_ms: default_warning_timeout(),
            warning_speed_scale: default_warning_speed_scale(),
            dual_channel_samples: default_dual_channel_samples(),
            estop_latency_bound_us: default_estop_latency(),
            watchdog_timeout_ms: default_watchdog_timeout(),
            driver_fault_estop_count: default_driver_fault_estop_count(),
            analog_staleness_ms: default_analog_staleness(),
            supply_voltage: default_supply_voltage(),
        }
    }
}

// ─── Axis ───────────────────────────────────────────────────────────

/// PID and feedforward gains.
///
/// The controller output is a velocity command [units/s]:
/// `Kp·e + Ki·∫e + Kd·ė_filtered + Kvff·v_ref + Kaff·a_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain [1/s].
    pub kp: f64,
    /// Integral gain [1/s²].
    #[serde(default)]
    pub ki: f64,
    /// Derivative gain [-].
    #[serde(default)]
    pub kd: f64,
    /// Derivative low-pass time constant [s]; 0 = unfiltered.
    #[serde(default)]
    pub tf: f64,
    /// Velocity feedforward gain [-] (default: 1.0).
    #[serde(default = "default_kvff")]
    pub kvff: f64,
    /// Acceleration feedforward gain [s].
    #[serde(default)]
    pub kaff: f64,
    /// Integral output limit [units/s]; 0 = bounded only by saturation.
    #[serde(default)]
    pub integral_limit: f64,
}

fn default_kvff() -> f64 {
    1.0
}

impl PidGains {
    pub const KP_MAX: f64 = 10_000.0;
    pub const KI_MAX: f64 = 100_000.0;
    pub const KD_MAX: f64 = 100.0;
    pub const TF_MAX: f64 = 1.0;
    pub const FF_MAX: f64 = 10.0;

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_range("gains.kp", self.kp, 0.0, Self::KP_MAX)?;
        ConfigurationError::check_range("gains.ki", self.ki, 0.0, Self::KI_MAX)?;
        ConfigurationError::check_range("gains.kd", self.kd, 0.0, Self::KD_MAX)?;
        ConfigurationError::check_range("gains.tf", self.tf, 0.0, Self::TF_MAX)?;
        ConfigurationError::check_range("gains.kvff", self.kvff, 0.0, Self::FF_MAX)?;
        ConfigurationError::check_range("gains.kaff", self.kaff, 0.0, Self::FF_MAX)?;
        ConfigurationError::check_range("gains.integral_limit", self.integral_limit, 0.0, f64::MAX)
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 40.0,
            ki: 0.0,
            kd: 0.0,
            tf: 0.0,
            kvff: 1.0,
            kaff: 0.0,
            integral_limit: 0.0,
        }
    }
}

/// Bounds of the step-response identification test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutotuneConfig {
    /// Step amplitude of the velocity command [units/s].
    pub step_velocity: f64,
    /// Abort when the test runs longer than this [s].
    pub max_duration_s: f64,
    /// Abort when the axis travels further than this [units].
    pub max_travel: f64,
    /// Desired closed-loop time constant as a multiple of the dead time (SIMC `τc/θ`).
    pub closed_loop_ratio: f64,
}

impl AutotuneConfig {
    /// Validate parameter bounds against the axis limits.
    pub fn validate(&self, max_velocity: f64) -> Result<(), ConfigurationError> {
        ConfigurationError::check_range("autotune.step_velocity", self.step_velocity, f64::MIN_POSITIVE, max_velocity)?;
        ConfigurationError::check_range("autotune.max_duration_s", self.max_duration_s, 0.01, 60.0)?;
        ConfigurationError::check_range("autotune.max_travel", self.max_travel, f64::MIN_POSITIVE, f64::MAX)?;
        ConfigurationError::check_range("autotune.closed_loop_ratio", self.closed_loop_ratio, 0.1, 100.0)
    }
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            step_velocity: 5.0,
            max_duration_s: 2.0,
            max_travel: 20.0,
            closed_loop_ratio: 1.0,
        }
    }
}

/// Per-axis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Human-readable name (e.g., "X", "Turntable").
    pub name: String,
    /// Physical position on the driver chain (0 = nearest the controller).
    pub chain_position: u8,
    /// Microsteps per user unit.
    pub steps_per_unit: f64,
    /// Invert motor direction (GCONF shaft bit).
    #[serde(default)]
    pub invert_direction: bool,
    /// Rotary period [units]; enables shortest-path wrap-around when set.
    #[serde(default)]
    pub wrap_period: Option<f64>,

    /// Velocity limit [units/s].
    pub max_velocity: f64,
    /// Acceleration limit [units/s²].
    pub max_acceleration: f64,
    /// Jerk limit [units/s³].
    pub max_jerk: f64,
    /// Profile used when a command does not name one.
    #[serde(default)]
    pub default_profile: ProfileKind,

    /// Position band [units]. Required unless the axis wraps.
    #[serde(default)]
    pub position_limits: Option<LimitBand>,
    /// Measured speed thresholds [units/s].
    pub speed: Threshold,
    /// Phase current thresholds [A].
    pub current: Threshold,
    /// Temperature thresholds [°C].
    #[serde(default = "default_temperature")]
    pub temperature: Threshold,

    /// Driver current at IRUN = 31 [A] (default: 2.0).
    #[serde(default = "default_full_scale_current")]
    pub full_scale_current: f64,
    /// Requested run current [A].
    #[serde(default = "default_run_current")]
    pub run_current: f64,
    /// Requested hold current [A].
    #[serde(default = "default_hold_current")]
    pub hold_current: f64,
    /// Safe current bound; output is clamped to this before transmission [A].
    #[serde(default = "default_current_limit")]
    pub current_limit: f64,

    /// Controller gains.
    #[serde(default)]
    pub gains: PidGains,
    /// Maximum sample age accepted as fresh [µs] (default: 2000).
    #[serde(default = "default_sensor_staleness")]
    pub sensor_staleness_us: u32,
    /// Maximum model-prediction horizon before the sensor counts as lost [µs] (default: 10000).
    #[serde(default = "default_max_prediction")]
    pub max_prediction_us: u32,
    /// Redundant channel tolerance [units] (default: 0.5).
    #[serde(default = "default_dual_channel_tolerance")]
    pub dual_channel_tolerance: f64,
    /// Auto-tune test bounds.
    #[serde(default)]
    pub autotune: AutotuneConfig,
}

fn default_temperature() -> Threshold {
    Threshold {
        soft: 80.0,
        hard: 100.0,
    }
}
fn default_full_scale_current() -> f64 {
    2.0
}
fn default_run_current() -> f64 {
    1.2
}
fn default_hold_current() -> f64 {
    0.5
}
fn default_current_limit() -> f64 {
    1.5
}
fn default_sensor_staleness() -> u32 {
    2000
}
fn default_max_prediction() -> u32 {
    10_000
}
fn default_dual_channel_tolerance() -> f64 {
    0.5
}

impl AxisConfig {
    pub const STEPS_PER_UNIT_MAX: f64 = 1.0e6;
    pub const FULL_SCALE_CURRENT_MAX: f64 = 10.0;

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.is_empty() {
            return Err(ConfigurationError::Invalid {
                field: "axes.name",
                reason: "must not be empty",
            });
        }
        ConfigurationError::check_range(
            "axes.chain_position",
            f64::from(self.chain_position),
            0.0,
            (MAX_AXES - 1) as f64,
        )?;
        ConfigurationError::check_range("axes.steps_per_unit", self.steps_per_unit, f64::MIN_POSITIVE, Self::STEPS_PER_UNIT_MAX)?;
        if let Some(period) = self.wrap_period {
            ConfigurationError::check_range("axes.wrap_period", period, f64::MIN_POSITIVE, f64::MAX)?;
        }
        ConfigurationError::check_range("axes.max_velocity", self.max_velocity, f64::MIN_POSITIVE, f64::MAX)?;
        ConfigurationError::check_range("axes.max_acceleration", self.max_acceleration, f64::MIN_POSITIVE, f64::MAX)?;
        ConfigurationError::check_range("axes.max_jerk", self.max_jerk, f64::MIN_POSITIVE, f64::MAX)?;

        match (&self.position_limits, self.wrap_period) {
            (Some(band), _) => band.validate("axes.position_limits")?,
            (None, Some(_)) => {}
            (None, None) => {
                return Err(ConfigurationError::Invalid {
                    field: "axes.position_limits",
                    reason: "required for non-wrapping axes",
                });
            }
        }
        self.speed.validate("axes.speed")?;
        self.current.validate("axes.current")?;
        self.temperature.validate("axes.temperature")?;

        ConfigurationError::check_range(
            "axes.full_scale_current",
            self.full_scale_current,
            f64::MIN_POSITIVE,
            Self::FULL_SCALE_CURRENT_MAX,
        )?;
        ConfigurationError::check_range("axes.current_limit", self.current_limit, f64::MIN_POSITIVE, self.full_scale_current)?;
        ConfigurationError::check_range("axes.run_current", self.run_current, 0.0, self.current_limit)?;
        ConfigurationError::check_range("axes.hold_current", self.hold_current, 0.0, self.run_current)?;

        self.gains.validate()?;
        ConfigurationError::check_range("axes.sensor_staleness_us", f64::from(self.sensor_staleness_us), 1.0, 1.0e6)?;
        ConfigurationError::check_range(
            "axes.max_prediction_us",
            f64::from(self.max_prediction_us),
            f64::from(self.sensor_staleness_us),
            1.0e7,
        )?;
        ConfigurationError::check_range("axes.dual_channel_tolerance", self.dual_channel_tolerance, 0.0, f64::MAX)?;
        self.autotune.validate(self.max_velocity)
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            name: "X".to_string(),
            chain_position: 0,
            steps_per_unit: 1600.0,
            invert_direction: false,
            wrap_period: None,
            max_velocity: 50.0,
            max_acceleration: 500.0,
            max_jerk: 10_000.0,
            default_profile: ProfileKind::Trapezoidal,
            position_limits: Some(LimitBand {
                hard_min: -5.0,
                soft_min: 0.0,
                soft_max: 300.0,
                hard_max: 305.0,
            }),
            speed: Threshold {
                soft: 55.0,
                hard: 65.0,
            },
            current: Threshold {
                soft: 1.6,
                hard: 1.9,
            },
            temperature: default_temperature(),
            full_scale_current: default_full_scale_current(),
            run_current: default_run_current(),
            hold_current: default_hold_current(),
            current_limit: default_current_limit(),
            gains: PidGains::default(),
            sensor_staleness_us: default_sensor_staleness(),
            max_prediction_us: default_max_prediction(),
            dual_channel_tolerance: default_dual_channel_tolerance(),
            autotune: AutotuneConfig::default(),
        }
    }
}

// ─── Machine ────────────────────────────────────────────────────────

/// Complete configuration supplied to the core at init. Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Logging and identification.
    pub shared: SharedConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Axes in index order; `AxisId` is the index into this list.
    pub axes: Vec<AxisConfig>,
}

impl MachineConfig {
    /// Build a configuration from parts with default scheduler, chain and safety settings.
    pub fn with_axes(service_name: &str, axes: Vec<AxisConfig>) -> Self {
        Self {
            shared: SharedConfig {
                log_level: Default::default(),
                service_name: service_name.to_string(),
            },
            scheduler: SchedulerConfig::default(),
            chain: ChainConfig::default(),
            safety: SafetyConfig::default(),
            axes,
        }
    }

    /// Validate the whole configuration.
    ///
    /// Chain positions must be unique and dense (`0..axes.len()`), since
    /// every bus frame carries exactly one datagram per device.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.scheduler.validate()?;
        self.chain.validate()?;
        self.safety.validate()?;
        if self.axes.is_empty() || self.axes.len() > MAX_AXES {
            return Err(ConfigurationError::OutOfRange {
                field: "axes",
                value: self.axes.len() as f64,
                min: 1.0,
                max: MAX_AXES as f64,
            });
        }
        let mut seen = [false; MAX_AXES];
        let vactual_max = f64::from(vactual::VALUE.signed_range().1);
        let vactual_scale = f64::from(1u32 << vactual::SCALE_BITS) / self.chain.clock();
        for axis in &self.axes {
            axis.validate()?;
            // The hard speed threshold must still be encodable.
            let code = axis.speed.hard * axis.steps_per_unit * vactual_scale;
            if code > vactual_max {
                return Err(ConfigurationError::OutOfRange {
                    field: "axes.speed.hard",
                    value: axis.speed.hard,
                    min: 0.0,
                    max: vactual_max / (axis.steps_per_unit * vactual_scale),
                });
            }
            let pos = usize::from(axis.chain_position);
            if pos >= self.axes.len() || seen[pos] {
                return Err(ConfigurationError::Invalid {
                    field: "axes.chain_position",
                    reason: "chain positions must be unique and cover 0..axis count",
                });
            }
            seen[pos] = true;
        }
        Ok(())
    }

    /// Load from TOML and validate; the config is rejected as a whole on any error.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.shared.validate()?;
        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }

    /// Number of configured axes.
    #[inline]
    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }
}
