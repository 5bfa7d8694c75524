//! Per-axis closed-loop controller.
//!
//! Pipeline per tick:
//! 1. Fuse: fresh sample, model prediction, or lost
//! 2. Error: `target − fused` (shortest path on wrapping axes)
//! 3. PID + feedforward
//! 4. Clamp to `max_velocity × speed_scale`
//! 5. Convert to a driver velocity command
//!
//! The controller owns its [`AxisState`]; everything else sees copies.

use tracing::{info, warn};

use motus_common::motion::config::{AxisConfig, PidGains};
use motus_common::motion::error::{AxisFaultFlags, ConfigurationError};
use motus_common::motion::state::{AxisId, ThresholdLevel};
use motus_common::motion::telemetry::AxisSnapshot;

use super::angle::wrap_error;
use super::autotune::{StepResponseTuner, TuneAbort, TuneResult, TuneStatus};
use super::feedforward::{FeedforwardGains, feedforward_compute};
use super::fusion::{FusedMeasurement, SampleQuality, SensorFusion};
use super::output::{clamp_velocity, to_microsteps};
use super::pid::{PidState, Saturation, pid_compute};
use crate::planner::segment::Kinematics;
use crate::protocol::DriverCommand;

// ─── AxisState ──────────────────────────────────────────────────────

/// Live state of one axis. Mutated only by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisState {
    pub id: AxisId,
    pub commanded_position: f64,
    pub commanded_velocity: f64,
    pub measured_position: f64,
    pub measured_velocity: f64,
    /// Velocity sent to the driver this tick [units/s].
    pub output_velocity: f64,
    pub faults: AxisFaultFlags,
    /// Age of the last good sample [µs].
    pub sample_age_us: u64,
    pub saturated: bool,
}

/// Result of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisOutput {
    /// Clamped velocity [units/s].
    pub velocity: f64,
    /// Command for the driver.
    pub command: DriverCommand,
    /// A running auto-tune finished this tick.
    pub tune_finished: bool,
}

// ─── AxisController ─────────────────────────────────────────────────

/// Closed-loop controller for one axis.
#[derive(Debug, Clone)]
pub struct AxisController {
    config: AxisConfig,
    gains: PidGains,
    pid: PidState,
    fusion: SensorFusion,
    state: AxisState,
    saturation: Saturation,
    tick_s: f64,
    /// Tick of the previous [`AxisController::update`].
    last_update_us: Option<u64>,
    tuner: Option<StepResponseTuner>,
    proposed: Option<TuneResult>,
    /// The hold position came from a real sample.
    anchored: bool,
}

impl AxisController {
    /// Build a controller for a validated axis configuration.
    pub fn new(id: AxisId, config: &AxisConfig, tick_s: f64, now_us: u64) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            gains: config.gains,
            pid: PidState::default(),
            fusion: SensorFusion::new(
                config.sensor_staleness_us,
                config.max_prediction_us,
                config.wrap_period,
                now_us,
            ),
            state: AxisState {
                id,
                ..Default::default()
            },
            saturation: Saturation::None,
            tick_s,
            last_update_us: None,
            tuner: None,
            proposed: None,
            anchored: false,
        })
    }

    #[inline]
    pub fn id(&self) -> AxisId {
        self.state.id
    }

    #[inline]
    pub fn config(&self) -> &AxisConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> &AxisState {
        &self.state
    }

    #[inline]
    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    /// Feed a primary sensor sample.
    #[inline]
    pub fn ingest_sample(&mut self, position: f64, tick_us: u64) {
        self.fusion.ingest(position, tick_us);
    }

    /// Fused measurement at `now_us` without advancing the controller.
    #[inline]
    pub fn measurement(&self, now_us: u64) -> FusedMeasurement {
        self.fusion.fuse(now_us)
    }

    /// Align the commanded position with the measurement (used at startup
    /// and after an emergency reset so the axis holds where it stands).
    pub fn hold_here(&mut self, now_us: u64) {
        let m = self.fusion.fuse(now_us);
        self.state.commanded_position = m.position;
        self.state.commanded_velocity = 0.0;
        self.pid.reset();
        self.saturation = Saturation::None;
        self.anchored = m.quality != SampleQuality::Lost;
    }

    pub fn set_fault(&mut self, flag: AxisFaultFlags, on: bool) {
        self.state.faults.set(flag, on);
    }

    #[inline]
    pub fn is_forced_stop(&self) -> bool {
        self.state.faults.contains(AxisFaultFlags::FORCED_STOP)
    }

    /// Immediate local stop after a destructive driver fault.
    ///
    /// Latched until [`AxisController::clear_forced_stop`].
    pub fn force_stop(&mut self) {
        if !self.is_forced_stop() {
            warn!(axis = self.state.id, "axis force-stopped");
        }
        self.state.faults.insert(AxisFaultFlags::FORCED_STOP);
        self.abort_autotune();
        self.pid.reset();
    }

    pub fn clear_forced_stop(&mut self) {
        self.state.faults.remove(AxisFaultFlags::FORCED_STOP | AxisFaultFlags::DRIVER_FAULT);
    }

    /// Run one control tick.
    ///
    /// `setpoint` is the planner sample for this tick, or `None` to hold the
    /// last commanded position. `speed_scale` comes from the safety verdict.
    ///
    /// The PID step is the measured time since the previous update; the
    /// first update uses the nominal tick. A repeated `now_us` gives a zero
    /// step, which freezes the derivative and integral terms.
    pub fn update(&mut self, now_us: u64, setpoint: Option<Kinematics>, speed_scale: f64) -> AxisOutput {
        let dt = self.elapsed_s(now_us);
        let m = self.fusion.fuse(now_us);
        self.state.measured_position = m.position;
        self.state.measured_velocity = m.velocity;
        self.state.sample_age_us = m.age_us;
        self.state.faults.set(AxisFaultFlags::SENSOR_PREDICTED, m.quality == SampleQuality::Predicted);
        self.state.faults.set(AxisFaultFlags::SENSOR_LOST, m.quality == SampleQuality::Lost);
        self.update_limit_flags();
        if !self.anchored && setpoint.is_none() && m.quality != SampleQuality::Lost {
            // Held before the first sample arrived: hold where the axis is.
            self.state.commanded_position = m.position;
            self.anchored = true;
        }

        let mut tune_finished = false;
        let raw = if self.is_forced_stop() || m.quality == SampleQuality::Lost {
            self.pid.reset();
            self.abort_autotune();
            None
        } else if let Some(tuner) = self.tuner.as_mut() {
            let cmd = tuner.command();
            match tuner.update(now_us, m.position, m.velocity) {
                TuneStatus::Running => Some(cmd),
                TuneStatus::Completed(result) => {
                    info!(axis = self.state.id, model = ?result.model, gains = ?result.gains, "auto-tune completed");
                    self.proposed = Some(result);
                    self.finish_autotune(now_us);
                    tune_finished = true;
                    None
                }
                TuneStatus::Aborted(reason) => {
                    warn!(axis = self.state.id, ?reason, "auto-tune aborted");
                    self.finish_autotune(now_us);
                    tune_finished = true;
                    None
                }
            }
        } else {
            let sp = setpoint.unwrap_or(Kinematics {
                position: self.state.commanded_position,
                velocity: 0.0,
                acceleration: 0.0,
            });
            self.state.commanded_position = sp.position;
            self.state.commanded_velocity = sp.velocity;
            let error = wrap_error(sp.position, m.position, self.config.wrap_period);
            let pid_out = pid_compute(&mut self.pid, &self.gains, error, dt, self.saturation);
            let ff_out = feedforward_compute(&FeedforwardGains::from(&self.gains), sp.velocity, sp.acceleration);
            Some(pid_out + ff_out)
        };

        let (velocity, saturation) = match raw {
            Some(v) => clamp_velocity(v, self.config.max_velocity * speed_scale.clamp(0.0, 1.0)),
            None => (0.0, Saturation::None),
        };
        self.saturation = saturation;
        self.state.saturated = saturation.is_saturated();
        self.state.faults.set(AxisFaultFlags::OUTPUT_SATURATED, self.state.saturated);
        self.state.output_velocity = velocity;

        let command = if raw.is_none() {
            DriverCommand::Stop
        } else {
            DriverCommand::Velocity(to_microsteps(velocity, self.config.steps_per_unit))
        };
        AxisOutput {
            velocity,
            command,
            tune_finished,
        }
    }

    fn elapsed_s(&mut self, now_us: u64) -> f64 {
        let dt = match self.last_update_us {
            Some(last) => now_us.saturating_sub(last) as f64 * 1e-6,
            None => self.tick_s,
        };
        self.last_update_us = Some(now_us);
        dt
    }

    fn update_limit_flags(&mut self) {
        let level = self
            .config
            .position_limits
            .map(|band| band.classify(self.state.measured_position))
            .unwrap_or(ThresholdLevel::Normal);
        self.state.faults.set(AxisFaultFlags::SOFT_LIMIT, level == ThresholdLevel::Soft);
        self.state.faults.set(AxisFaultFlags::HARD_LIMIT, level == ThresholdLevel::Hard);
    }

    // ─── Auto-tune ──────────────────────────────────────────────────

    #[inline]
    pub fn is_tuning(&self) -> bool {
        self.tuner.is_some()
    }

    /// Proposal of the last completed test.
    #[inline]
    pub fn proposed_gains(&self) -> Option<&TuneResult> {
        self.proposed.as_ref()
    }

    /// Start the step-response test. The axis must be idle.
    pub fn start_autotune(&mut self, now_us: u64, segment_active: bool) -> Result<(), ConfigurationError> {
        if segment_active || self.tuner.is_some() || self.is_forced_stop() {
            return Err(ConfigurationError::Invalid {
                field: "autotune",
                reason: "axis must be idle",
            });
        }
        let m = self.fusion.fuse(now_us);
        if m.quality == SampleQuality::Lost {
            return Err(ConfigurationError::Invalid {
                field: "autotune",
                reason: "no sensor feedback",
            });
        }
        self.tuner = Some(StepResponseTuner::new(
            &self.config.autotune,
            self.gains,
            m.position,
            now_us,
            self.tick_s,
        )?);
        self.pid.reset();
        info!(axis = self.state.id, "auto-tune started");
        Ok(())
    }

    /// Stop a running test (safety event or operator stop).
    pub fn abort_autotune(&mut self) {
        if self.tuner.take().is_some() {
            warn!(axis = self.state.id, reason = ?TuneAbort::Interrupted, "auto-tune aborted");
        }
    }

    fn finish_autotune(&mut self, now_us: u64) {
        self.tuner = None;
        self.hold_here(now_us);
    }

    /// Replace the active gains with the last proposal.
    ///
    /// Refused while a segment or a test is running, and when no proposal
    /// exists. The proposal is consumed.
    pub fn apply_proposed_gains(&mut self, segment_active: bool) -> Result<PidGains, ConfigurationError> {
        if segment_active || self.tuner.is_some() {
            return Err(ConfigurationError::Invalid {
                field: "gains",
                reason: "axis must be idle to change gains",
            });
        }
        let Some(result) = self.proposed else {
            return Err(ConfigurationError::Invalid {
                field: "gains",
                reason: "no proposed gains",
            });
        };
        result.gains.validate()?;
        self.gains = result.gains;
        self.proposed = None;
        self.pid.reset();
        info!(axis = self.state.id, gains = ?self.gains, "tuned gains applied");
        Ok(self.gains)
    }

    /// Read-only copy for telemetry.
    pub fn snapshot(&self, segment_active: bool) -> AxisSnapshot {
        AxisSnapshot {
            axis: self.state.id,
            commanded_position: self.state.commanded_position,
            commanded_velocity: self.state.commanded_velocity,
            measured_position: self.state.measured_position,
            measured_velocity: self.state.measured_velocity,
            output_velocity: self.state.output_velocity,
            fault_bits: self.state.faults.bits(),
            sample_age_us: self.state.sample_age_us,
            saturated: self.state.saturated,
            segment_active,
        }
    }
}
