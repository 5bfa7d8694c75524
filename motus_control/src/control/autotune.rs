//! Step-response identification and gain proposal.
//!
//! The tuner drives the axis open-loop with a bounded velocity step and
//! records the measured velocity. From the response it estimates:
//!
//! - process gain `K = v_ss / u`
//! - time constant `τ` and dead time `θ` (two-point method, 28.3 % / 63.2 %)
//! - damping `ζ` from the overshoot, `1.0` when there is none
//!
//! Gains are proposed with SIMC rules for the integrating position plant
//! `K·e^{−θs} / (s(τs + 1))` and converted to parallel form. The proposal
//! is stored; applying it is a separate explicit operation.

use heapless::Vec as HVec;

use motus_common::motion::config::{AutotuneConfig, PidGains};
use motus_common::motion::error::ConfigurationError;

/// Stored response samples.
pub const TUNE_SAMPLES: usize = 256;

/// Why a test ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneAbort {
    /// Travel bound reached before the response could be identified.
    Travel,
    /// The axis did not respond to the step.
    NoResponse,
    /// Stopped by a safety event or an operator command.
    Interrupted,
}

/// Identified first-order-plus-dead-time velocity model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessModel {
    /// Process gain [-].
    pub gain: f64,
    /// Time constant [s].
    pub time_constant: f64,
    /// Dead time [s].
    pub dead_time: f64,
    /// Damping ratio [-].
    pub damping: f64,
}

/// Completed identification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    pub model: ProcessModel,
    pub gains: PidGains,
}

/// Progress of a running test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuneStatus {
    Running,
    Completed(TuneResult),
    Aborted(TuneAbort),
}

/// Bounded step-response test.
#[derive(Debug, Clone)]
pub struct StepResponseTuner {
    config: AutotuneConfig,
    base_gains: PidGains,
    start_position: f64,
    start_us: u64,
    decimation: u32,
    counter: u32,
    /// (time since start [s], measured velocity [units/s])
    samples: HVec<(f64, f64), TUNE_SAMPLES>,
}

impl StepResponseTuner {
    /// Start a test at `start_position`. `tick_s` sets the sample decimation.
    pub fn new(
        config: &AutotuneConfig,
        base_gains: PidGains,
        start_position: f64,
        start_us: u64,
        tick_s: f64,
    ) -> Result<Self, ConfigurationError> {
        ConfigurationError::check_range("tick_s", tick_s, 1.0e-6, 1.0)?;
        let ticks = (config.max_duration_s / tick_s).ceil();
        let decimation = (ticks / TUNE_SAMPLES as f64).ceil().max(1.0) as u32;
        Ok(Self {
            config: *config,
            base_gains,
            start_position,
            start_us,
            decimation,
            counter: 0,
            samples: HVec::new(),
        })
    }

    /// Velocity command for the step [units/s].
    #[inline]
    pub fn command(&self) -> f64 {
        self.config.step_velocity
    }

    /// Record one measurement and decide whether the test is over.
    pub fn update(&mut self, now_us: u64, position: f64, velocity: f64) -> TuneStatus {
        let t = now_us.saturating_sub(self.start_us) as f64 * 1e-6;
        if self.counter % self.decimation == 0 {
            let _ = self.samples.push((t, velocity));
        }
        self.counter = self.counter.wrapping_add(1);

        let travel_exceeded = (position - self.start_position).abs() >= self.config.max_travel;
        if !(travel_exceeded || t >= self.config.max_duration_s || self.samples.is_full()) {
            return TuneStatus::Running;
        }
        match self.identify() {
            Some(result) => TuneStatus::Completed(result),
            None if travel_exceeded => TuneStatus::Aborted(TuneAbort::Travel),
            None => TuneStatus::Aborted(TuneAbort::NoResponse),
        }
    }

    /// Estimate the process model from the recorded samples.
    pub fn identify(&self) -> Option<TuneResult> {
        let u = self.config.step_velocity;
        let n = self.samples.len();
        if n < 10 || u == 0.0 {
            return None;
        }
        let tail = (n / 10).max(1);
        let y_ss = self.samples[n - tail..].iter().map(|s| s.1).sum::<f64>() / tail as f64;
        if !(y_ss / u > 1.0e-3) {
            return None;
        }
        let gain = y_ss / u;

        let t28 = self.crossing(0.283 * y_ss)?;
        let t63 = self.crossing(0.632 * y_ss)?;
        let time_constant = (1.5 * (t63 - t28)).max(0.0);
        let dead_time = (t63 - time_constant).max(0.0);

        let peak = self.samples.iter().map(|s| s.1).fold(f64::MIN, f64::max);
        let overshoot = (peak - y_ss) / y_ss;
        let damping = if overshoot > 0.005 {
            let l = overshoot.ln();
            -l / (std::f64::consts::PI.powi(2) + l * l).sqrt()
        } else {
            1.0
        };

        let model = ProcessModel {
            gain,
            time_constant,
            dead_time,
            damping,
        };
        Some(TuneResult {
            model,
            gains: self.propose(&model),
        })
    }

    /// First time the response reaches `level`, linearly interpolated.
    fn crossing(&self, level: f64) -> Option<f64> {
        let mut prev = (0.0, 0.0);
        for &(t, y) in &self.samples {
            if y >= level {
                if y == prev.1 {
                    return Some(t);
                }
                return Some(prev.0 + (level - prev.1) * (t - prev.0) / (y - prev.1));
            }
            prev = (t, y);
        }
        None
    }

    /// SIMC gains for the integrating-plus-lag position loop.
    fn propose(&self, model: &ProcessModel) -> PidGains {
        let theta = model.dead_time;
        let tau_c = (self.config.closed_loop_ratio * theta).max(model.time_constant).max(1.0e-3);
        // Series form.
        let kc = 1.0 / (model.gain * (tau_c + theta));
        let ti = 4.0 * (tau_c + theta);
        let td = model.time_constant;
        // Parallel form.
        let factor = 1.0 + td / ti;
        let kp = (kc * factor).min(PidGains::KP_MAX);
        let ti_p = ti + td;
        let td_p = ti * td / ti_p;
        PidGains {
            kp,
            ki: (kp / ti_p).min(PidGains::KI_MAX),
            kd: (kp * td_p).min(PidGains::KD_MAX),
            tf: (td_p / 10.0).min(PidGains::TF_MAX),
            ..self.base_gains
        }
    }
}
