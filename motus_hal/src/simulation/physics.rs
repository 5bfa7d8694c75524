//! Motor plant model.
//!
//! Each axis follows its driver's commanded velocity through a first-order
//! lag. Sensor readings (angle, redundant angle, current, temperature) are
//! derived from the plant state plus injected offsets.

use motus_common::motion::config::AxisConfig;

/// Default mechanical time constant [s].
pub const DEFAULT_TIME_CONSTANT_S: f64 = 0.002;

/// Ambient temperature reported by an unloaded motor [°C].
const AMBIENT_C: f64 = 25.0;

/// Simulated axis.
#[derive(Debug, Clone)]
pub struct AxisPlant {
    steps_per_unit: f64,
    wrap_period: Option<f64>,
    wiring_inverted: bool,
    run_current: f64,
    hold_current: f64,
    time_constant_s: f64,
    position: f64,
    velocity: f64,
    /// Fault injection.
    pub current_offset: f64,
    /// Fault injection.
    pub temperature_offset: f64,
    /// Offset added to the redundant channel only.
    pub redundant_offset: f64,
    /// Primary sensor stops producing samples.
    pub sensor_lost: bool,
    /// Redundant sensor stops producing samples.
    pub redundant_lost: bool,
    /// Current and temperature sensors stop producing samples.
    pub analog_lost: bool,
}

impl AxisPlant {
    /// Plant at rest at position zero.
    ///
    /// The motor wiring is taken as reversed when the axis is configured
    /// with `invert_direction`, so a correctly configured driver moves the
    /// axis in the commanded direction.
    pub fn new(config: &AxisConfig) -> Self {
        Self {
            steps_per_unit: config.steps_per_unit,
            wrap_period: config.wrap_period,
            wiring_inverted: config.invert_direction,
            run_current: config.run_current,
            hold_current: config.hold_current,
            time_constant_s: DEFAULT_TIME_CONSTANT_S,
            position: 0.0,
            velocity: 0.0,
            current_offset: 0.0,
            temperature_offset: 0.0,
            redundant_offset: 0.0,
            sensor_lost: false,
            redundant_lost: false,
            analog_lost: false,
        }
    }

    /// Integrate over `dt_s` toward the driver velocity [µsteps/s].
    pub fn step(&mut self, driver_usteps_per_s: f64, enabled: bool, dt_s: f64) {
        if dt_s <= 0.0 {
            return;
        }
        let mut target = if enabled {
            driver_usteps_per_s / self.steps_per_unit
        } else {
            0.0
        };
        if self.wiring_inverted {
            target = -target;
        }
        let alpha = 1.0 - (-dt_s / self.time_constant_s).exp();
        let v0 = self.velocity;
        self.velocity += (target - v0) * alpha;
        self.position += 0.5 * (v0 + self.velocity) * dt_s;
    }

    /// Unwrapped position [units].
    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Velocity [units/s].
    #[inline]
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Teleport the axis (test setup).
    pub fn set_position(&mut self, position: f64) {
        self.position = position;
        self.velocity = 0.0;
    }

    /// Mechanical time constant [s].
    pub fn set_time_constant(&mut self, seconds: f64) {
        self.time_constant_s = seconds.max(1e-6);
    }

    /// Angle reported by the primary sensor, wrapped on rotary axes.
    pub fn angle(&self) -> f64 {
        match self.wrap_period {
            Some(period) => self.position.rem_euclid(period),
            None => self.position,
        }
    }

    /// Angle reported by the redundant sensor.
    pub fn redundant_angle(&self) -> f64 {
        let raw = self.position + self.redundant_offset;
        match self.wrap_period {
            Some(period) => raw.rem_euclid(period),
            None => raw,
        }
    }

    /// Phase current [A]: run current while moving, hold current at rest.
    pub fn current(&self) -> f64 {
        let base = if self.velocity.abs() > 1e-6 {
            self.run_current
        } else {
            self.hold_current
        };
        base + self.current_offset
    }

    /// Motor temperature [°C].
    pub fn temperature(&self) -> f64 {
        AMBIENT_C + self.temperature_offset
    }
}
