//! Sensor fusion: fresh sample, model prediction, or lost.
//!
//! The latest sample is used while its age is within the staleness bound.
//! Beyond that the state is extrapolated from the last known position and
//! velocity, up to the prediction horizon. Past the horizon the measurement
//! is reported as lost; an old sample is never silently reused.

use super::angle::{wrap_error, wrap_position};

/// Smoothing factor of the finite-difference velocity estimate.
const VELOCITY_SMOOTHING: f64 = 0.5;

/// How the fused measurement was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleQuality {
    /// Latest sample within the staleness bound.
    Fresh,
    /// Extrapolated from the last known state.
    Predicted,
    /// No usable sample within the prediction horizon.
    #[default]
    Lost,
}

/// Fused position/velocity estimate for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FusedMeasurement {
    /// Position [units].
    pub position: f64,
    /// Velocity [units/s].
    pub velocity: f64,
    /// Age of the underlying sample [µs].
    pub age_us: u64,
    pub quality: SampleQuality,
}

/// Per-axis fusion state.
#[derive(Debug, Clone)]
pub struct SensorFusion {
    position: f64,
    velocity: f64,
    last_sample_us: Option<u64>,
    /// Reference for the age before the first sample arrives.
    since_us: u64,
    staleness_us: u64,
    max_prediction_us: u64,
    wrap_period: Option<f64>,
}

impl SensorFusion {
    pub fn new(staleness_us: u32, max_prediction_us: u32, wrap_period: Option<f64>, now_us: u64) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            last_sample_us: None,
            since_us: now_us,
            staleness_us: u64::from(staleness_us),
            max_prediction_us: u64::from(max_prediction_us),
            wrap_period,
        }
    }

    /// Feed one sample. Out-of-order samples are ignored.
    pub fn ingest(&mut self, position: f64, tick_us: u64) {
        if !position.is_finite() {
            return;
        }
        match self.last_sample_us {
            Some(last) if tick_us <= last => {}
            Some(last) => {
                let dt = (tick_us - last) as f64 * 1e-6;
                let raw = wrap_error(position, self.position, self.wrap_period) / dt;
                self.velocity += VELOCITY_SMOOTHING * (raw - self.velocity);
                self.position = wrap_position(position, self.wrap_period);
                self.last_sample_us = Some(tick_us);
            }
            None => {
                self.position = wrap_position(position, self.wrap_period);
                self.velocity = 0.0;
                self.last_sample_us = Some(tick_us);
            }
        }
    }

    /// Age of the newest sample at `now_us` [µs].
    #[inline]
    pub fn age_us(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.last_sample_us.unwrap_or(self.since_us))
    }

    /// Best estimate at `now_us`.
    pub fn fuse(&self, now_us: u64) -> FusedMeasurement {
        let age_us = self.age_us(now_us);
        if self.last_sample_us.is_none() || age_us > self.max_prediction_us {
            return FusedMeasurement {
                position: self.position,
                velocity: 0.0,
                age_us,
                quality: SampleQuality::Lost,
            };
        }
        if age_us <= self.staleness_us {
            return FusedMeasurement {
                position: self.position,
                velocity: self.velocity,
                age_us,
                quality: SampleQuality::Fresh,
            };
        }
        let predicted = self.position + self.velocity * age_us as f64 * 1e-6;
        FusedMeasurement {
            position: wrap_position(predicted, self.wrap_period),
            velocity: self.velocity,
            age_us,
            quality: SampleQuality::Predicted,
        }
    }
}
