//! Feedforward controller.
//!
//! Velocity FF (Kvff × reference velocity) and acceleration FF
//! (Kaff × reference acceleration). Zero gains disable each component.

use motus_common::motion::config::PidGains;

/// Feedforward gains, taken from the axis gain set.
#[derive(Debug, Clone, Copy)]
pub struct FeedforwardGains {
    /// Velocity feedforward gain (0 = disabled).
    pub kvff: f64,
    /// Acceleration feedforward gain [s] (0 = disabled).
    pub kaff: f64,
}

impl From<&PidGains> for FeedforwardGains {
    fn from(g: &PidGains) -> Self {
        Self {
            kvff: g.kvff,
            kaff: g.kaff,
        }
    }
}

/// Compute the feedforward velocity contribution [units/s].
///
/// ```text
/// ff = Kvff × v_ref + Kaff × a_ref
/// ```
#[inline]
pub fn feedforward_compute(gains: &FeedforwardGains, velocity: f64, acceleration: f64) -> f64 {
    let mut output = 0.0;
    if gains.kvff != 0.0 {
        output += gains.kvff * velocity;
    }
    if gains.kaff != 0.0 {
        output += gains.kaff * acceleration;
    }
    output
}
