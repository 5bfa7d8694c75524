//! Output stage: final clamp before the protocol engine.
//!
//! Whatever the planner or supervisor hands down, the value leaving this
//! module is bounded by the axis' configured maxima. Non-finite inputs
//! produce zero.

use super::pid::Saturation;

/// Clamp a velocity command to `±limit` [units/s].
///
/// Returns the clamped value and the side it was clamped on.
#[inline]
pub fn clamp_velocity(raw: f64, limit: f64) -> (f64, Saturation) {
    let limit = if limit.is_finite() { limit.max(0.0) } else { 0.0 };
    if !raw.is_finite() {
        return (0.0, Saturation::High);
    }
    if raw > limit {
        (limit, Saturation::High)
    } else if raw < -limit {
        (-limit, Saturation::Low)
    } else {
        (raw, Saturation::None)
    }
}

/// Driver current code for `amps` at `full_scale` amps.
///
/// The register holds `(I / I_fs) · 32 − 1`, floored and saturated to the
/// 5-bit field.
#[inline]
pub fn current_code(amps: f64, full_scale: f64) -> u8 {
    if !(amps.is_finite() && full_scale.is_finite() && full_scale > 0.0) {
        return 0;
    }
    let code = (amps / full_scale * 32.0).floor() - 1.0;
    code.clamp(0.0, 31.0) as u8
}

/// Convert user units/s to driver µsteps/s.
#[inline]
pub fn to_microsteps(velocity: f64, steps_per_unit: f64) -> f64 {
    velocity * steps_per_unit
}
