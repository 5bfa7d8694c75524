//! PID controller with backward Euler integration, derivative filter (Tf),
//! and anti-windup by conditional integration.
//!
//! Output is a velocity correction [units/s]. Zero Ki disables integral;
//! zero Kd disables derivative.

use motus_common::motion::config::PidGains;

/// Direction the output was clamped in on the previous tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Saturation {
    #[default]
    None,
    /// Clamped at the positive bound.
    High,
    /// Clamped at the negative bound.
    Low,
}

impl Saturation {
    #[inline]
    pub const fn is_saturated(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether integrating `error` would push further into the bound.
    #[inline]
    pub fn blocks(&self, error: f64) -> bool {
        match self {
            Self::None => false,
            Self::High => error > 0.0,
            Self::Low => error < 0.0,
        }
    }
}

/// Internal state of the PID controller.
///
/// Preserves integral accumulator and filtered derivative across cycles.
/// Reset on forced stop, auto-tune start and gain change.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidState {
    /// Integral accumulator [units/s].
    integral: f64,
    /// Previous error (for derivative).
    prev_error: f64,
    /// Filtered derivative term (low-pass via Tf).
    derivative_filtered: f64,
    /// First sample seen; derivative uses `prev_error` only after this.
    primed: bool,
}

impl PidState {
    /// Reset all internal state to zero.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn integral(&self) -> f64 {
        self.integral
    }
}

/// Compute one PID cycle.
///
/// # Arguments
/// - `state`: Mutable PID internal state.
/// - `gains`: PID gains for this axis.
/// - `error`: Position error (target − measured) [units].
/// - `dt`: Elapsed time since the previous call [s].
/// - `saturation`: Output clamp of the previous tick; integration is frozen
///   while it would deepen the saturation.
///
/// With `dt <= 0` only the proportional term and the held integral are
/// returned; neither the derivative nor the integral is updated.
#[inline]
pub fn pid_compute(
    state: &mut PidState,
    gains: &PidGains,
    error: f64,
    dt: f64,
    saturation: Saturation,
) -> f64 {
    let p_term = gains.kp * error;

    if dt <= 0.0 || !dt.is_finite() {
        return p_term + state.integral;
    }

    // ── I term (backward Euler, conditional integration) ────
    if gains.ki != 0.0 {
        if !saturation.blocks(error) {
            state.integral += gains.ki * error * dt;
        }
        if gains.integral_limit > 0.0 {
            state.integral = state.integral.clamp(-gains.integral_limit, gains.integral_limit);
        }
    } else {
        state.integral = 0.0;
    }

    // ── D term (with first-order filter) ────────────────────
    let d_term = if gains.kd != 0.0 && state.primed {
        let raw_derivative = (error - state.prev_error) / dt;
        if gains.tf > 0.0 {
            let alpha = dt / (gains.tf + dt);
            state.derivative_filtered += alpha * (raw_derivative - state.derivative_filtered);
            gains.kd * state.derivative_filtered
        } else {
            gains.kd * raw_derivative
        }
    } else {
        state.derivative_filtered = 0.0;
        0.0
    };

    state.prev_error = error;
    state.primed = true;

    p_term + state.integral + d_term
}

// ─── Tests ──────────────────────────────────────────────────────────
