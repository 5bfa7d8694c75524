//! Jerk-limited S-curve profile (up to seven phases).
//!
//! A velocity change `Δv` is done with a jerk-up, constant-acceleration,
//! jerk-down triple. When `Δv < a²/j` the constant phase vanishes and the
//! peak acceleration drops to `sqrt(Δv·j)`. Both shapes are symmetric, so
//! the distance covered is `(v0 + v1)/2 · T`.
//!
//! The cruise velocity is the largest value in `[v_start, vmax]` whose
//! accelerate-plus-decelerate distance fits the move; it is found by
//! bisection because the distance has no convenient closed-form inverse.

use super::segment::{Kinematics, PhaseBuilder};

const BISECTION_STEPS: u32 = 60;

/// Duration of a velocity change of magnitude `dv`.
#[inline]
fn change_time(dv: f64, amax: f64, jmax: f64) -> f64 {
    if dv <= 0.0 {
        0.0
    } else if dv >= amax * amax / jmax {
        dv / amax + amax / jmax
    } else {
        2.0 * (dv / jmax).sqrt()
    }
}

/// Distance covered changing speed from `u` to `w` (same sign).
#[inline]
fn change_distance(u: f64, w: f64, amax: f64, jmax: f64) -> f64 {
    (u + w) / 2.0 * change_time((w - u).abs(), amax, jmax)
}

/// Append a velocity change from the current velocity to `w` (signed).
/// The builder's acceleration must be zero.
fn push_change(b: &mut PhaseBuilder, w: f64, amax: f64, jmax: f64) -> bool {
    let dv = w - b.state().velocity;
    let s = dv.signum();
    let dv = dv.abs();
    if dv <= 0.0 {
        return true;
    }
    if dv >= amax * amax / jmax {
        let tj = amax / jmax;
        let ta = dv / amax - tj;
        b.push_jerk(tj, s * jmax) && b.push_jerk(ta, 0.0) && b.push_jerk(tj, -s * jmax)
    } else {
        let tj = (dv / jmax).sqrt();
        b.push_jerk(tj, s * jmax) && b.push_jerk(tj, -s * jmax)
    }
}

/// Append phases moving from the builder state to `target`, ending at rest
/// with zero acceleration.
///
/// Returns `false` if the phase table overflowed.
pub fn plan_scurve(b: &mut PhaseBuilder, target: f64, vmax: f64, amax: f64, jmax: f64) -> bool {
    // Bring acceleration to zero first; the velocity keeps rising or
    // falling by a0²/(2j) meanwhile.
    let a0 = b.state().acceleration;
    if a0 != 0.0 {
        let tj = a0.abs() / jmax;
        if !b.push_jerk(tj, -a0.signum() * jmax) {
            return false;
        }
    }
    // Clear floating residue from the phase above.
    let mut s = b.state();
    s.acceleration = 0.0;
    b.set_state(s);

    let d = target - s.position;
    let v0 = s.velocity;
    if d == 0.0 && v0 == 0.0 {
        return true;
    }

    let dir = if d != 0.0 { d.signum() } else { -v0.signum() };
    let u = v0 * dir;
    let dist = d.abs();

    let total = |vp: f64| change_distance(u, vp, amax, jmax) + change_distance(vp, 0.0, amax, jmax);
    // Above a reduced vmax the two-step slowdown can need more room than a
    // direct stop; brake and approach from rest in that case too.
    let overspeed_too_close = u > vmax && total(vmax) > dist;

    if u < 0.0 || change_distance(u, 0.0, amax, jmax) > dist || overspeed_too_close {
        if !push_change(b, 0.0, amax, jmax) {
            return false;
        }
        let rest = b.state();
        b.set_state(Kinematics::at_rest(rest.position));
        return plan_scurve(b, target, vmax, amax, jmax);
    }

    let vp = if u >= vmax {
        vmax
    } else if total(vmax) <= dist {
        vmax
    } else {
        let (mut lo, mut hi) = (u, vmax);
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if total(mid) <= dist {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    };

    let cruise = (dist - total(vp)).max(0.0);
    push_change(b, dir * vp, amax, jmax)
        && (vp <= 0.0 || b.push_jerk(cruise / vp, 0.0))
        && push_change(b, 0.0, amax, jmax)
}

/// Append a jerk-limited stop from the builder state.
pub fn plan_scurve_stop(b: &mut PhaseBuilder, amax: f64, jmax: f64) -> bool {
    let a0 = b.state().acceleration;
    if a0 != 0.0 && !b.push_jerk(a0.abs() / jmax, -a0.signum() * jmax) {
        return false;
    }
    let mut s = b.state();
    s.acceleration = 0.0;
    b.set_state(s);
    push_change(b, 0.0, amax, jmax)
}
