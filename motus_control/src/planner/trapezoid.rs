//! Trapezoidal profile: accelerate, cruise, decelerate.
//!
//! Acceleration is piecewise constant. When the distance is too short to
//! reach `vmax`, the peak drops to `sqrt(a·d + v0²/2)` and the cruise
//! phase disappears (triangular profile).

use super::segment::{Kinematics, PhaseBuilder};

/// Append phases moving from the builder state to `target`, ending at rest.
///
/// Returns `false` if the phase table overflowed.
pub fn plan_trapezoid(b: &mut PhaseBuilder, target: f64, vmax: f64, amax: f64) -> bool {
    let s = b.state();
    let d = target - s.position;
    let v0 = s.velocity;

    if d == 0.0 && v0 == 0.0 {
        return true;
    }

    let dir = if d != 0.0 { d.signum() } else { -v0.signum() };
    let u = v0 * dir; // speed towards the target (negative = moving away)
    let dist = d.abs();
    let stop_dist = v0 * v0 / (2.0 * amax);

    if u < 0.0 || stop_dist > dist {
        // Moving away, or cannot stop in time: brake to rest, then plan
        // again from wherever that leaves us.
        if !b.push_accel(v0.abs() / amax, -v0.signum() * amax) {
            return false;
        }
        let rest = b.state().position;
        b.set_state(Kinematics::at_rest(rest));
        return plan_from(b, rest, target, vmax, amax);
    }

    if u > vmax {
        // Above the (possibly reduced) limit: decelerate to vmax first.
        let t1 = (u - vmax) / amax;
        let d1 = (u * u - vmax * vmax) / (2.0 * amax);
        let d3 = vmax * vmax / (2.0 * amax);
        let cruise = (dist - d1 - d3).max(0.0);
        return b.push_accel(t1, -dir * amax)
            && b.push_accel(cruise / vmax, 0.0)
            && b.push_accel(vmax / amax, -dir * amax);
    }

    let vp = (amax * dist + u * u / 2.0).sqrt().min(vmax);
    let t1 = (vp - u) / amax;
    let d1 = (vp * vp - u * u) / (2.0 * amax);
    let d3 = vp * vp / (2.0 * amax);
    let cruise = (dist - d1 - d3).max(0.0);
    b.push_accel(t1, dir * amax)
        && (vp <= 0.0 || b.push_accel(cruise / vp, 0.0))
        && b.push_accel(vp / amax, -dir * amax)
}

fn plan_from(b: &mut PhaseBuilder, position: f64, target: f64, vmax: f64, amax: f64) -> bool {
    let d = target - position;
    if d == 0.0 {
        return true;
    }
    let dir = d.signum();
    let dist = d.abs();
    let vp = (amax * dist).sqrt().min(vmax);
    let cruise = (dist - vp * vp / amax).max(0.0);
    b.push_accel(vp / amax, dir * amax) && b.push_accel(cruise / vp, 0.0) && b.push_accel(vp / amax, -dir * amax)
}
