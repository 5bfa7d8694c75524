//! Wrap-around arithmetic for rotary axes.

/// Shortest signed difference `target − measured` on a circle of `period`.
///
/// Result lies in `[−period/2, period/2)`. Without a period this is plain
/// subtraction.
#[inline]
pub fn wrap_error(target: f64, measured: f64, period: Option<f64>) -> f64 {
    match period {
        Some(p) if p > 0.0 => {
            let half = p * 0.5;
            (target - measured + half).rem_euclid(p) - half
        }
        _ => target - measured,
    }
}

/// Normalize a position into `[0, period)`.
#[inline]
pub fn wrap_position(position: f64, period: Option<f64>) -> f64 {
    match period {
        Some(p) if p > 0.0 => position.rem_euclid(p),
        _ => position,
    }
}
