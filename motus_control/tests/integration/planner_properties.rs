//! Integration test: planner properties over random moves.
//!
//! For any limits and target:
//! 1. A rest-to-rest segment ends exactly at the target and never exceeds
//!    its velocity, acceleration or jerk limit
//! 2. A replacement planned from a mid-flight sample starts from exactly
//!    that state
//! 3. Time scaling keeps the path and lowers every peak
//! 4. A stop never reverses direction

use proptest::prelude::*;

use motus_common::motion::command::MotionLimits;
use motus_common::motion::state::ProfileKind;

use motus_control::planner::MotionPlanner;
use motus_control::planner::segment::{Kinematics, MotionSegment};

// ── Helpers ─────────────────────────────────────────────────────────

const SAMPLES: u32 = 200;

fn limits_strategy() -> impl Strategy<Value = MotionLimits> {
    (1.0f64..200.0, 10.0f64..5_000.0, 100.0f64..100_000.0, any::<bool>()).prop_map(|(v, a, j, scurve)| MotionLimits {
        velocity: v,
        acceleration: a,
        jerk: j,
        profile: if scurve { ProfileKind::Scurve } else { ProfileKind::Trapezoidal },
    })
}

fn within(value: f64, limit: f64) -> bool {
    value <= limit * (1.0 + 1e-6) + 1e-9
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * (1.0 + a.abs().max(b.abs()))
}

fn last_phase_end(segment: &MotionSegment) -> Kinematics {
    segment.phases.last().map_or(segment.end, |p| p.end())
}

fn samples(segment: &MotionSegment) -> impl Iterator<Item = Kinematics> + '_ {
    (0..=SAMPLES).map(move |i| segment.sample_at(segment.duration * f64::from(i) / f64::from(SAMPLES)))
}

// ── Properties ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn rest_to_rest_respects_limits(limits in limits_strategy(), start in -200.0f64..200.0, target in -500.0f64..500.0) {
        let mut planner = MotionPlanner::new();
        let segment = planner.build_move(0, Kinematics::at_rest(start), target, &limits, 0).unwrap();

        prop_assert_eq!(segment.end, Kinematics::at_rest(target));
        let last = last_phase_end(&segment);
        prop_assert!(close(last.position, target), "ends at {} instead of {}", last.position, target);
        prop_assert!(last.velocity.abs() < 1e-6);

        prop_assert!(within(segment.peak_velocity(), limits.velocity));
        prop_assert!(within(segment.peak_acceleration(), limits.acceleration));
        if limits.profile == ProfileKind::Scurve {
            prop_assert!(within(segment.peak_jerk(), limits.jerk));
        }

        // Rest to rest never overshoots.
        let (lo, hi) = (start.min(target), start.max(target));
        for k in samples(&segment) {
            prop_assert!(k.position >= lo - 1e-6 && k.position <= hi + 1e-6);
        }
    }

    #[test]
    fn replacement_starts_from_sampled_state(
        limits in limits_strategy(),
        first in -300.0f64..300.0,
        second in -300.0f64..300.0,
        fraction in 0.0f64..1.0,
    ) {
        let mut planner = MotionPlanner::new();
        planner.start_move(0, Kinematics::at_rest(0.0), first, &limits, 0).unwrap();
        let old = planner.active(0).unwrap().clone();
        let now_us = (old.duration * fraction * 1e6) as u64;
        let here = old.sample(now_us);

        let replacement = planner.start_move(0, here, second, &limits, now_us).unwrap().clone();
        let at_start = replacement.sample(now_us);
        prop_assert!(close(at_start.position, here.position));
        prop_assert!(close(at_start.velocity, here.velocity));
        prop_assert!(close(last_phase_end(&replacement).position, second));
        prop_assert!(within(replacement.peak_acceleration(), limits.acceleration));
        prop_assert_eq!(planner.active(0).map(|s| s.id), Some(replacement.id));
    }

    #[test]
    fn time_scaling_keeps_the_path(limits in limits_strategy(), target in -300.0f64..300.0, factor in 1.0f64..5.0) {
        prop_assume!(target.abs() > 1e-3);
        let mut planner = MotionPlanner::new();
        let segment = planner.build_move(0, Kinematics::at_rest(0.0), target, &limits, 0).unwrap();
        let scaled = segment.time_scaled(factor).unwrap();

        prop_assert!(close(scaled.duration, segment.duration * factor));
        prop_assert_eq!(scaled.end, segment.end);
        prop_assert!(within(scaled.peak_velocity(), segment.peak_velocity() / factor));
        for i in 0..=20 {
            let t = segment.duration * f64::from(i) / 20.0;
            let a = segment.sample_at(t);
            let b = scaled.sample_at(t * factor);
            prop_assert!(close(a.position, b.position), "path differs at t={}", t);
        }
    }

    #[test]
    fn stop_never_reverses(limits in limits_strategy(), target in -300.0f64..300.0, fraction in 0.05f64..0.95) {
        prop_assume!(target.abs() > 1e-3);
        let mut planner = MotionPlanner::new();
        planner.start_move(0, Kinematics::at_rest(0.0), target, &limits, 0).unwrap();
        let old = planner.active(0).unwrap().clone();
        let now_us = (old.duration * fraction * 1e6) as u64;
        let here = old.sample(now_us);

        planner.start_stop(0, here, &limits, now_us).unwrap();
        let stop = planner.active(0).unwrap();
        prop_assert_eq!(stop.end.velocity, 0.0);
        let direction = target.signum();
        for k in samples(stop) {
            prop_assert!(k.velocity * direction >= -1e-6, "velocity {} reverses", k.velocity);
        }
    }
}
