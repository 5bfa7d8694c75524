//! Planner benchmark: segment generation for both profiles, and sampling.
//!
//! A replacement target is planned inside the communication task, so
//! planning has to fit comfortably in one tick.

use criterion::{Criterion, criterion_group, criterion_main};

use motus_common::motion::command::MotionLimits;
use motus_common::motion::state::ProfileKind;
use motus_control::planner::segment::Kinematics;
use motus_control::planner::{MotionPlanner, plan};

const DT: f64 = 0.001;

fn limits(profile: ProfileKind) -> MotionLimits {
    MotionLimits {
        velocity: 50.0,
        acceleration: 500.0,
        jerk: 10_000.0,
        profile,
    }
}

fn bench_plan(c: &mut Criterion) {
    let trapezoid = limits(ProfileKind::Trapezoidal);
    let scurve = limits(ProfileKind::Scurve);

    c.bench_function("plan_trapezoid", |b| {
        b.iter(|| plan(Kinematics::at_rest(0.0), 120.0, &trapezoid))
    });

    // Short move: the cruise velocity comes from the bisection.
    c.bench_function("plan_scurve_short", |b| {
        b.iter(|| plan(Kinematics::at_rest(0.0), 0.5, &scurve))
    });

    // Mid-flight replacement with nonzero acceleration and a reversal.
    let moving = Kinematics {
        position: 10.0,
        velocity: 30.0,
        acceleration: 200.0,
    };
    c.bench_function("plan_scurve_replan", |b| b.iter(|| plan(moving, -20.0, &scurve)));
}

fn bench_sample(c: &mut Criterion) {
    let mut planner = MotionPlanner::new();
    let segment = planner
        .build_move(0, Kinematics::at_rest(0.0), 120.0, &limits(ProfileKind::Scurve), 0)
        .unwrap();
    let mut t = 0.0;

    c.bench_function("segment_sample", |b| {
        b.iter(|| {
            t += DT;
            if t > segment.duration {
                t = 0.0;
            }
            segment.sample_at(t)
        })
    });
}

criterion_group!(benches, bench_plan, bench_sample);
criterion_main!(benches);
