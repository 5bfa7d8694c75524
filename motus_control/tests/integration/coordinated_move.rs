//! Integration test: planned motion through the closed loop.
//!
//! Validates:
//! 1. Coordinated axes share one duration and arrive on the same tick
//! 2. Rotary axes take the shortest way across the wrap
//! 3. A replacement target mid-flight keeps the commanded velocity
//!    continuous
//! 4. Targets outside the soft band leave the axis untouched

use heapless::Vec as HVec;

use motus_common::motion::command::{AxisTarget, MotionParameters, MotorCommand, MotorCommandKind};
use motus_common::motion::config::MachineConfig;
use motus_common::motion::state::{ProfileKind, SafetyState};

use super::rig::{Rig, linear_axis, move_to, rotary_axis, two_axis_machine};

// ── Helpers ─────────────────────────────────────────────────────────

fn coordinated(targets: &[(u8, f64)]) -> MotorCommand {
    let mut list = HVec::new();
    for &(axis, position) in targets {
        list.push(AxisTarget { axis, position }).unwrap();
    }
    MotorCommand::new(0, MotorCommandKind::CoordinatedMove { targets: list })
}

fn commanded_velocity(rig: &Rig, axis: u8) -> f64 {
    rig.scheduler.coordinator().axis(axis).unwrap().state().commanded_velocity
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn coordinated_axes_arrive_together() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    rig.send(coordinated(&[(0, 100.0), (1, 20.0)]));

    let planner = rig.scheduler.coordinator().planner();
    let x = planner.active(0).unwrap();
    let y = planner.active(1).unwrap();
    assert_eq!(x.start_us, y.start_us);
    assert!((x.duration - y.duration).abs() < 1e-9);
    assert!(y.peak_velocity() < x.peak_velocity(), "the shorter move is stretched, not hurried");

    let mut finished = [None; 2];
    for n in 0..5_000u32 {
        rig.tick();
        for axis in 0..2u8 {
            if finished[usize::from(axis)].is_none() && !rig.is_moving(axis) {
                finished[usize::from(axis)] = Some(n);
            }
        }
        if finished.iter().all(Option::is_some) {
            break;
        }
    }
    assert!(finished[0].is_some());
    assert_eq!(finished[0], finished[1]);

    rig.run(300);
    assert!((rig.board.axis_position(0) - 100.0).abs() < 0.05);
    assert!((rig.board.axis_position(1) - 20.0).abs() < 0.05);
    assert_eq!(rig.state(), SafetyState::Safe);
}

#[test]
fn scurve_move_settles_on_target() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    let command = move_to(1, 40.0).with_parameters(MotionParameters {
        profile: Some(ProfileKind::Scurve),
        ..Default::default()
    });
    rig.send(command);
    let segment = rig.scheduler.coordinator().planner().active(1).unwrap();
    assert_eq!(segment.profile, ProfileKind::Scurve);
    assert!(segment.peak_jerk() <= 10_000.0 + 1e-6);

    let spent = rig.run_until(3_000, |r| !r.is_moving(1));
    assert!(spent.is_some());
    rig.run(300);
    assert!((rig.board.axis_position(1) - 40.0).abs() < 0.05);
}

#[test]
fn rotary_axis_takes_the_short_way() {
    let config = MachineConfig::with_axes("rotary", vec![rotary_axis("A", 0), linear_axis("X", 1)]);
    let mut rig = Rig::with_board(&config, |board| board.set_axis_position(0, 350.0));
    rig.settle();
    rig.run(20);
    assert!((rig.board.axis_position(0) - 350.0).abs() < 1e-3, "holds where it stood at startup");

    rig.send(move_to(0, 10.0));
    let mut lowest = f64::MAX;
    for _ in 0..3_000 {
        rig.tick();
        lowest = lowest.min(rig.board.axis_position(0));
        if !rig.is_moving(0) {
            break;
        }
    }
    assert!(!rig.is_moving(0));
    rig.run(300);

    // 350 → 370 unwrapped, i.e. +20 across the wrap rather than −340.
    assert!((rig.board.axis_position(0) - 370.0).abs() < 0.05);
    assert!(lowest > 349.0);
}

#[test]
fn replacement_target_keeps_velocity_continuous() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    rig.send(move_to(0, 200.0));
    rig.run(400);
    assert!(commanded_velocity(&rig, 0) > 45.0);

    // Reverse to a target behind the axis.
    rig.submit(move_to(0, 0.0));
    let max_step = 500.0 * 1e-3 + 1e-6;
    let mut previous = commanded_velocity(&rig, 0);
    for _ in 0..1_000 {
        rig.tick();
        let v = commanded_velocity(&rig, 0);
        assert!((v - previous).abs() <= max_step, "velocity jumped from {previous} to {v}");
        previous = v;
        if !rig.is_moving(0) {
            break;
        }
    }
    assert!(!rig.is_moving(0));
    rig.run(300);
    assert!(rig.board.axis_position(0).abs() < 0.05);
}

#[test]
fn target_outside_soft_band_is_rejected() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    rig.send(move_to(0, 301.0));
    assert!(!rig.is_moving(0));
    assert_eq!(rig.scheduler.counters().rejected_commands, 1);

    // A coordinated move with one bad target moves nothing.
    rig.send(coordinated(&[(0, 50.0), (1, -150.0)]));
    assert!(!rig.is_moving(0));
    assert!(!rig.is_moving(1));
    assert_eq!(rig.scheduler.counters().rejected_commands, 2);
}
