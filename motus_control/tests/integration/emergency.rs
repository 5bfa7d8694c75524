//! Integration test: emergency stop latch and recovery.
//!
//! Validates:
//! 1. Hardware input, software command and driver overcurrent all latch
//!    EmergencyStop and stop every axis within the latency bound
//!    (also while another axis is already held at Stop)
//! 2. A pulse shorter than one tick is still caught through its edge event
//! 3. Reset is refused until the trigger is confirmed clear, then the
//!    supervisor passes through Init back to Safe

use motus_common::hal::types::Pin;
use motus_common::motion::command::{MotorCommand, MotorCommandKind};
use motus_common::motion::error::DriverFault;
use motus_common::motion::state::{FaultCode, SafetyState};

use super::rig::{Rig, move_to, two_axis_machine};

// ── Helpers ─────────────────────────────────────────────────────────

fn moving_rig() -> Rig {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    rig.submit(move_to(0, 200.0));
    rig.send(move_to(1, 100.0));
    rig.run(300);
    assert!(rig.board.vactual(0) != 0);
    assert!(rig.board.vactual(1) != 0);
    rig
}

fn reset() -> MotorCommand {
    MotorCommand::new(0, MotorCommandKind::ResetEmergency)
}

fn assert_all_stopped(rig: &Rig) {
    assert_eq!(rig.board.vactual(0), 0);
    assert_eq!(rig.board.vactual(1), 0);
    assert!(!rig.is_moving(0));
    assert!(!rig.is_moving(1));
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn hardware_input_stops_every_axis_in_the_same_tick() {
    let mut rig = moving_rig();

    rig.board.set_emergency_input(true);
    let verdict = rig.tick();

    assert!(verdict.emergency);
    assert_eq!(verdict.state, SafetyState::EmergencyStop);
    assert_eq!(verdict.fault_code, FaultCode::HardwareEmergency);
    assert!(rig.scheduler.supervisor().is_latched());
    assert_all_stopped(&rig);
    assert!(!rig.board.pin(Pin::DriverEnable));
    assert!(rig.board.pin(Pin::FaultLamp));

    let latency = rig.scheduler.supervisor().latency();
    assert!(latency.last_us().is_some_and(|us| us <= 1_000));
    assert_eq!(rig.scheduler.counters().estop_latency_violations, 0);

    rig.run(50);
    assert!(rig.board.axis_velocity(0).abs() < 1e-3);
    assert!(rig.board.axis_velocity(1).abs() < 1e-3);
}

#[test]
fn software_stop_meets_latency_bound() {
    let mut rig = moving_rig();

    rig.send(MotorCommand::new(1, MotorCommandKind::EmergencyStop));
    rig.run(1);

    assert_eq!(rig.state(), SafetyState::EmergencyStop);
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::SoftwareEmergency);
    assert_all_stopped(&rig);
    let latency = rig.scheduler.supervisor().latency();
    assert!(latency.last_us().is_some_and(|us| us <= 1_000));
    assert_eq!(latency.violations(), 0);
}

#[test]
fn short_pulse_caught_by_edge_event() {
    let mut rig = moving_rig();

    // Asserted and released between two ticks: the level is gone, the
    // edge is still queued.
    rig.board.set_emergency_input(true);
    rig.board.set_emergency_input(false);
    assert!(!rig.board.pin(Pin::EmergencyInput));

    let verdict = rig.tick();
    assert_eq!(verdict.state, SafetyState::EmergencyStop);
    assert_eq!(verdict.fault_code, FaultCode::HardwareEmergency);
    assert_all_stopped(&rig);
}

#[test]
fn driver_overcurrent_latches_emergency() {
    let mut rig = moving_rig();

    rig.board.inject_fault(0, DriverFault::OVERCURRENT, true);
    let spent = rig.run_until(20, |r| r.state() == SafetyState::EmergencyStop);

    assert!(spent.is_some(), "overcurrent must be decoded from the status poll");
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::DriverOvercurrent);
    rig.run(1);
    assert_all_stopped(&rig);
    assert_eq!(rig.scheduler.supervisor().latency().violations(), 0);
}

#[test]
fn overcurrent_after_a_stall_still_latches_emergency() {
    let mut rig = moving_rig();

    // X stalls: its driver is held at Stop from now on.
    rig.board.inject_fault(0, DriverFault::STALL, true);
    rig.run(50);
    assert_eq!(rig.state(), SafetyState::Fault);
    assert!(rig.scheduler.coordinator().axis(0).unwrap().is_forced_stop());

    rig.board.inject_fault(1, DriverFault::OVERCURRENT, true);
    let spent = rig.run_until(100, |r| r.state() == SafetyState::EmergencyStop);

    assert!(spent.is_some(), "overcurrent on Y must still be decoded");
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::DriverOvercurrent);
    rig.run(1);
    assert_all_stopped(&rig);
}

#[test]
fn reset_requires_confirmed_clear_trigger() {
    let mut rig = moving_rig();
    rig.board.set_emergency_input(true);
    rig.run(20);
    assert_eq!(rig.state(), SafetyState::EmergencyStop);

    // Motion is refused while latched.
    let rejected = rig.scheduler.counters().rejected_commands;
    rig.send(move_to(0, 50.0));
    assert_eq!(rig.scheduler.counters().rejected_commands, rejected + 1);

    // Confirm pressed but the input is still asserted.
    rig.board.set_reset_confirm(true);
    rig.send(reset());
    assert_eq!(rig.state(), SafetyState::EmergencyStop);
    assert_eq!(rig.scheduler.counters().rejected_commands, rejected + 2);

    // Input released but no confirmation.
    rig.board.set_emergency_input(false);
    rig.board.set_reset_confirm(false);
    rig.send(reset());
    assert_eq!(rig.state(), SafetyState::EmergencyStop);
    assert_eq!(rig.scheduler.counters().rejected_commands, rejected + 3);

    rig.board.set_reset_confirm(true);
    rig.submit(reset());
    let spent = rig.run_until(10, |r| r.state() != SafetyState::EmergencyStop);
    assert!(spent.is_some());
    assert_eq!(rig.state(), SafetyState::Init, "reset returns to Init, not straight to Safe");
    assert!(!rig.scheduler.supervisor().is_latched());
    assert!(rig.board.pin(Pin::DriverEnable));

    rig.settle();
    assert!(!rig.board.pin(Pin::FaultLamp));
    rig.send(move_to(0, 100.0));
    assert!(rig.is_moving(0));
}
