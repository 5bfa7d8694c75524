//! Integration test: threshold monitoring through the full tick.
//!
//! Validates:
//! 1. Soft crossings → Warning with reduced speed, cleared on recovery
//! 2. Hard crossings → Fault through Warning, motion ramps down
//! 3. Warning timeout, dual-channel discrepancy and sensor loss → Fault
//! 4. A silent redundant channel or stale current/temperature → Fault

use motus_common::hal::types::Pin;
use motus_common::motion::error::AxisFaultFlags;
use motus_common::motion::state::{FaultCode, SafetyState};

use super::rig::{Rig, move_to, two_axis_machine};

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn hard_current_faults_and_ramps_down() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    rig.send(move_to(0, 200.0));
    rig.run(300);
    assert!(rig.is_moving(0));
    assert!(rig.board.axis_velocity(0) > 40.0);
    let before = rig.scheduler.supervisor().transitions();

    // Run current 1.2 A + 1.0 A is past the 1.9 A hard limit.
    rig.board.plant_mut(0).unwrap().current_offset = 1.0;
    rig.run(1);

    assert_eq!(rig.state(), SafetyState::Fault);
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::CurrentHard);
    assert_eq!(rig.scheduler.supervisor().transitions(), before + 2, "Safe → Warning → Fault");
    assert!(rig.board.pin(Pin::FaultLamp));
    assert!(rig.board.pin(Pin::DriverEnable), "a fault ramps down, it does not cut power");

    rig.run(300);
    assert!(!rig.is_moving(0));
    assert!(rig.board.axis_velocity(0).abs() < 1.0);
    assert!(rig.board.axis_position(0) < 200.0);

    let rejected = rig.scheduler.counters().rejected_commands;
    rig.send(move_to(0, 10.0));
    assert_eq!(rig.scheduler.counters().rejected_commands, rejected + 1);
    assert_eq!(rig.state(), SafetyState::Fault, "Fault has no automatic exit");
}

#[test]
fn soft_temperature_halves_speed_then_times_out() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    rig.send(move_to(0, 250.0));
    rig.run(500);
    assert!(rig.board.axis_velocity(0) > 45.0);

    // 85 °C: past the 80 °C soft limit, below the 100 °C hard limit.
    rig.board.plant_mut(0).unwrap().temperature_offset = 60.0;
    let verdict = rig.tick();
    assert_eq!(verdict.state, SafetyState::Warning);
    assert_eq!(verdict.fault_code, FaultCode::TemperatureSoft);
    assert_eq!(verdict.speed_scale, 0.5);

    rig.run(200);
    assert!(rig.is_moving(0), "a warning slows motion down without stopping it");
    assert!(rig.board.axis_velocity(0) < 25.5);
    assert!(rig.board.axis_velocity(0) > 20.0);

    let spent = rig.run_until(400, |r| r.state() == SafetyState::Fault);
    assert!(spent.is_some(), "uncorrected warning must escalate");
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::WarningTimeout);
}

#[test]
fn warning_clears_when_channel_recovers() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();

    rig.board.plant_mut(1).unwrap().temperature_offset = 60.0;
    rig.run(20);
    assert_eq!(rig.state(), SafetyState::Warning);

    rig.board.plant_mut(1).unwrap().temperature_offset = 0.0;
    let verdict = rig.tick();
    assert_eq!(verdict.state, SafetyState::Safe);
    assert_eq!(verdict.fault_code, FaultCode::None);
    assert_eq!(verdict.speed_scale, 1.0);

    rig.send(move_to(1, 5.0));
    assert!(rig.is_moving(1));
}

#[test]
fn dual_channel_discrepancy_needs_consecutive_samples() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();

    rig.board.plant_mut(0).unwrap().redundant_offset = 2.0;
    rig.run(4);
    assert_eq!(rig.state(), SafetyState::Safe);

    // One agreeing sample resets the count.
    rig.board.plant_mut(0).unwrap().redundant_offset = 0.0;
    rig.run(1);
    rig.board.plant_mut(0).unwrap().redundant_offset = 2.0;
    rig.run(4);
    assert_eq!(rig.state(), SafetyState::Safe);

    rig.run(1);
    assert_eq!(rig.state(), SafetyState::Fault);
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::DualChannel);
}

#[test]
fn lost_sensor_predicts_then_faults() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();

    rig.board.plant_mut(0).unwrap().sensor_lost = true;
    rig.run(5);
    assert_eq!(rig.state(), SafetyState::Safe);
    let faults = rig.scheduler.coordinator().axis(0).unwrap().state().faults;
    assert!(faults.contains(AxisFaultFlags::SENSOR_PREDICTED));

    let spent = rig.run_until(10, |r| r.state() == SafetyState::Fault);
    assert!(spent.is_some());
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::SensorStale);

    rig.run(1);
    let faults = rig.scheduler.coordinator().axis(0).unwrap().state().faults;
    assert!(faults.contains(AxisFaultFlags::SENSOR_LOST));
    assert_eq!(rig.board.vactual(0), 0, "a blind axis is stopped");
}

#[test]
fn silent_redundant_channel_faults() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();

    rig.board.plant_mut(1).unwrap().redundant_lost = true;
    rig.run(3);
    assert_eq!(rig.state(), SafetyState::Safe);

    let spent = rig.run_until(10, |r| r.state() == SafetyState::Fault);
    assert!(spent.is_some());
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::DualChannel);
}

#[test]
fn stale_analog_readings_fault() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();

    rig.board.plant_mut(0).unwrap().analog_lost = true;
    rig.run(50);
    assert_eq!(rig.state(), SafetyState::Safe, "last readings still fresh");

    let spent = rig.run_until(100, |r| r.state() == SafetyState::Fault);
    assert!(spent.is_some());
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::AnalogStale);
    assert!(!rig.scheduler.supervisor().verdict().allow_motion);
}

#[test]
fn supply_voltage_soft_then_hard() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();

    rig.board.set_supply_voltage(19.0);
    rig.run(1);
    assert_eq!(rig.state(), SafetyState::Warning);
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::SupplySoft);

    rig.board.set_supply_voltage(15.0);
    rig.run(1);
    assert_eq!(rig.state(), SafetyState::Fault);
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::SupplyHard);
}
