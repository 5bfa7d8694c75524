//! Integration test: watchdog refresh gating and bus failure handling.
//!
//! The independent watchdog is fed only by ticks whose transaction
//! succeeded within the tick deadline. A bus that stays dead starves it
//! until the gate forces a hardware reset.

use motus_common::hal::driver::MotionHal;
use motus_common::motion::error::AxisFaultFlags;
use motus_common::motion::state::{FaultCode, SafetyState};

use motus_control::scheduler::TaskId;

use super::rig::{Rig, two_axis_machine};

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn every_clean_tick_refreshes() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    let before = rig.watchdog.refreshes();
    rig.run(200);
    assert_eq!(rig.watchdog.refreshes(), before + 200);
    assert_eq!(rig.watchdog.resets(), 0);
    assert_eq!(rig.scheduler.counters().watchdog_misses, 0);
    assert!(rig.scheduler.watchdog().age_us(rig.board.get_tick()) < 1_000);
}

#[test]
fn garbled_replies_are_retried_transparently() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    let before = rig.watchdog.refreshes();

    rig.board.garble_replies(2);
    let verdict = rig.tick();

    assert_eq!(verdict.state, SafetyState::Safe);
    assert_eq!(rig.state(), SafetyState::Safe);
    assert_eq!(rig.scheduler.counters().comm_retries, 2);
    assert_eq!(rig.scheduler.counters().comm_failures, 0);
    assert_eq!(rig.watchdog.refreshes(), before + 1);
}

#[test]
fn exhausted_retries_fault_and_withhold_refresh() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();
    let before = rig.watchdog.refreshes();

    // Default: 3 retries, so 4 attempts all time out.
    rig.board.fail_transfers(4);
    rig.run(1);

    assert_eq!(rig.watchdog.refreshes(), before, "failed cycle must not feed the watchdog");
    assert_eq!(rig.state(), SafetyState::Fault);
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::Communication);
    assert_eq!(rig.scheduler.counters().comm_failures, 1);
    let faults = rig.scheduler.coordinator().axis(0).unwrap().state().faults;
    assert!(faults.contains(AxisFaultFlags::COMM_FAULT));

    // The bus recovers; the fault stays latched but refreshes resume.
    rig.run(1);
    assert_eq!(rig.watchdog.refreshes(), before + 1);
    assert_eq!(rig.state(), SafetyState::Fault);
}

#[test]
fn dead_bus_forces_hardware_reset() {
    let mut rig = Rig::new(&two_axis_machine());
    rig.settle();

    rig.board.fail_transfers(u32::MAX);
    let spent = rig.run_until(200, |r| r.watchdog.resets() > 0);

    // 50 ms timeout; the reset is forced at twice the timeout.
    let spent = spent.expect("watchdog never reset");
    assert!((95..=105).contains(&spent), "reset after {spent} ticks");
    assert!(rig.scheduler.counters().watchdog_misses >= 1);
    rig.run(10);
    assert_eq!(rig.watchdog.resets(), 1, "the reset is requested once");
}

#[test]
fn slow_transactions_count_as_overruns() {
    let mut config = two_axis_machine();
    config.chain.transfer_timeout_us = 1_000;
    let mut rig = Rig::new(&config);
    rig.settle();

    // Each transaction now takes longer than the motor-control budget but
    // fits in the tick.
    rig.board.set_transfer_latency(600);
    rig.run(2);
    assert_eq!(rig.state(), SafetyState::Safe);
    assert!(rig.scheduler.task_stats(TaskId::MotorControl).max_us > 500);
    assert!(rig.scheduler.counters().task_overruns >= 2);

    let spent = rig.run_until(5, |r| r.state() == SafetyState::Warning);
    assert!(spent.is_some(), "repeated overruns raise a warning");
    assert_eq!(rig.scheduler.supervisor().fault_code(), FaultCode::TaskOverrun);
    assert_eq!(rig.scheduler.counters().deadline_misses, 0);
}
