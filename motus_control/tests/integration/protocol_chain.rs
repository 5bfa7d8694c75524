//! Integration test: chain protocol engine against the simulated board.
//!
//! Validates:
//! 1. Initialization configures every device by chain position
//! 2. Velocity commands land on the addressed device only
//! 3. Whole-frame retry, exhaustion, and pipelined status polling
//! 4. Device-reported faults decode per position

use proptest::prelude::*;

use motus_common::hal::registers::{DriverModel, Register};
use motus_common::motion::config::{ChainConfig, MachineConfig};
use motus_common::motion::error::{CommunicationError, CoreError, DriverFault};

use motus_control::protocol::{ChainEngine, DriverCommand, DriverDevice};
use motus_hal::SimBoard;

use super::rig::linear_axis;

// ── Helpers ─────────────────────────────────────────────────────────

/// Three axes whose chain positions do not follow the axis order.
fn machine() -> MachineConfig {
    MachineConfig::with_axes(
        "chain",
        vec![linear_axis("X", 2), linear_axis("Y", 0), linear_axis("Z", 1)],
    )
}

fn ready() -> (ChainEngine, SimBoard, MachineConfig) {
    let config = machine();
    let mut board = SimBoard::new(&config);
    let mut engine = ChainEngine::new(&config.chain, config.axes.len()).unwrap();
    engine.initialize(&mut board, &config.axes).unwrap();
    (engine, board, config)
}

fn hold(len: usize) -> Vec<DriverCommand> {
    vec![DriverCommand::Velocity(0.0); len]
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn initialize_configures_every_device() {
    let (engine, board, _) = ready();
    for position in 0..3 {
        let device = board.device(position).unwrap();
        assert_ne!(device.ihold_irun(), 0, "device {position} has no currents");
        assert_eq!(device.vactual(), 0);
    }
    assert!(engine.stats().transactions >= 6);
    assert_eq!(engine.stats().failures, 0);
}

#[test]
fn initialize_rejects_mismatched_board() {
    let config = machine();
    let short = MachineConfig::with_axes("short", vec![linear_axis("X", 0), linear_axis("Y", 1)]);
    let mut board = SimBoard::new(&short);
    let mut engine = ChainEngine::new(&config.chain, config.axes.len()).unwrap();
    assert!(matches!(
        engine.initialize(&mut board, &config.axes),
        Err(CoreError::Configuration(_))
    ));
}

#[test]
fn velocity_reaches_the_addressed_device() {
    let (mut engine, mut board, config) = ready();
    let device = DriverDevice::new(config.chain.model, config.chain.clock());
    let commands = [
        DriverCommand::Velocity(16_000.0),
        DriverCommand::Stop,
        DriverCommand::Velocity(-8_000.0),
    ];
    let reply = engine.transact(&mut board, &commands).unwrap();

    assert_eq!(reply.attempts, 1);
    assert_eq!(reply.status.len(), 3);
    assert_eq!(board.vactual(0), device.velocity_to_vactual(16_000.0).unwrap());
    assert_eq!(board.vactual(1), 0);
    assert_eq!(board.vactual(2), device.velocity_to_vactual(-8_000.0).unwrap());
}

#[test]
fn out_of_range_velocity_sends_nothing() {
    let (mut engine, mut board, _) = ready();
    let before = board.transfers();
    let commands = [DriverCommand::Velocity(1e12), DriverCommand::Stop, DriverCommand::Stop];
    assert!(matches!(
        engine.transact(&mut board, &commands),
        Err(CoreError::Configuration(_))
    ));
    assert_eq!(board.transfers(), before);
}

#[test]
fn busy_and_garbled_transfers_retry_whole_frame() {
    let (mut engine, mut board, _) = ready();
    board.hold_bus(1);
    board.garble_replies(1);
    let before = board.transfers();
    let reply = engine.transact(&mut board, &hold(3)).unwrap();
    assert_eq!(reply.attempts, 3);
    assert_eq!(board.transfers(), before + 3);
    assert_eq!(engine.stats().retries, 2);
}

#[test]
fn exhausted_retries_report_last_failure() {
    let (mut engine, mut board, _) = ready();
    board.fail_transfers(10);
    let err = engine.transact(&mut board, &hold(3)).unwrap_err();
    match err {
        CoreError::Communication(CommunicationError::RetriesExhausted { attempts, .. }) => {
            assert_eq!(attempts, ChainConfig::default().max_retries + 1);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(engine.stats().failures, 1);
}

#[test]
fn periodic_polls_alternate_registers() {
    let (mut engine, mut board, config) = ready();
    let interval = config.chain.status_poll_interval as usize;
    let mut polled = Vec::new();
    for _ in 0..(4 * interval + 2) {
        let reply = engine.transact(&mut board, &hold(3)).unwrap();
        if let Some(register) = reply.polled {
            polled.push(register);
        }
    }
    assert!(polled.len() >= 3);
    for pair in polled.windows(2) {
        assert_ne!(pair[0], pair[1], "DRV_STATUS and GSTAT alternate");
    }
    assert_eq!(engine.stats().polls, 4);
}

#[test]
fn driver_error_triggers_urgent_drv_status_poll() {
    let (mut engine, mut board, _) = ready();
    board.inject_fault(1, DriverFault::THERMAL_WARNING, true);

    // The status byte flags the error; DRV_STATUS is requested next and
    // its data decoded one transaction later.
    let first = engine.transact(&mut board, &hold(3)).unwrap();
    assert!(first.status[1].driver_error);
    engine.transact(&mut board, &hold(3)).unwrap();
    let decoded = engine.transact(&mut board, &hold(3)).unwrap();

    assert_eq!(decoded.polled, Some(Register::DrvStatus));
    assert!(decoded.faults_at(1).contains(DriverFault::THERMAL_WARNING));
    assert!(decoded.faults_at(0).is_empty());
    assert!(decoded.faults_at(2).is_empty());
}

#[test]
fn fresh_stop_is_written_while_other_slots_poll() {
    let (mut engine, mut board, config) = ready();
    let device = DriverDevice::new(config.chain.model, config.chain.clock());
    let moving = [
        DriverCommand::Velocity(16_000.0),
        DriverCommand::Velocity(100.0),
        DriverCommand::Velocity(100.0),
    ];
    for _ in 1..config.chain.status_poll_interval {
        engine.transact(&mut board, &moving).unwrap();
    }
    assert_eq!(board.vactual(0), device.velocity_to_vactual(16_000.0).unwrap());

    let polls = engine.stats().polls;
    let commands = [DriverCommand::Stop, DriverCommand::Velocity(100.0), DriverCommand::Velocity(100.0)];
    engine.transact(&mut board, &commands).unwrap();
    assert_eq!(engine.stats().polls, polls + 1);
    assert_eq!(board.vactual(0), 0, "a stop is never replaced by a read");

    let next = engine.transact(&mut board, &[DriverCommand::Stop, moving[1], moving[2]]).unwrap();
    assert!(!next.polled_at(0));
    assert!(next.polled_at(1) && next.polled_at(2));
}

#[test]
fn held_stop_does_not_block_polling() {
    let (mut engine, mut board, config) = ready();
    let held = [DriverCommand::Stop, DriverCommand::Velocity(100.0), DriverCommand::Velocity(100.0)];
    for _ in 0..(3 * config.chain.status_poll_interval) {
        engine.transact(&mut board, &held).unwrap();
    }
    assert_eq!(engine.stats().polls, 3);

    // A fault raised on another device is still read out.
    board.inject_fault(1, DriverFault::OVERCURRENT, true);
    let mut seen = false;
    for _ in 0..3 {
        let reply = engine.transact(&mut board, &held).unwrap();
        seen |= reply.faults_at(1).contains(DriverFault::OVERCURRENT);
    }
    assert!(seen, "overcurrent decoded through the urgent DRV_STATUS poll");
}

proptest! {
    #[test]
    fn drv_status_faults_decode_for_every_model(bits in 0u16..128, standstill: bool, high_voltage: bool) {
        let model = if high_voltage { DriverModel::HighVoltage } else { DriverModel::Standard };
        let device = DriverDevice::new(model, model.default_clock_hz());
        let faults = DriverFault::from_bits_truncate(bits)
            & (DriverFault::OVERCURRENT
                | DriverFault::THERMAL_SHUTDOWN
                | DriverFault::THERMAL_WARNING
                | DriverFault::STALL
                | DriverFault::OPEN_LOAD);
        let decoded = device.decode_status(Register::DrvStatus, device.drv_status_word(faults, standstill));
        prop_assert_eq!(decoded.faults, faults);
        prop_assert_eq!(decoded.standstill, standstill);
    }

    #[test]
    fn vactual_conversion_is_within_one_code(usteps in -2.0e6f64..2.0e6) {
        let device = DriverDevice::new(DriverModel::Standard, 12_000_000.0);
        let code = device.velocity_to_vactual(usteps).unwrap();
        let back = device.vactual_to_velocity(code);
        let one_code = device.vactual_to_velocity(1);
        prop_assert!((back - usteps).abs() <= one_code / 2.0 + 1e-9);
    }
}
