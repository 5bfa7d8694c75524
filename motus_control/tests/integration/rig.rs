//! Shared scheduler rig: one simulated board, one watchdog, one scheduler,
//! and a clock that lands every tick on its period boundary.

use motus_common::hal::driver::MotionHal;
use motus_common::hal::types::sensor_channel;
use motus_common::motion::command::{MotorCommand, MotorCommandKind};
use motus_common::motion::config::{AxisConfig, LimitBand, MachineConfig};
use motus_common::motion::state::{AxisId, SafetyState};

use motus_control::safety::SafetyVerdict;
use motus_control::scheduler::Scheduler;
use motus_hal::{SimBoard, SimWatchdog};

/// Position band wide enough that an axis resting at zero is normal.
pub const BAND: LimitBand = LimitBand {
    hard_min: -105.0,
    soft_min: -100.0,
    soft_max: 300.0,
    hard_max: 305.0,
};

pub fn linear_axis(name: &str, chain_position: u8) -> AxisConfig {
    AxisConfig {
        name: name.to_string(),
        chain_position,
        position_limits: Some(BAND),
        ..AxisConfig::default()
    }
}

pub fn rotary_axis(name: &str, chain_position: u8) -> AxisConfig {
    AxisConfig {
        name: name.to_string(),
        chain_position,
        wrap_period: Some(360.0),
        position_limits: None,
        ..AxisConfig::default()
    }
}

/// X on chain position 0, Y on chain position 1.
pub fn two_axis_machine() -> MachineConfig {
    MachineConfig::with_axes("integration", vec![linear_axis("X", 0), linear_axis("Y", 1)])
}

pub fn move_to(axis: AxisId, target: f64) -> MotorCommand {
    MotorCommand::new(axis, MotorCommandKind::MoveAbsolute { target })
}

pub struct Rig {
    pub scheduler: Scheduler,
    pub board: SimBoard,
    pub watchdog: SimWatchdog,
    tick_us: u64,
    comm_period: u32,
}

impl Rig {
    pub fn new(config: &MachineConfig) -> Self {
        Self::with_board(config, |_| {})
    }

    /// `prepare` runs on the board before the chain is initialized.
    pub fn with_board(config: &MachineConfig, prepare: impl FnOnce(&mut SimBoard)) -> Self {
        let (tx, rx) = sensor_channel();
        let mut board = SimBoard::new(config);
        board.attach_sensors(tx);
        prepare(&mut board);
        let mut watchdog = SimWatchdog::default();
        let mut scheduler = Scheduler::new(config, rx, board.get_tick()).unwrap();
        scheduler.start(&mut board, &mut watchdog).unwrap();
        Self {
            scheduler,
            board,
            watchdog,
            tick_us: u64::from(config.scheduler.tick_us),
            comm_period: config.scheduler.comm_period_ticks,
        }
    }

    /// Advance to the next tick boundary and run one tick.
    pub fn tick(&mut self) -> SafetyVerdict {
        let next = (self.board.get_tick() / self.tick_us + 1) * self.tick_us;
        self.board.advance_to(next);
        self.scheduler.tick(&mut self.board, &mut self.watchdog)
    }

    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Tick until `done` holds. Returns the ticks spent, `None` when
    /// `max_ticks` ran out first.
    pub fn run_until(&mut self, max_ticks: u32, mut done: impl FnMut(&Rig) -> bool) -> Option<u32> {
        for n in 1..=max_ticks {
            self.tick();
            if done(self) {
                return Some(n);
            }
        }
        None
    }

    /// Run until the supervisor leaves `Init` for `Safe`.
    pub fn settle(&mut self) {
        let reached = self.run_until(10, |r| r.state() == SafetyState::Safe);
        assert!(reached.is_some(), "supervisor stuck in {:?}", self.state());
    }

    pub fn state(&self) -> SafetyState {
        self.scheduler.supervisor().state()
    }

    pub fn submit(&mut self, command: MotorCommand) {
        self.scheduler.submit(command).unwrap();
    }

    /// Submit and run one communication period, which always contains
    /// exactly one queue drain.
    pub fn send(&mut self, command: MotorCommand) {
        self.submit(command);
        self.run(self.comm_period);
    }

    pub fn is_moving(&self, axis: AxisId) -> bool {
        self.scheduler.coordinator().planner().is_active(axis)
    }
}
