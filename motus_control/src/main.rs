//! # motus Control Unit
//!
//! Host binary running the control core against the simulated board.
//!
//! Loads `config/machine.toml` (or `--config`), brings up the driver chain,
//! optionally performs RT setup, queues the moves given with `--move` once
//! the supervisor reports `Safe`, and prints every telemetry snapshot as
//! one JSON line on stdout. A final summary line follows on exit.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, ValueEnum};
use heapless::Vec as HVec;
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use motus_common::consts::{DEFAULT_CONFIG_PATH, MAX_AXES};
use motus_common::hal::driver::MotionHal;
use motus_common::hal::types::sensor_channel;
use motus_common::motion::command::{AxisTarget, MotionParameters, MotorCommand, MotorCommandKind};
use motus_common::motion::config::MachineConfig;
use motus_common::motion::error::ConfigurationError;
use motus_common::motion::state::{AxisId, FaultCode, ProfileKind, SafetyState};
use motus_common::motion::telemetry::TelemetryCounters;
use motus_control::config::{check_board, load_config};
use motus_control::scheduler::{Pacer, Scheduler, TaskId, rt_setup};
use motus_hal::{SimBoard, SimWatchdog};

/// Ticks allowed for the supervisor to leave `Init` before moves are dropped.
const STARTUP_TICKS: u64 = 100;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Trapezoid,
    Scurve,
}

impl From<ProfileArg> for ProfileKind {
    fn from(p: ProfileArg) -> Self {
        match p {
            ProfileArg::Trapezoid => ProfileKind::Trapezoidal,
            ProfileArg::Scurve => ProfileKind::Scurve,
        }
    }
}

/// motus Control Unit - multi-axis stepper core on a simulated board
#[derive(Parser, Debug)]
#[command(name = "motus_control")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Real-time multi-axis stepper positioning with safety interlocks")]
struct Args {
    /// Path to the machine configuration TOML.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of ticks to run; runs until Ctrl-C when absent.
    #[arg(long)]
    ticks: Option<u64>,

    /// Absolute move, by axis name or index (repeatable).
    #[arg(long = "move", value_name = "AXIS=POS", value_parser = parse_move)]
    moves: Vec<(String, f64)>,

    /// Send all moves as one coordinated move.
    #[arg(long)]
    coordinated: bool,

    /// Profile override for the moves.
    #[arg(long, value_enum)]
    profile: Option<ProfileArg>,

    /// Telemetry period in ticks (overrides the configuration).
    #[arg(long, value_name = "TICKS")]
    telemetry_every: Option<u32>,

    /// Pace ticks to the wall clock instead of running as fast as possible.
    #[arg(long)]
    realtime: bool,

    /// CPU core to pin the tick loop to (`rt` feature).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (`rt` feature).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn parse_move(s: &str) -> Result<(String, f64), String> {
    let (axis, pos) = s.split_once('=').ok_or_else(|| format!("expected AXIS=POS, got '{s}'"))?;
    let pos: f64 = pos.trim().parse().map_err(|e| format!("bad position '{pos}': {e}"))?;
    if axis.trim().is_empty() {
        return Err("empty axis name".to_string());
    }
    Ok((axis.trim().to_string(), pos))
}

/// Final line printed on exit.
#[derive(Debug, Serialize)]
struct RunSummary {
    ticks: u64,
    state: SafetyState,
    fault_code: FaultCode,
    positions: Vec<f64>,
    counters: TelemetryCounters,
    tick_avg_us: u64,
    tick_max_us: u64,
    control_max_us: u64,
    watchdog_refreshes: u64,
    late_wakeups: u64,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("motus Control Unit v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("motus Control Unit shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load_config(&args.config)?;
    let mut machine = loaded.machine;
    if let Some(every) = args.telemetry_every {
        machine.scheduler.telemetry_period_ticks = every;
        machine.validate()?;
    }
    let commands = build_commands(&machine, args)?;

    let mut board = SimBoard::new(&machine);
    check_board(&machine, &board.info())?;
    let (tx, rx) = sensor_channel();
    board.attach_sensors(tx);
    let mut watchdog = SimWatchdog::default();

    let mut scheduler = Scheduler::new(&machine, rx, board.get_tick())?;

    if args.realtime {
        rt_setup(args.cpu_core, args.rt_priority)?;
        info!(cpu_core = args.cpu_core, priority = args.rt_priority, "RT setup complete");
    }

    scheduler.start(&mut board, &mut watchdog)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let tick_us = u64::from(machine.scheduler.tick_us);
    let mut pacer = if args.realtime {
        Some(Pacer::new(machine.scheduler.tick_us)?)
    } else {
        None
    };
    let mut pending = Some(commands);
    let mut executed = 0u64;

    while running.load(Ordering::SeqCst) && args.ticks.is_none_or(|n| executed < n) {
        let next = (board.get_tick() / tick_us + 1) * tick_us;
        board.advance_to(next);
        scheduler.tick(&mut board, &mut watchdog);
        executed += 1;

        if scheduler.supervisor().state() == SafetyState::Safe {
            if let Some(commands) = pending.take() {
                for command in commands {
                    scheduler.submit(command)?;
                }
            }
        } else if executed == STARTUP_TICKS && pending.is_some() {
            warn!(state = ?scheduler.supervisor().state(), "supervisor not Safe after startup, moves dropped");
            pending = None;
        }

        while let Some(snapshot) = scheduler.pop_telemetry() {
            println!("{}", serde_json::to_string(&snapshot)?);
        }
        if let Some(p) = pacer.as_mut() {
            p.wait();
        }
    }

    let tick = scheduler.tick_stats();
    let summary = RunSummary {
        ticks: executed,
        state: scheduler.supervisor().state(),
        fault_code: scheduler.supervisor().fault_code(),
        positions: (0..machine.axis_count()).map(|a| board.axis_position(a as AxisId)).collect(),
        counters: scheduler.counters(),
        tick_avg_us: tick.avg_us(),
        tick_max_us: tick.max_us,
        control_max_us: scheduler.task_stats(TaskId::MotorControl).max_us,
        watchdog_refreshes: watchdog.refreshes(),
        late_wakeups: pacer.as_ref().map_or(0, Pacer::late),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

/// Resolve `--move` arguments against the configured axes.
fn build_commands(machine: &MachineConfig, args: &Args) -> Result<Vec<MotorCommand>, ConfigurationError> {
    let parameters = MotionParameters {
        profile: args.profile.map(ProfileKind::from),
        ..Default::default()
    };
    let mut targets: HVec<AxisTarget, MAX_AXES> = HVec::new();
    for (name, position) in &args.moves {
        let axis = resolve_axis(machine, name)?;
        targets
            .push(AxisTarget {
                axis,
                position: *position,
            })
            .map_err(|_| ConfigurationError::Invalid {
                field: "move",
                reason: "more moves than axes",
            })?;
    }
    if args.coordinated && !targets.is_empty() {
        let command = MotorCommand::new(0, MotorCommandKind::CoordinatedMove { targets }).with_parameters(parameters);
        return Ok(vec![command]);
    }
    Ok(targets
        .iter()
        .map(|t| MotorCommand::new(t.axis, MotorCommandKind::MoveAbsolute { target: t.position }).with_parameters(parameters))
        .collect())
}

fn resolve_axis(machine: &MachineConfig, name: &str) -> Result<AxisId, ConfigurationError> {
    if let Some(i) = machine.axes.iter().position(|a| a.name == name) {
        return Ok(i as AxisId);
    }
    match name.parse::<AxisId>() {
        Ok(i) if usize::from(i) < machine.axis_count() => Ok(i),
        _ => Err(ConfigurationError::Invalid {
            field: "move",
            reason: "unknown axis",
        }),
    }
}

/// Setup tracing subscriber based on CLI arguments.
///
/// Logs go to stderr so stdout carries only telemetry.
fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
