//! Multi-Axis Coordinator.
//!
//! Owns the axis controllers, the planner and the chain engine. Axes live
//! in one array indexed by [`AxisId`]; nothing below the coordinator holds
//! a reference back into it.
//!
//! Per tick every axis output is collected and packed into exactly one
//! chain transaction, placed by physical chain position. The bus is only
//! reachable through `&mut` to the board, so two transactions can never
//! interleave.
//!
//! Coordinated moves are planned per axis with unmodified limits, then
//! every segment is stretched to the longest duration so all axes arrive
//! together.

use heapless::Vec as HVec;
use tracing::{debug, info, warn};

use motus_common::consts::MAX_AXES;
use motus_common::hal::driver::MotionHal;
use motus_common::hal::registers::Register;
use motus_common::motion::command::{AxisTarget, MotionLimits, MotionParameters, MotorCommand, MotorCommandKind};
use motus_common::motion::config::{AxisConfig, MachineConfig};
use motus_common::motion::error::{AxisFaultFlags, ConfigurationError, CoreError, DriverFault, DriverFaultReport};
use motus_common::motion::state::AxisId;
use motus_common::motion::telemetry::AxisSnapshot;

use crate::control::AxisController;
use crate::control::angle::wrap_error;
use crate::planner::MotionPlanner;
use crate::planner::segment::{Kinematics, MotionSegment};
use crate::planner::slot::RetiredSegment;
use crate::protocol::{ChainEngine, DriverCommand};
use crate::safety::SafetyVerdict;

/// Speed-scale changes smaller than this do not trigger a replan.
const SCALE_EPSILON: f64 = 1e-9;

/// Outcome of one motor-control tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotorReport {
    /// Axes whose driver reported new fault flags this tick.
    pub driver_faults: HVec<DriverFaultReport, MAX_AXES>,
    /// Transaction failure after every retry.
    pub error: Option<CoreError>,
    /// Segments that reached their end time.
    pub completed: HVec<(AxisId, RetiredSegment), MAX_AXES>,
    /// Tick at which an all-stop transaction was handed to the bus.
    pub stop_issued_at: Option<u64>,
    /// Transfer attempts used by the transaction.
    pub attempts: u8,
}

impl MotorReport {
    /// Whether the bus transaction went through.
    #[inline]
    pub fn transaction_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ─── Coordinator ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Coordinator {
    axes: HVec<AxisController, MAX_AXES>,
    axis_configs: Vec<AxisConfig>,
    /// Chain position → axis index.
    chain_order: [usize; MAX_AXES],
    planner: MotionPlanner,
    engine: ChainEngine,
    /// Fault ramp-down already planned.
    stopping: bool,
    speed_scale: f64,
    /// Driver flags last reported per axis, for edge detection.
    reported: [DriverFault; MAX_AXES],
}

impl Coordinator {
    /// Build from a validated machine configuration.
    pub fn new(config: &MachineConfig, now_us: u64) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let tick_s = config.scheduler.tick_s();
        let mut axes = HVec::new();
        let mut chain_order = [0usize; MAX_AXES];
        for (i, axis) in config.axes.iter().enumerate() {
            let controller = AxisController::new(i as AxisId, axis, tick_s, now_us)?;
            if axes.push(controller).is_err() {
                return Err(ConfigurationError::OutOfRange {
                    field: "axes",
                    value: config.axes.len() as f64,
                    min: 1.0,
                    max: MAX_AXES as f64,
                });
            }
            chain_order[usize::from(axis.chain_position)] = i;
        }
        Ok(Self {
            axes,
            axis_configs: config.axes.clone(),
            chain_order,
            planner: MotionPlanner::new(),
            engine: ChainEngine::new(&config.chain, config.axes.len())?,
            stopping: false,
            speed_scale: 1.0,
            reported: [DriverFault::empty(); MAX_AXES],
        })
    }

    /// Configure every driver on the chain, then hold each axis where it stands.
    pub fn initialize<H: MotionHal + ?Sized>(&mut self, hal: &mut H) -> Result<(), CoreError> {
        self.engine.initialize(hal, &self.axis_configs)?;
        let now = hal.get_tick();
        for axis in &mut self.axes {
            axis.hold_here(now);
        }
        info!(axes = self.axes.len(), "chain initialized");
        Ok(())
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[inline]
    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    #[inline]
    pub fn axis(&self, id: AxisId) -> Option<&AxisController> {
        self.axes.get(usize::from(id))
    }

    #[inline]
    pub fn axes(&self) -> &[AxisController] {
        &self.axes
    }

    #[inline]
    pub fn planner(&self) -> &MotionPlanner {
        &self.planner
    }

    #[inline]
    pub fn engine(&self) -> &ChainEngine {
        &self.engine
    }

    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Feed a primary angle sample. Samples for unknown axes are dropped.
    pub fn ingest_sample(&mut self, axis: AxisId, position: f64, tick_us: u64) {
        if let Some(a) = self.axes.get_mut(usize::from(axis)) {
            a.ingest_sample(position, tick_us);
        }
    }

    /// Telemetry copies of every axis.
    pub fn snapshots(&self) -> HVec<AxisSnapshot, MAX_AXES> {
        self.axes
            .iter()
            .map(|a| a.snapshot(self.planner.is_active(a.id())))
            .collect()
    }

    fn index(&self, axis: AxisId) -> Result<usize, ConfigurationError> {
        let i = usize::from(axis);
        if i < self.axes.len() {
            Ok(i)
        } else {
            Err(ConfigurationError::OutOfRange {
                field: "axis_id",
                value: f64::from(axis),
                min: 0.0,
                max: (self.axes.len() - 1) as f64,
            })
        }
    }

    /// Where a new segment for `axis` starts: the current setpoint when a
    /// segment is running, otherwise rest at the held position.
    fn start_state(&self, i: usize, now_us: u64) -> Kinematics {
        self.planner
            .sample(i as AxisId, now_us)
            .unwrap_or_else(|| Kinematics::at_rest(self.axes[i].state().commanded_position))
    }

    /// Absolute target for `axis`: shortest path on wrapping axes, soft
    /// band check otherwise.
    fn resolve_target(&self, i: usize, from: f64, target: f64) -> Result<f64, ConfigurationError> {
        ConfigurationError::check_range("target", target, f64::MIN, f64::MAX)?;
        let config = self.axes[i].config();
        if let Some(period) = config.wrap_period {
            return Ok(from + wrap_error(target, from, Some(period)));
        }
        match config.position_limits {
            Some(band) if !band.contains_soft(target) => Err(ConfigurationError::OutOfRange {
                field: "target",
                value: target,
                min: band.soft_min,
                max: band.soft_max,
            }),
            _ => Ok(target),
        }
    }

    fn check_movable(&self, i: usize) -> Result<(), ConfigurationError> {
        let axis = &self.axes[i];
        if axis.is_forced_stop() {
            return Err(ConfigurationError::Invalid {
                field: "axis_id",
                reason: "axis force-stopped after a driver fault",
            });
        }
        if axis.is_tuning() {
            return Err(ConfigurationError::Invalid {
                field: "axis_id",
                reason: "auto-tune running",
            });
        }
        Ok(())
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Apply one inbound command. Rejected commands leave every axis as it was.
    ///
    /// Emergency stop and reset belong to the safety supervisor and are
    /// rejected here.
    pub fn handle_command(
        &mut self,
        command: &MotorCommand,
        verdict: &SafetyVerdict,
        now_us: u64,
    ) -> Result<(), ConfigurationError> {
        if command.kind.starts_motion() && !verdict.allow_motion {
            return Err(ConfigurationError::Invalid {
                field: "command",
                reason: "motion not permitted in the current safety state",
            });
        }
        let scale = verdict.speed_scale;
        match &command.kind {
            MotorCommandKind::MoveAbsolute { target } => {
                self.move_axis(command.axis_id, false, *target, &command.parameters, scale, now_us)
            }
            MotorCommandKind::MoveRelative { distance } => {
                let i = self.index(command.axis_id)?;
                let base = self
                    .planner
                    .active(command.axis_id)
                    .map(|s| s.end.position)
                    .unwrap_or(self.axes[i].state().commanded_position);
                self.move_axis(command.axis_id, true, base + *distance, &command.parameters, scale, now_us)
            }
            MotorCommandKind::CoordinatedMove { targets } => {
                self.coordinated_move(targets, &command.parameters, scale, now_us)
            }
            MotorCommandKind::Stop => self.stop_axis(command.axis_id, now_us),
            MotorCommandKind::StartAutotune => {
                let i = self.index(command.axis_id)?;
                let active = self.planner.is_active(command.axis_id);
                self.axes[i].start_autotune(now_us, active)
            }
            MotorCommandKind::ApplyTunedGains => {
                let i = self.index(command.axis_id)?;
                let active = self.planner.is_active(command.axis_id);
                self.axes[i].apply_proposed_gains(active).map(|_| ())
            }
            MotorCommandKind::EmergencyStop | MotorCommandKind::ResetEmergency => Err(ConfigurationError::Invalid {
                field: "command",
                reason: "handled by the safety supervisor",
            }),
        }
    }

    fn move_axis(
        &mut self,
        axis: AxisId,
        relative: bool,
        target: f64,
        parameters: &MotionParameters,
        scale: f64,
        now_us: u64,
    ) -> Result<(), ConfigurationError> {
        let i = self.index(axis)?;
        self.check_movable(i)?;
        let limits = parameters.resolve(self.axes[i].config())?.with_velocity_scale(scale);
        let start = self.start_state(i, now_us);
        // Relative moves on wrapping axes keep their full distance.
        let target = if relative && self.axes[i].config().wrap_period.is_some() {
            target
        } else {
            self.resolve_target(i, start.position, target)?
        };
        let segment = self.planner.start_move(axis, start, target, &limits, now_us)?;
        debug!(axis, id = segment.id, target, duration = segment.duration, "move planned");
        Ok(())
    }

    fn coordinated_move(
        &mut self,
        targets: &[AxisTarget],
        parameters: &MotionParameters,
        scale: f64,
        now_us: u64,
    ) -> Result<(), ConfigurationError> {
        if targets.is_empty() {
            return Err(ConfigurationError::Invalid {
                field: "targets",
                reason: "coordinated move needs at least one axis",
            });
        }
        let mut seen = [false; MAX_AXES];
        let mut segments: HVec<MotionSegment, MAX_AXES> = HVec::new();
        for t in targets {
            let i = self.index(t.axis)?;
            if core::mem::replace(&mut seen[i], true) {
                return Err(ConfigurationError::Invalid {
                    field: "targets",
                    reason: "axis listed twice",
                });
            }
            self.check_movable(i)?;
            if self.planner.is_active(t.axis) {
                return Err(ConfigurationError::Invalid {
                    field: "targets",
                    reason: "coordinated moves start only from rest",
                });
            }
            let limits: MotionLimits = parameters.resolve(self.axes[i].config())?.with_velocity_scale(scale);
            let from = self.axes[i].state().commanded_position;
            let target = self.resolve_target(i, from, t.position)?;
            let segment = self
                .planner
                .build_move(t.axis, Kinematics::at_rest(from), target, &limits, now_us)?;
            // Capacity equals MAX_AXES and axes are distinct.
            let _ = segments.push(segment);
        }

        let common = segments.iter().map(|s| s.duration).fold(0.0, f64::max);
        for segment in &mut segments {
            if segment.is_zero_duration() || segment.duration >= common {
                continue;
            }
            *segment = segment
                .time_scaled(common / segment.duration)
                .ok_or(ConfigurationError::Invalid {
                    field: "targets",
                    reason: "segment cannot be time-scaled",
                })?;
        }
        for segment in segments {
            self.planner.install(segment, now_us)?;
        }
        info!(axes = targets.len(), duration = common, "coordinated move planned");
        Ok(())
    }

    fn stop_axis(&mut self, axis: AxisId, now_us: u64) -> Result<(), ConfigurationError> {
        let i = self.index(axis)?;
        self.axes[i].abort_autotune();
        self.plan_stop(i, now_us)
    }

    /// Replace the active segment of axis `i` with a controlled stop.
    fn plan_stop(&mut self, i: usize, now_us: u64) -> Result<(), ConfigurationError> {
        let axis = i as AxisId;
        let Some(active) = self.planner.active(axis) else {
            return Ok(());
        };
        let limits = active.limits;
        let here = active.sample(now_us);
        self.planner.start_stop(axis, here, &limits, now_us)
    }

    // ─── Safety verdict ─────────────────────────────────────────────

    /// React to this tick's safety verdict before outputs are computed.
    pub fn apply_verdict(&mut self, verdict: &SafetyVerdict, now_us: u64) {
        if verdict.emergency {
            let cancelled = self.planner.cancel_all(now_us);
            if cancelled > 0 {
                warn!(cancelled, "emergency stop: every segment cancelled");
            }
            for axis in &mut self.axes {
                axis.abort_autotune();
            }
            self.stopping = true;
            return;
        }
        if verdict.stop_all {
            if !self.stopping {
                self.stopping = true;
                for i in 0..self.axes.len() {
                    self.axes[i].abort_autotune();
                    if let Err(e) = self.plan_stop(i, now_us) {
                        warn!(axis = i, error = %e, "stop ramp not plannable, holding position");
                        self.planner.cancel(i as AxisId, now_us);
                    }
                }
                info!("fault: every axis ramping down");
            }
            return;
        }
        if verdict.speed_scale + SCALE_EPSILON < self.speed_scale {
            self.replan_scaled(verdict.speed_scale, now_us);
        }
        self.speed_scale = verdict.speed_scale;
    }

    /// Re-plan running segments whose velocity limit exceeds the reduced scale.
    fn replan_scaled(&mut self, scale: f64, now_us: u64) {
        for i in 0..self.axes.len() {
            let axis = i as AxisId;
            let Some(active) = self.planner.active(axis) else {
                continue;
            };
            let cap = self.axes[i].config().max_velocity * scale;
            if active.limits.velocity <= cap {
                continue;
            }
            let limits = MotionLimits {
                velocity: cap,
                ..active.limits
            };
            let here = active.sample(now_us);
            let target = active.end.position;
            match self.planner.start_move(axis, here, target, &limits, now_us) {
                Ok(seg) => debug!(axis, id = seg.id, velocity = cap, "segment replanned at reduced speed"),
                Err(e) => warn!(axis, error = %e, "reduced-speed replan failed"),
            }
        }
    }

    /// Hold every axis where it stands after an emergency reset.
    pub fn reset_after_emergency(&mut self, now_us: u64) {
        self.planner.cancel_all(now_us);
        for axis in &mut self.axes {
            axis.clear_forced_stop();
            axis.set_fault(AxisFaultFlags::COMM_FAULT, false);
            axis.hold_here(now_us);
        }
        self.reported = [DriverFault::empty(); MAX_AXES];
        self.stopping = false;
        self.speed_scale = 1.0;
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// Compute every axis output and send them in one transaction.
    pub fn control_tick<H: MotionHal + ?Sized>(
        &mut self,
        hal: &mut H,
        verdict: &SafetyVerdict,
        now_us: u64,
    ) -> MotorReport {
        let mut report = MotorReport {
            completed: self.planner.retire_finished(now_us),
            ..Default::default()
        };
        for (axis, done) in &report.completed {
            debug!(axis, id = done.id, status = ?done.status, "segment complete");
        }

        let len = self.axes.len();
        let mut commands = [DriverCommand::Stop; MAX_AXES];
        for (i, axis) in self.axes.iter_mut().enumerate() {
            let setpoint = self.planner.sample(i as AxisId, now_us);
            let out = axis.update(now_us, setpoint, verdict.speed_scale);
            let position = usize::from(axis.config().chain_position);
            commands[position] = if verdict.emergency {
                DriverCommand::Stop
            } else {
                out.command
            };
        }

        let issued_at = hal.get_tick();
        match self.engine.transact(hal, &commands[..len]) {
            Ok(reply) => {
                report.attempts = reply.attempts;
                if commands[..len].iter().all(|c| matches!(c, DriverCommand::Stop)) {
                    report.stop_issued_at = Some(issued_at);
                }
                for position in 0..len {
                    let i = self.chain_order[position];
                    self.axes[i].set_fault(AxisFaultFlags::COMM_FAULT, false);
                    let drv_status_read = reply.decoded_at(position) == Some(Register::DrvStatus);
                    self.absorb_faults(i, reply.faults_at(position), drv_status_read, now_us, &mut report);
                }
            }
            Err(e) => {
                warn!(error = %e, "motor control transaction failed");
                for axis in &mut self.axes {
                    axis.set_fault(AxisFaultFlags::COMM_FAULT, true);
                }
                report.error = Some(e);
            }
        }
        report
    }

    /// Handle the decoded faults of axis `i`. Only flags not reported
    /// before are passed on; a clean DRV_STATUS read re-arms reporting.
    fn absorb_faults(&mut self, i: usize, faults: DriverFault, drv_status_read: bool, now_us: u64, report: &mut MotorReport) {
        if faults.is_empty() {
            if drv_status_read {
                self.reported[i] = DriverFault::empty();
                if !self.axes[i].is_forced_stop() {
                    self.axes[i].set_fault(AxisFaultFlags::DRIVER_FAULT, false);
                }
            }
            return;
        }
        let fresh = faults.difference(self.reported[i]);
        self.reported[i] |= faults;
        if fresh.is_empty() {
            return;
        }
        let axis = i as AxisId;
        self.axes[i].set_fault(AxisFaultFlags::DRIVER_FAULT, true);
        if faults.is_destructive() {
            self.axes[i].force_stop();
            self.planner.cancel(axis, now_us);
        }
        warn!(axis, ?faults, "driver fault reported");
        let _ = report.driver_faults.push(DriverFaultReport { axis, faults });
    }
}
