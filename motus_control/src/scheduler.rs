//! Scheduler.
//!
//! Single-threaded cooperative tick dispatcher. Every tick runs, in order:
//!
//! | Task | Period | Work |
//! |------|--------|------|
//! | Safety | every tick | watchdog check, sensor drain, supervisor evaluation, enable/lamp outputs |
//! | Motor Control | every tick | verdict reaction, axis updates, one chain transaction |
//! | Communication | `comm_period_ticks` | inbound command queue |
//! | Telemetry | `telemetry_period_ticks` | outbound snapshot |
//!
//! The safety verdict of tick N is handed by value to motor control of
//! tick N, so no command is ever issued against a stale verdict. The
//! watchdog is refreshed only at the end of a tick whose transaction went
//! through and whose deadline was met.

pub mod feedback;
pub mod rt;
pub mod stats;

use heapless::Deque;
use tracing::{debug, error, info, warn};

use motus_common::consts::{COMMAND_QUEUE_DEPTH, TELEMETRY_QUEUE_DEPTH};
use motus_common::hal::driver::{IndependentWatchdog, MotionHal};
use motus_common::hal::types::{Pin, SensorConsumer};
use motus_common::motion::command::{MotorCommand, MotorCommandKind};
use motus_common::motion::config::{MachineConfig, SchedulerConfig};
use motus_common::motion::error::{ConfigurationError, CoreError, ResourceError};
use motus_common::motion::state::{FaultCode, SafetyState};
use motus_common::motion::telemetry::{TelemetryCounters, TelemetrySnapshot};

use crate::control::fusion::SampleQuality;
use crate::coordinator::{Coordinator, MotorReport};
use crate::error::propagation::{TICK_DEADLINE, classify, classify_resource};
use crate::safety::channels::AxisReadings;
use crate::safety::watchdog::WatchdogStatus;
use crate::safety::{SafetyInputs, SafetySupervisor, SafetyVerdict, WatchdogGate};

pub use feedback::FeedbackHub;
pub use rt::{Pacer, RtError, rt_setup};
pub use stats::{CycleStats, TaskId};

pub struct Scheduler {
    config: SchedulerConfig,
    supervisor: SafetySupervisor,
    coordinator: Coordinator,
    watchdog: WatchdogGate,
    feedback: FeedbackHub,
    sensors: SensorConsumer,
    commands: Deque<MotorCommand, COMMAND_QUEUE_DEPTH>,
    telemetry: Deque<TelemetrySnapshot, TELEMETRY_QUEUE_DEPTH>,
    counters: TelemetryCounters,
    task_stats: [CycleStats; TaskId::COUNT],
    tick_stats: CycleStats,
    tick_index: u64,
    started: bool,
}

impl Scheduler {
    /// Build every component from a validated configuration.
    pub fn new(config: &MachineConfig, sensors: SensorConsumer, now_us: u64) -> Result<Self, ConfigurationError> {
        let coordinator = Coordinator::new(config, now_us)?;
        Ok(Self {
            config: config.scheduler,
            supervisor: SafetySupervisor::new(config),
            coordinator,
            watchdog: WatchdogGate::new(config.safety.watchdog_timeout_ms),
            feedback: FeedbackHub::new(),
            sensors,
            commands: Deque::new(),
            telemetry: Deque::new(),
            counters: TelemetryCounters::default(),
            task_stats: [CycleStats::new(); TaskId::COUNT],
            tick_stats: CycleStats::new(),
            tick_index: 0,
            started: false,
        })
    }

    /// Initialize the driver chain, enable the drivers and arm the watchdog.
    ///
    /// On failure the drivers stay disabled and the supervisor stays in
    /// `Init`.
    pub fn start<H, W>(&mut self, hal: &mut H, watchdog: &mut W) -> Result<(), CoreError>
    where
        H: MotionHal + ?Sized,
        W: IndependentWatchdog + ?Sized,
    {
        hal.gpio_write(Pin::DriverEnable, false);
        if let Err(e) = self.coordinator.initialize(hal) {
            error!(error = %e, "chain initialization failed, drivers left disabled");
            hal.gpio_write(Pin::FaultLamp, true);
            return Err(e);
        }
        hal.gpio_write(Pin::FaultLamp, false);
        hal.gpio_write(Pin::DriverEnable, true);
        self.watchdog.start(watchdog, hal.get_tick());
        self.feedback.arm(hal.get_tick());
        self.started = true;
        info!(board = hal.info().name, axes = self.coordinator.axis_count(), tick_us = self.config.tick_us, "scheduler started");
        Ok(())
    }

    // ─── Queues ─────────────────────────────────────────────────────

    /// Queue an inbound command for the next communication task.
    pub fn submit(&mut self, command: MotorCommand) -> Result<(), ResourceError> {
        self.commands.push_back(command).map_err(|_| {
            self.counters.dropped_commands += 1;
            warn!(dropped = self.counters.dropped_commands, "command queue full, command dropped");
            ResourceError::QueueFull { queue: "command" }
        })
    }

    /// Oldest queued telemetry snapshot.
    pub fn pop_telemetry(&mut self) -> Option<TelemetrySnapshot> {
        self.telemetry.pop_front()
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[inline]
    pub fn supervisor(&self) -> &SafetySupervisor {
        &self.supervisor
    }

    #[inline]
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    #[inline]
    pub fn watchdog(&self) -> &WatchdogGate {
        &self.watchdog
    }

    #[inline]
    pub fn feedback(&self) -> &FeedbackHub {
        &self.feedback
    }

    #[inline]
    pub fn counters(&self) -> TelemetryCounters {
        self.counters
    }

    #[inline]
    pub fn task_stats(&self, task: TaskId) -> &CycleStats {
        &self.task_stats[task.index()]
    }

    #[inline]
    pub fn tick_stats(&self) -> &CycleStats {
        &self.tick_stats
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// Run one tick. Returns the verdict motor control acted on.
    pub fn tick<H, W>(&mut self, hal: &mut H, watchdog: &mut W) -> SafetyVerdict
    where
        H: MotionHal + ?Sized,
        W: IndependentWatchdog + ?Sized,
    {
        if !self.started {
            return self.supervisor.verdict();
        }
        let tick_start = hal.get_tick();
        self.counters.ticks += 1;

        let verdict = self.safety_task(hal, watchdog, tick_start);
        self.finish_task(TaskId::Safety, tick_start, hal.get_tick());

        let control_start = hal.get_tick();
        let report = self.motor_control_task(hal, &verdict, tick_start);
        self.finish_task(TaskId::MotorControl, control_start, hal.get_tick());

        if self.tick_index % u64::from(self.config.comm_period_ticks) == 0 {
            let comm_start = hal.get_tick();
            self.communication_task(hal, tick_start);
            self.finish_task(TaskId::Communication, comm_start, hal.get_tick());
        }

        if self.tick_index % u64::from(self.config.telemetry_period_ticks) == 0 {
            let telemetry_start = hal.get_tick();
            self.telemetry_task(tick_start);
            self.finish_task(TaskId::Telemetry, telemetry_start, hal.get_tick());
        }

        let tick_end = hal.get_tick();
        let met_deadline = self.check_deadline(tick_start, tick_end);
        if report.transaction_ok() && met_deadline {
            self.watchdog.cycle_succeeded(watchdog, tick_end);
        }
        self.tick_index += 1;
        verdict
    }

    fn safety_task<H, W>(&mut self, hal: &mut H, watchdog: &mut W, now_us: u64) -> SafetyVerdict
    where
        H: MotionHal + ?Sized,
        W: IndependentWatchdog + ?Sized,
    {
        if let WatchdogStatus::Late(age_us) = self.watchdog.check(watchdog, now_us) {
            debug!(age_us, "watchdog refresh late");
        }
        self.counters.watchdog_misses = self.watchdog.misses();

        let coordinator = &mut self.coordinator;
        let drained = self
            .feedback
            .drain(&mut self.sensors, |axis, position, tick_us| coordinator.ingest_sample(axis, position, tick_us));
        if drained.overflowed {
            self.counters.dropped_sensor_events += 1;
            let escalated = classify_resource(&ResourceError::QueueFull { queue: "sensor" }, 1, 1);
            self.supervisor.escalate(escalated, now_us);
        }

        let inputs = self.safety_inputs(hal.gpio_read(Pin::EmergencyInput) || drained.emergency_asserted, now_us);
        let verdict = self.supervisor.evaluate(&inputs, now_us);

        if verdict.emergency {
            hal.gpio_write(Pin::DriverEnable, false);
        }
        hal.gpio_write(
            Pin::FaultLamp,
            matches!(verdict.state, SafetyState::Fault | SafetyState::EmergencyStop),
        );
        verdict
    }

    fn safety_inputs(&self, emergency_input: bool, now_us: u64) -> SafetyInputs {
        let mut inputs = SafetyInputs {
            emergency_input,
            supply_voltage: self.feedback.supply_voltage(),
            ..Default::default()
        };
        let armed_us = self.feedback.armed_us();
        for axis in self.coordinator.axes() {
            let m = axis.measurement(now_us);
            let hub = self.feedback.axis(axis.id()).copied().unwrap_or_default();
            let lost = m.quality == SampleQuality::Lost;
            let readings = AxisReadings {
                position: (!lost).then_some(m.position),
                speed: m.velocity,
                current: hub.current,
                temperature: hub.temperature,
                redundant_pair: hub.redundant_pair(),
                lost_for_us: lost.then_some(m.age_us),
                redundant_missing: hub.redundant_missing(),
                current_age_us: Some(hub.current_age_us(now_us, armed_us)),
                temperature_age_us: Some(hub.temperature_age_us(now_us, armed_us)),
            };
            let _ = inputs.axes.push(readings);
        }
        inputs
    }

    fn motor_control_task<H>(&mut self, hal: &mut H, verdict: &SafetyVerdict, now_us: u64) -> MotorReport
    where
        H: MotionHal + ?Sized,
    {
        self.coordinator.apply_verdict(verdict, now_us);
        let report = self.coordinator.control_tick(hal, verdict, now_us);

        if let Some(issued_at) = report.stop_issued_at {
            self.supervisor.note_stop_issued(issued_at);
        }
        for fault in &report.driver_faults {
            self.supervisor.report_driver_fault(fault, now_us);
        }
        if let Some(err) = &report.error {
            if let Some(escalated) = classify(err) {
                warn!(error = %err, escalation = ?escalated.escalation, "chain transaction failed");
                self.supervisor.escalate(escalated, now_us);
            }
        }
        let chain = self.coordinator.engine().stats();
        self.counters.comm_retries = chain.retries;
        self.counters.comm_failures = chain.failures;
        self.counters.estop_latency_violations = self.supervisor.latency().violations();
        report
    }

    fn communication_task<H>(&mut self, hal: &mut H, now_us: u64)
    where
        H: MotionHal + ?Sized,
    {
        while let Some(command) = self.commands.pop_front() {
            let result = match command.kind {
                MotorCommandKind::EmergencyStop => {
                    self.supervisor.trigger_emergency(FaultCode::SoftwareEmergency, now_us);
                    Ok(())
                }
                MotorCommandKind::ResetEmergency => self.reset_emergency(hal, now_us),
                _ => {
                    let verdict = self.supervisor.verdict();
                    self.coordinator.handle_command(&command, &verdict, now_us)
                }
            };
            if let Err(e) = result {
                self.counters.rejected_commands += 1;
                warn!(axis = command.axis_id, kind = ?command.kind, error = %e, "command rejected");
            }
        }
    }

    fn reset_emergency<H>(&mut self, hal: &mut H, now_us: u64) -> Result<(), ConfigurationError>
    where
        H: MotionHal + ?Sized,
    {
        let confirmed_clear = hal.gpio_read(Pin::ResetConfirm) && !hal.gpio_read(Pin::EmergencyInput);
        self.supervisor.reset_emergency(confirmed_clear, now_us)?;
        self.coordinator.reset_after_emergency(now_us);
        hal.gpio_write(Pin::FaultLamp, false);
        hal.gpio_write(Pin::DriverEnable, true);
        info!("emergency stop reset, drivers re-enabled");
        Ok(())
    }

    fn telemetry_task(&mut self, now_us: u64) {
        let snapshot = TelemetrySnapshot {
            timestamp_us: now_us,
            safety: self.supervisor.snapshot(self.watchdog.age_us(now_us)),
            axes: self.coordinator.snapshots(),
            counters: self.counters,
        };
        if self.telemetry.is_full() {
            self.telemetry.pop_front();
        }
        let _ = self.telemetry.push_back(snapshot);
    }

    // ─── Timing ─────────────────────────────────────────────────────

    fn budget_us(&self, task: TaskId) -> u64 {
        u64::from(match task {
            TaskId::Safety => self.config.safety_budget_us,
            TaskId::MotorControl => self.config.control_budget_us,
            TaskId::Communication => self.config.comm_budget_us,
            TaskId::Telemetry => self.config.telemetry_budget_us,
        })
    }

    fn finish_task(&mut self, task: TaskId, started_us: u64, now_us: u64) {
        let budget = self.budget_us(task);
        let stats = &mut self.task_stats[task.index()];
        let Some(overrun_us) = stats.record(now_us.saturating_sub(started_us), budget) else {
            return;
        };
        let consecutive = stats.consecutive_overruns;
        self.counters.task_overruns += 1;
        let escalated = classify_resource(
            &ResourceError::DeadlineMiss {
                task: task.name(),
                overrun_us,
            },
            consecutive,
            self.config.overrun_threshold,
        );
        debug!(task = task.name(), overrun_us, consecutive, "task overran its budget");
        if escalated.escalation.affects_state() {
            warn!(task = task.name(), consecutive, "repeated task overruns");
            self.supervisor.escalate(escalated, now_us);
        }
    }

    /// Returns `false` on a missed tick deadline.
    fn check_deadline(&mut self, tick_start: u64, tick_end: u64) -> bool {
        let Some(overrun_us) = self
            .tick_stats
            .record(tick_end.saturating_sub(tick_start), u64::from(self.config.tick_us))
        else {
            return true;
        };
        self.counters.deadline_misses += 1;
        let consecutive = self.tick_stats.consecutive_overruns;
        let escalated = classify_resource(
            &ResourceError::DeadlineMiss {
                task: TICK_DEADLINE,
                overrun_us,
            },
            consecutive,
            self.config.deadline_miss_threshold,
        );
        warn!(overrun_us, consecutive, "tick deadline missed");
        if escalated.escalation.affects_state() {
            self.supervisor.escalate(escalated, tick_end);
        }
        false
    }
}
