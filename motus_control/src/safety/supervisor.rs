//! Safety supervisor state machine.
//!
//! ```text
//! Init ──clean──▶ Safe ──soft──▶ Warning ──hard / timeout──▶ Fault
//!                  ▲               │
//!                  └────clean──────┘
//!   any ──emergency──▶ EmergencyStop ──reset (confirmed clear)──▶ Init
//! ```
//!
//! Every state change goes through [`transition`], which only knows the
//! edges above. A hard crossing seen from `Safe` walks through `Warning`
//! in the same evaluation. `Fault` has no automatic exit.
//!
//! Escalations that arrive while already at or above their severity only
//! bump counters; the recorded fault code keeps the first cause.

use heapless::Vec as HVec;
use tracing::{debug, error, info, warn};

use motus_common::consts::MAX_AXES;
use motus_common::motion::config::{MachineConfig, SafetyConfig};
use motus_common::motion::error::{ConfigurationError, DriverFaultReport, SafetyViolation};
use motus_common::motion::state::{AxisId, FaultCode, MonitoredChannel, SafetyState};
use motus_common::motion::telemetry::SafetySnapshot;

use super::channels::{AxisReadings, AxisThresholds, ChannelMonitor};
use super::dual_channel::{DualChannelCheck, DualChannelStatus};
use super::latch::{EmergencyReader, EmergencyWriter, LatencyMonitor, emergency_latch};
use crate::error::propagation::{Escalated, Escalation, classify_driver, classify_violation};

/// How long a warning raised outside the channel monitor is held [µs].
const EXTERNAL_WARNING_HOLD_US: u64 = 100_000;

// ─── Edge table ─────────────────────────────────────────────────────

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyEvent {
    /// Evaluation found nothing beyond a soft threshold.
    AllClear,
    /// Soft threshold crossed, or a warning-class escalation.
    SoftViolation,
    /// Hard threshold crossed, warning timeout, or a fault-class escalation.
    HardViolation,
    /// Hardware input, software command, or severe driver fault.
    Emergency,
    /// Operator reset with the trigger confirmed clear.
    Reset,
}

/// Result of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ok(SafetyState),
    Rejected(&'static str),
}

/// Apply `event` to `state`.
pub fn transition(state: SafetyState, event: SafetyEvent) -> Transition {
    use SafetyEvent as E;
    use SafetyState as S;

    let next = match (state, event) {
        (_, E::Emergency) => S::EmergencyStop,
        (S::EmergencyStop, E::Reset) => S::Init,
        (S::EmergencyStop, _) => S::EmergencyStop,
        (_, E::Reset) => return Transition::Rejected("reset only leaves emergency stop"),

        (S::Init, E::AllClear) => S::Safe,
        // No motion is possible yet; stay until a clean evaluation.
        (S::Init, E::SoftViolation | E::HardViolation) => S::Init,

        (S::Safe, E::AllClear) => S::Safe,
        (S::Safe, E::SoftViolation) => S::Warning,
        (S::Safe, E::HardViolation) => return Transition::Rejected("hard violation from Safe passes through Warning"),

        (S::Warning, E::AllClear) => S::Safe,
        (S::Warning, E::SoftViolation) => S::Warning,
        (S::Warning, E::HardViolation) => S::Fault,

        (S::Fault, _) => S::Fault,
    };
    Transition::Ok(next)
}

// ─── Inputs and verdict ─────────────────────────────────────────────

/// Everything the safety task reads in one cycle.
#[derive(Debug, Clone, Default)]
pub struct SafetyInputs {
    /// Hardware emergency input level (GPIO or ISR edge).
    pub emergency_input: bool,
    /// Latest supply voltage sample.
    pub supply_voltage: Option<f64>,
    /// Readings indexed by axis id.
    pub axes: HVec<AxisReadings, MAX_AXES>,
}

/// Published result of a safety evaluation, consumed by motor control in
/// the same tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyVerdict {
    pub state: SafetyState,
    pub fault_code: FaultCode,
    /// Velocity scale for every axis (0, 1].
    pub speed_scale: f64,
    /// New motion may be started.
    pub allow_motion: bool,
    /// Every active segment must ramp down.
    pub stop_all: bool,
    /// Every axis gets a stop command this tick.
    pub emergency: bool,
}

impl SafetyVerdict {
    pub fn new(state: SafetyState, fault_code: FaultCode, config: &SafetyConfig) -> Self {
        let speed_scale = match state {
            SafetyState::Warning => config.warning_speed_scale,
            _ => 1.0,
        };
        Self {
            state,
            fault_code,
            speed_scale,
            allow_motion: state.allows_motion(),
            stop_all: matches!(state, SafetyState::Fault),
            emergency: matches!(state, SafetyState::EmergencyStop),
        }
    }
}

// ─── Supervisor ─────────────────────────────────────────────────────

/// Owner of the safety context. Single writer of the emergency latch.
#[derive(Debug)]
pub struct SafetySupervisor {
    config: SafetyConfig,
    state: SafetyState,
    fault_code: FaultCode,
    writer: EmergencyWriter,
    latency: LatencyMonitor,
    warning_since_us: Option<u64>,
    held_warning: Option<(u64, FaultCode)>,
    monitor: ChannelMonitor,
    thresholds: HVec<AxisThresholds, MAX_AXES>,
    dual: HVec<DualChannelCheck, MAX_AXES>,
    destructive_counts: [u32; MAX_AXES],
    absorbed: u64,
    transitions: u64,
}

impl SafetySupervisor {
    pub fn new(config: &MachineConfig) -> Self {
        let (writer, _) = emergency_latch();
        let mut thresholds = HVec::new();
        let mut dual = HVec::new();
        for axis in config.axes.iter().take(MAX_AXES) {
            let _ = thresholds.push(AxisThresholds::from(axis));
            let _ = dual.push(DualChannelCheck::new(
                axis.dual_channel_tolerance,
                config.safety.dual_channel_samples,
                axis.wrap_period,
            ));
        }
        Self {
            config: config.safety,
            state: SafetyState::Init,
            fault_code: FaultCode::None,
            writer,
            latency: LatencyMonitor::new(config.safety.estop_latency_bound_us),
            warning_since_us: None,
            held_warning: None,
            monitor: ChannelMonitor::new(),
            thresholds,
            dual,
            destructive_counts: [0; MAX_AXES],
            absorbed: 0,
            transitions: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> SafetyState {
        self.state
    }

    #[inline]
    pub fn fault_code(&self) -> FaultCode {
        self.fault_code
    }

    /// Observer of the emergency latch.
    pub fn reader(&self) -> EmergencyReader {
        self.writer.reader()
    }

    #[inline]
    pub fn is_latched(&self) -> bool {
        self.writer.is_set()
    }

    #[inline]
    pub fn latency(&self) -> &LatencyMonitor {
        &self.latency
    }

    #[inline]
    pub fn monitor(&self) -> &ChannelMonitor {
        &self.monitor
    }

    /// Escalations absorbed without a state change.
    #[inline]
    pub fn absorbed(&self) -> u64 {
        self.absorbed
    }

    #[inline]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Current verdict without re-evaluating.
    pub fn verdict(&self) -> SafetyVerdict {
        SafetyVerdict::new(self.state, self.fault_code, &self.config)
    }

    pub fn snapshot(&self, watchdog_age_us: u64) -> SafetySnapshot {
        SafetySnapshot {
            state: self.state,
            fault_code: self.fault_code,
            emergency_latched: self.writer.is_set(),
            watchdog_age_us,
        }
    }

    fn apply(&mut self, event: SafetyEvent, code: FaultCode, now_us: u64) -> bool {
        let from = self.state;
        let to = match transition(from, event) {
            Transition::Ok(to) => to,
            Transition::Rejected(reason) => {
                debug!(?from, ?event, reason, "safety transition rejected");
                return false;
            }
        };
        if to == from {
            if event != SafetyEvent::AllClear {
                self.absorbed += 1;
                if from == SafetyState::Init && self.fault_code == FaultCode::None {
                    self.fault_code = code;
                }
            }
            return false;
        }
        self.transitions += 1;
        match to {
            SafetyState::Safe => {
                self.warning_since_us = None;
                self.fault_code = FaultCode::None;
                info!(?from, "safety state → Safe");
            }
            SafetyState::Warning => {
                self.warning_since_us = Some(now_us);
                self.fault_code = code;
                warn!(?from, ?code, "safety state → Warning");
            }
            SafetyState::Fault => {
                self.warning_since_us = None;
                self.fault_code = code;
                error!(?from, ?code, "safety state → Fault");
            }
            SafetyState::EmergencyStop => {
                self.warning_since_us = None;
                self.fault_code = code;
                error!(?from, ?code, "safety state → EmergencyStop");
            }
            SafetyState::Init => {
                self.fault_code = FaultCode::None;
                info!(?from, "safety state → Init");
            }
        }
        self.state = to;
        true
    }

    /// Latch the emergency stop. Returns `true` on the first trigger.
    pub fn trigger_emergency(&mut self, code: FaultCode, now_us: u64) -> bool {
        if self.state == SafetyState::EmergencyStop {
            self.absorbed += 1;
            return false;
        }
        self.writer.set();
        self.latency.triggered(now_us);
        self.apply(SafetyEvent::Emergency, code, now_us)
    }

    /// Stop commands for every axis went out at `now_us`.
    pub fn note_stop_issued(&mut self, now_us: u64) -> Option<u64> {
        self.latency.stop_issued(now_us)
    }

    /// Apply an error classified outside the channel monitor.
    ///
    /// A warning raised this way is held for a short while so the next
    /// clean channel evaluation does not drop it immediately.
    pub fn escalate(&mut self, escalated: Escalated, now_us: u64) {
        if escalated.escalation == Escalation::Warning {
            self.held_warning = Some((now_us + EXTERNAL_WARNING_HOLD_US, escalated.code));
        }
        self.apply_escalation(escalated, now_us);
    }

    fn apply_escalation(&mut self, escalated: Escalated, now_us: u64) {
        match escalated.escalation {
            Escalation::Retry => {}
            Escalation::Warning => {
                self.apply(SafetyEvent::SoftViolation, escalated.code, now_us);
            }
            Escalation::AxisStop | Escalation::Fault => self.raise_hard(escalated.code, now_us),
            Escalation::EmergencyStop => {
                self.trigger_emergency(escalated.code, now_us);
            }
        }
    }

    /// Report decoded driver faults of one axis. Destructive reports are
    /// counted per axis; reaching the configured count latches the
    /// emergency stop.
    pub fn report_driver_fault(&mut self, report: &DriverFaultReport, now_us: u64) -> Option<Escalated> {
        let slot = usize::from(report.axis).min(MAX_AXES - 1);
        if report.faults.is_destructive() {
            self.destructive_counts[slot] = self.destructive_counts[slot].saturating_add(1);
        }
        let escalated = classify_driver(
            report.faults,
            self.destructive_counts[slot],
            self.config.driver_fault_estop_count,
        )?;
        warn!(axis = report.axis, faults = ?report.faults, escalation = ?escalated.escalation, "driver fault reported");
        self.escalate(escalated, now_us);
        Some(escalated)
    }

    fn raise_hard(&mut self, code: FaultCode, now_us: u64) {
        if self.state == SafetyState::Safe {
            self.apply(SafetyEvent::SoftViolation, code, now_us);
        }
        self.apply(SafetyEvent::HardViolation, code, now_us);
    }

    /// Run one safety evaluation.
    pub fn evaluate(&mut self, inputs: &SafetyInputs, now_us: u64) -> SafetyVerdict {
        if inputs.emergency_input {
            self.trigger_emergency(FaultCode::HardwareEmergency, now_us);
        }

        let mut worst: Option<Escalated> = None;
        let mut consider = |e: Escalated| {
            if worst.is_none_or(|w| e.escalation > w.escalation) {
                worst = Some(e);
            }
        };

        let analog_bound_us = u64::from(self.config.analog_staleness_ms) * 1000;
        for (i, readings) in inputs.axes.iter().enumerate() {
            let axis = i as AxisId;
            if let Some(thresholds) = self.thresholds.get(i) {
                if let Some(v) = self.monitor.evaluate_axis(axis, thresholds, readings) {
                    consider(classify_violation(&v));
                }
            }
            if let Some(age_us) = readings.lost_for_us {
                consider(classify_violation(&SafetyViolation::SensorStale { axis, age_us }));
            }
            for (channel, age) in [
                (MonitoredChannel::Current, readings.current_age_us),
                (MonitoredChannel::Temperature, readings.temperature_age_us),
            ] {
                if let Some(age_us) = age.filter(|&a| a > analog_bound_us) {
                    consider(classify_violation(&SafetyViolation::AnalogStale { axis, channel, age_us }));
                }
            }
            let dual_status = match (readings.redundant_pair, self.dual.get_mut(i)) {
                (Some((primary, redundant)), Some(check)) => Some(check.check(primary, redundant)),
                (None, Some(check)) if readings.redundant_missing => Some(check.missing()),
                _ => None,
            };
            if let Some(status) = dual_status {
                match status {
                    DualChannelStatus::Agree => {}
                    DualChannelStatus::Discrepant { consecutive, difference } => {
                        debug!(axis, consecutive, difference, "dual-channel discrepancy");
                    }
                    DualChannelStatus::Escalate { difference } => {
                        consider(classify_violation(&SafetyViolation::DualChannelDiscrepancy { axis, difference }));
                    }
                }
            }
        }
        if let Some(volts) = inputs.supply_voltage {
            if let Some(v) = self.monitor.evaluate_supply(&self.config.supply_voltage, volts) {
                consider(classify_violation(&v));
            }
        }
        if let Some((until, code)) = self.held_warning {
            if now_us < until {
                consider(Escalated::new(Escalation::Warning, code));
            } else {
                self.held_warning = None;
            }
        }
        if let Some(since) = self.warning_since_us {
            let elapsed_us = now_us.saturating_sub(since);
            if elapsed_us > u64::from(self.config.warning_timeout_ms) * 1000 {
                consider(classify_violation(&SafetyViolation::WarningTimeout { elapsed_us }));
            }
        }

        match worst {
            None => {
                self.apply(SafetyEvent::AllClear, FaultCode::None, now_us);
            }
            Some(e) => self.apply_escalation(e, now_us),
        }
        self.verdict()
    }

    /// Operator reset of a latched emergency stop.
    ///
    /// `confirmed_clear` must reflect the hardware: reset-confirm input
    /// active and the emergency input released. Returns to `Init`; motion
    /// resumes only after the next clean evaluation.
    pub fn reset_emergency(&mut self, confirmed_clear: bool, now_us: u64) -> Result<(), ConfigurationError> {
        if self.state != SafetyState::EmergencyStop {
            return Err(ConfigurationError::Invalid {
                field: "reset_emergency",
                reason: "no emergency stop latched",
            });
        }
        if !confirmed_clear {
            warn!("emergency reset refused: trigger not confirmed clear");
            return Err(ConfigurationError::Invalid {
                field: "reset_emergency",
                reason: "emergency trigger not confirmed clear",
            });
        }
        self.writer.clear();
        self.held_warning = None;
        self.destructive_counts = [0; MAX_AXES];
        self.monitor.clear_levels();
        for check in &mut self.dual {
            check.reset();
        }
        self.apply(SafetyEvent::Reset, FaultCode::None, now_us);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motus_common::motion::config::AxisConfig;
    use motus_common::motion::error::DriverFault;

    fn supervisor() -> SafetySupervisor {
        SafetySupervisor::new(&MachineConfig::with_axes("test", vec![AxisConfig::default()]))
    }

    fn inputs(speed: f64) -> SafetyInputs {
        let mut axes = HVec::new();
        axes.push(AxisReadings {
            position: Some(10.0),
            speed,
            ..Default::default()
        })
        .unwrap();
        SafetyInputs {
            emergency_input: false,
            supply_voltage: Some(24.0),
            axes,
        }
    }

    #[test]
    fn edge_table() {
        use SafetyEvent as E;
        use SafetyState as S;
        assert_eq!(transition(S::Init, E::AllClear), Transition::Ok(S::Safe));
        assert_eq!(transition(S::Init, E::HardViolation), Transition::Ok(S::Init));
        assert_eq!(transition(S::Safe, E::SoftViolation), Transition::Ok(S::Warning));
        assert!(matches!(transition(S::Safe, E::HardViolation), Transition::Rejected(_)));
        assert_eq!(transition(S::Warning, E::HardViolation), Transition::Ok(S::Fault));
        assert_eq!(transition(S::Fault, E::AllClear), Transition::Ok(S::Fault));
        assert_eq!(transition(S::Fault, E::Emergency), Transition::Ok(S::EmergencyStop));
        assert_eq!(transition(S::EmergencyStop, E::AllClear), Transition::Ok(S::EmergencyStop));
        assert_eq!(transition(S::EmergencyStop, E::Reset), Transition::Ok(S::Init));
        assert!(matches!(transition(S::Fault, E::Reset), Transition::Rejected(_)));
    }

    #[test]
    fn init_to_safe_on_clean_evaluation() {
        let mut s = supervisor();
        assert!(!s.verdict().allow_motion);
        let v = s.evaluate(&inputs(0.0), 1_000);
        assert_eq!(v.state, SafetyState::Safe);
        assert!(v.allow_motion);
        assert_eq!(v.speed_scale, 1.0);
    }

    #[test]
    fn soft_crossing_reduces_speed_and_recovers() {
        let mut s = supervisor();
        s.evaluate(&inputs(0.0), 0);
        let v = s.evaluate(&inputs(58.0), 1_000);
        assert_eq!(v.state, SafetyState::Warning);
        assert_eq!(v.fault_code, FaultCode::SpeedSoft);
        assert_eq!(v.speed_scale, 0.5);
        let v = s.evaluate(&inputs(10.0), 2_000);
        assert_eq!(v.state, SafetyState::Safe);
        assert_eq!(v.fault_code, FaultCode::None);
    }

    #[test]
    fn hard_crossing_walks_through_warning() {
        let mut s = supervisor();
        s.evaluate(&inputs(0.0), 0);
        let before = s.transitions();
        let v = s.evaluate(&inputs(70.0), 1_000);
        assert_eq!(v.state, SafetyState::Fault);
        assert!(v.stop_all && !v.allow_motion);
        assert_eq!(s.transitions() - before, 2);
    }

    #[test]
    fn persistent_warning_times_out_to_fault() {
        let mut s = supervisor();
        s.evaluate(&inputs(0.0), 0);
        s.evaluate(&inputs(58.0), 1_000);
        let v = s.evaluate(&inputs(58.0), 400_000);
        assert_eq!(v.state, SafetyState::Warning);
        let v = s.evaluate(&inputs(58.0), 502_000);
        assert_eq!(v.state, SafetyState::Fault);
        assert_eq!(v.fault_code, FaultCode::WarningTimeout);
    }

    #[test]
    fn repeated_violation_in_fault_only_counts() {
        let mut s = supervisor();
        s.evaluate(&inputs(0.0), 0);
        s.evaluate(&inputs(70.0), 1_000);
        let transitions = s.transitions();
        let absorbed = s.absorbed();
        for t in 2..10 {
            let v = s.evaluate(&inputs(70.0), t * 1_000);
            assert_eq!(v.state, SafetyState::Fault);
            assert_eq!(v.fault_code, FaultCode::SpeedHard);
        }
        assert_eq!(s.transitions(), transitions);
        assert_eq!(s.absorbed(), absorbed + 8);
        // Clean readings do not leave Fault.
        assert_eq!(s.evaluate(&inputs(0.0), 20_000).state, SafetyState::Fault);
    }

    #[test]
    fn emergency_latches_until_confirmed_reset() {
        let mut s = supervisor();
        let reader = s.reader();
        s.evaluate(&inputs(0.0), 0);
        let mut hw = inputs(0.0);
        hw.emergency_input = true;
        let v = s.evaluate(&hw, 1_000);
        assert!(v.emergency);
        assert_eq!(v.fault_code, FaultCode::HardwareEmergency);
        assert!(reader.is_set());

        // Clean readings never clear the latch.
        assert_eq!(s.evaluate(&inputs(0.0), 2_000).state, SafetyState::EmergencyStop);
        assert!(s.reset_emergency(false, 3_000).is_err());
        assert!(reader.is_set());
        s.reset_emergency(true, 4_000).unwrap();
        assert!(!reader.is_set());
        assert_eq!(s.state(), SafetyState::Init);
        assert_eq!(s.evaluate(&inputs(0.0), 5_000).state, SafetyState::Safe);
    }

    #[test]
    fn reset_without_latch_rejected() {
        let mut s = supervisor();
        assert!(s.reset_emergency(true, 0).is_err());
    }

    #[test]
    fn repeated_destructive_fault_latches_emergency() {
        let mut s = supervisor();
        s.evaluate(&inputs(0.0), 0);
        let stall = DriverFaultReport {
            axis: 0,
            faults: DriverFault::STALL,
        };
        assert_eq!(s.report_driver_fault(&stall, 1_000).map(|e| e.escalation), Some(Escalation::AxisStop));
        assert_eq!(s.state(), SafetyState::Fault);
        s.report_driver_fault(&stall, 2_000);
        let e = s.report_driver_fault(&stall, 3_000).unwrap();
        assert_eq!(e.escalation, Escalation::EmergencyStop);
        assert_eq!(s.state(), SafetyState::EmergencyStop);
        assert_eq!(s.fault_code(), FaultCode::RepeatedDriverFault);
    }

    #[test]
    fn stop_latency_measured() {
        let mut s = supervisor();
        s.trigger_emergency(FaultCode::SoftwareEmergency, 10_000);
        assert_eq!(s.note_stop_issued(10_400), Some(400));
        assert_eq!(s.latency().violations(), 0);
    }

    #[test]
    fn dual_channel_discrepancy_faults() {
        let mut s = supervisor();
        s.evaluate(&inputs(0.0), 0);
        let mut v = s.verdict();
        for t in 1..=5 {
            let mut i = inputs(0.0);
            i.axes[0].redundant_pair = Some((10.0, 12.0));
            v = s.evaluate(&i, t * 1_000);
        }
        assert_eq!(v.state, SafetyState::Fault);
        assert_eq!(v.fault_code, FaultCode::DualChannel);
    }

    #[test]
    fn silent_redundant_channel_faults() {
        let mut s = supervisor();
        s.evaluate(&inputs(0.0), 0);
        let mut v = s.verdict();
        for t in 1..=4 {
            let mut i = inputs(0.0);
            i.axes[0].redundant_missing = true;
            v = s.evaluate(&i, t * 1_000);
            assert_ne!(v.state, SafetyState::Fault);
        }
        let mut i = inputs(0.0);
        i.axes[0].redundant_missing = true;
        v = s.evaluate(&i, 5_000);
        assert_eq!(v.state, SafetyState::Fault);
        assert_eq!(v.fault_code, FaultCode::DualChannel);
    }

    #[test]
    fn stale_analog_reading_faults() {
        let mut s = supervisor();
        let mut i = inputs(0.0);
        i.axes[0].current_age_us = Some(100_000);
        i.axes[0].temperature_age_us = Some(2_000);
        assert_eq!(s.evaluate(&i, 0).state, SafetyState::Safe);

        i.axes[0].temperature_age_us = Some(100_001);
        let v = s.evaluate(&i, 1_000);
        assert_eq!(v.state, SafetyState::Fault);
        assert_eq!(v.fault_code, FaultCode::AnalogStale);
        assert!(!v.allow_motion);
    }
}
