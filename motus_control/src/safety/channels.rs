//! Monitored channel thresholds.
//!
//! Current, speed, position and temperature per axis; supply voltage
//! machine-wide. Each evaluation reports the worst crossing and counts
//! every non-normal reading per channel. Level changes are logged on the
//! edge only.

use tracing::{info, warn};

use motus_common::consts::MAX_AXES;
use motus_common::motion::config::{AxisConfig, LimitBand, Threshold};
use motus_common::motion::error::SafetyViolation;
use motus_common::motion::state::{AxisId, MonitoredChannel, ThresholdLevel};

/// Thresholds of one axis, copied out of its configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisThresholds {
    /// `None` on wrapping axes without a position band.
    pub position: Option<LimitBand>,
    pub speed: Threshold,
    pub current: Threshold,
    pub temperature: Threshold,
}

impl From<&AxisConfig> for AxisThresholds {
    fn from(axis: &AxisConfig) -> Self {
        Self {
            position: axis.position_limits,
            speed: axis.speed,
            current: axis.current,
            temperature: axis.temperature,
        }
    }
}

/// Latest readings of one axis as seen by the safety task.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisReadings {
    /// Fused position; `None` when the sensor is lost.
    pub position: Option<f64>,
    /// Fused speed [units/s].
    pub speed: f64,
    /// Latest phase current [A], if any sample arrived.
    pub current: Option<f64>,
    /// Latest temperature [°C], if any sample arrived.
    pub temperature: Option<f64>,
    /// Primary and redundant angle received together this cycle.
    pub redundant_pair: Option<(f64, f64)>,
    /// Age of the last good sample when the sensor is lost [µs].
    pub lost_for_us: Option<u64>,
    /// A primary sample arrived without its redundant counterpart.
    pub redundant_missing: bool,
    /// Age of the current reading [µs]; `None` skips the age check.
    pub current_age_us: Option<u64>,
    /// Age of the temperature reading [µs]; `None` skips the age check.
    pub temperature_age_us: Option<u64>,
}

const SUPPLY_ROW: usize = MAX_AXES;

/// Per-channel violation counters and edge tracking.
#[derive(Debug, Clone)]
pub struct ChannelMonitor {
    counts: [u64; MonitoredChannel::COUNT],
    levels: [[ThresholdLevel; MonitoredChannel::COUNT]; MAX_AXES + 1],
}

impl Default for ChannelMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMonitor {
    pub const fn new() -> Self {
        Self {
            counts: [0; MonitoredChannel::COUNT],
            levels: [[ThresholdLevel::Normal; MonitoredChannel::COUNT]; MAX_AXES + 1],
        }
    }

    /// Evaluate every channel of one axis. Returns the worst crossing.
    pub fn evaluate_axis(
        &mut self,
        axis: AxisId,
        thresholds: &AxisThresholds,
        readings: &AxisReadings,
    ) -> Option<SafetyViolation> {
        let row = usize::from(axis).min(MAX_AXES - 1);
        let mut worst = None;

        if let (Some(band), Some(position)) = (thresholds.position, readings.position) {
            let level = band.classify(position);
            worst = pick(worst, self.record(row, Some(axis), MonitoredChannel::Position, level, position));
        }
        let level = thresholds.speed.classify(readings.speed);
        worst = pick(worst, self.record(row, Some(axis), MonitoredChannel::Speed, level, readings.speed));
        if let Some(amps) = readings.current {
            let level = thresholds.current.classify(amps);
            worst = pick(worst, self.record(row, Some(axis), MonitoredChannel::Current, level, amps));
        }
        if let Some(celsius) = readings.temperature {
            let level = thresholds.temperature.classify(celsius);
            worst = pick(worst, self.record(row, Some(axis), MonitoredChannel::Temperature, level, celsius));
        }
        worst
    }

    /// Evaluate the machine-wide supply voltage.
    pub fn evaluate_supply(&mut self, band: &LimitBand, volts: f64) -> Option<SafetyViolation> {
        let level = band.classify(volts);
        self.record(SUPPLY_ROW, None, MonitoredChannel::SupplyVoltage, level, volts)
    }

    fn record(
        &mut self,
        row: usize,
        axis: Option<AxisId>,
        channel: MonitoredChannel,
        level: ThresholdLevel,
        value: f64,
    ) -> Option<SafetyViolation> {
        let previous = core::mem::replace(&mut self.levels[row][channel.index()], level);
        if previous != level {
            if level == ThresholdLevel::Normal {
                info!(?axis, ?channel, value, "channel back inside soft threshold");
            } else {
                warn!(?axis, ?channel, ?level, value, "channel threshold crossed");
            }
        }
        if level == ThresholdLevel::Normal {
            return None;
        }
        self.counts[channel.index()] += 1;
        Some(SafetyViolation::ChannelThreshold {
            channel,
            level,
            value,
            axis,
        })
    }

    /// Number of non-normal readings seen on `channel`.
    #[inline]
    pub fn count(&self, channel: MonitoredChannel) -> u64 {
        self.counts[channel.index()]
    }

    /// Forget edge state (after an emergency reset). Counters are kept.
    pub fn clear_levels(&mut self) {
        self.levels = [[ThresholdLevel::Normal; MonitoredChannel::COUNT]; MAX_AXES + 1];
    }
}

fn level_of(v: &SafetyViolation) -> ThresholdLevel {
    match v {
        SafetyViolation::ChannelThreshold { level, .. } => *level,
        _ => ThresholdLevel::Hard,
    }
}

/// Keep the more severe of two crossings; the earlier one wins a tie.
fn pick(current: Option<SafetyViolation>, candidate: Option<SafetyViolation>) -> Option<SafetyViolation> {
    match (current, candidate) {
        (Some(a), Some(b)) if level_of(&b) > level_of(&a) => Some(b),
        (Some(a), _) => Some(a),
        (None, b) => b,
    }
}
