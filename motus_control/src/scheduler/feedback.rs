//! Sensor event intake.
//!
//! Drains the ISR queue once per tick at the start of the safety task.
//! Angle samples go straight to fusion; the rest is kept as the latest
//! value per axis for threshold checks. Current and temperature keep their
//! sample tick so the safety task can bound their age; a channel that never
//! reported ages from the moment the hub was armed.

use tracing::warn;

use motus_common::consts::MAX_AXES;
use motus_common::hal::types::{SensorConsumer, SensorEvent};
use motus_common::motion::state::AxisId;

/// Latest non-angle readings of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisFeedback {
    pub current: Option<f64>,
    pub temperature: Option<f64>,
    current_us: Option<u64>,
    temperature_us: Option<u64>,
    primary: Option<(f64, u64)>,
    redundant: Option<(f64, u64)>,
}

impl AxisFeedback {
    /// Primary and redundant angle sampled at the same instant.
    pub fn redundant_pair(&self) -> Option<(f64, f64)> {
        match (self.primary, self.redundant) {
            (Some((p, tp)), Some((r, tr))) if tp == tr => Some((p, r)),
            _ => None,
        }
    }

    /// A primary sample arrived in the last drain without a redundant
    /// sample taken at the same instant.
    #[inline]
    pub fn redundant_missing(&self) -> bool {
        self.primary.is_some() && self.redundant_pair().is_none()
    }

    /// Age of the current reading at `now_us`; `since_us` stands in for a
    /// reading that never arrived.
    #[inline]
    pub fn current_age_us(&self, now_us: u64, since_us: u64) -> u64 {
        now_us.saturating_sub(self.current_us.unwrap_or(since_us))
    }

    /// Age of the temperature reading, as [`AxisFeedback::current_age_us`].
    #[inline]
    pub fn temperature_age_us(&self, now_us: u64, since_us: u64) -> u64 {
        now_us.saturating_sub(self.temperature_us.unwrap_or(since_us))
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drained {
    pub events: usize,
    /// The queue was full when the drain started; the producer may have
    /// dropped events.
    pub overflowed: bool,
    /// An emergency-input assertion was seen.
    pub emergency_asserted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackHub {
    axes: [AxisFeedback; MAX_AXES],
    supply_voltage: Option<f64>,
    overflows: u64,
    armed_us: u64,
}

impl FeedbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the age clock of channels that have not reported yet.
    pub fn arm(&mut self, now_us: u64) {
        self.armed_us = now_us;
    }

    #[inline]
    pub fn armed_us(&self) -> u64 {
        self.armed_us
    }

    /// Drain every queued event. `on_angle` receives each primary sample in
    /// arrival order.
    pub fn drain<F>(&mut self, queue: &mut SensorConsumer, mut on_angle: F) -> Drained
    where
        F: FnMut(AxisId, f64, u64),
    {
        let mut drained = Drained {
            overflowed: queue.len() >= queue.capacity(),
            ..Default::default()
        };
        if drained.overflowed {
            self.overflows += 1;
            warn!(overflows = self.overflows, "sensor queue full, events may have been dropped");
        }
        // Pairs are only meaningful within one drain.
        for axis in &mut self.axes {
            axis.primary = None;
            axis.redundant = None;
        }

        while let Some(event) = queue.dequeue() {
            drained.events += 1;
            match event {
                SensorEvent::AngleSample { axis, angle, tick_us } => {
                    on_angle(axis, angle, tick_us);
                    if let Some(slot) = self.axes.get_mut(usize::from(axis)) {
                        slot.primary = Some((angle, tick_us));
                    }
                }
                SensorEvent::RedundantAngle { axis, angle, tick_us } => {
                    if let Some(slot) = self.axes.get_mut(usize::from(axis)) {
                        slot.redundant = Some((angle, tick_us));
                    }
                }
                SensorEvent::Current { axis, amps, tick_us } => {
                    if let Some(slot) = self.axes.get_mut(usize::from(axis)) {
                        slot.current = Some(amps);
                        slot.current_us = Some(tick_us);
                    }
                }
                SensorEvent::Temperature { axis, celsius, tick_us } => {
                    if let Some(slot) = self.axes.get_mut(usize::from(axis)) {
                        slot.temperature = Some(celsius);
                        slot.temperature_us = Some(tick_us);
                    }
                }
                SensorEvent::SupplyVoltage { volts, .. } => self.supply_voltage = Some(volts),
                SensorEvent::EmergencyInput { asserted, .. } => {
                    drained.emergency_asserted |= asserted;
                }
            }
        }
        drained
    }

    #[inline]
    pub fn axis(&self, axis: AxisId) -> Option<&AxisFeedback> {
        self.axes.get(usize::from(axis))
    }

    #[inline]
    pub fn supply_voltage(&self) -> Option<f64> {
        self.supply_voltage
    }

    /// Drains that started on a full queue.
    #[inline]
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motus_common::consts::SENSOR_QUEUE_DEPTH;
    use motus_common::hal::types::sensor_channel;

    #[test]
    fn routes_events_by_kind() {
        let (mut tx, mut rx) = sensor_channel();
        let events = [
            SensorEvent::AngleSample { axis: 1, angle: 10.0, tick_us: 5 },
            SensorEvent::RedundantAngle { axis: 1, angle: 10.1, tick_us: 5 },
            SensorEvent::Current { axis: 1, amps: 0.8, tick_us: 5 },
            SensorEvent::Temperature { axis: 0, celsius: 41.0, tick_us: 5 },
            SensorEvent::SupplyVoltage { volts: 24.2, tick_us: 5 },
        ];
        for e in events {
            tx.enqueue(e).unwrap();
        }
        let mut hub = FeedbackHub::new();
        let mut angles = Vec::new();
        let drained = hub.drain(&mut rx, |axis, pos, tick| angles.push((axis, pos, tick)));

        assert_eq!(drained.events, 5);
        assert!(!drained.overflowed);
        assert_eq!(angles, vec![(1, 10.0, 5)]);
        assert_eq!(hub.axis(1).unwrap().redundant_pair(), Some((10.0, 10.1)));
        assert_eq!(hub.axis(1).unwrap().current, Some(0.8));
        assert_eq!(hub.axis(0).unwrap().temperature, Some(41.0));
        assert_eq!(hub.supply_voltage(), Some(24.2));
    }

    #[test]
    fn pairs_require_matching_timestamps_and_expire() {
        let (mut tx, mut rx) = sensor_channel();
        tx.enqueue(SensorEvent::AngleSample { axis: 0, angle: 1.0, tick_us: 5 }).unwrap();
        tx.enqueue(SensorEvent::RedundantAngle { axis: 0, angle: 1.0, tick_us: 6 }).unwrap();
        let mut hub = FeedbackHub::new();
        hub.drain(&mut rx, |_, _, _| {});
        assert_eq!(hub.axis(0).unwrap().redundant_pair(), None);

        tx.enqueue(SensorEvent::AngleSample { axis: 0, angle: 2.0, tick_us: 7 }).unwrap();
        tx.enqueue(SensorEvent::RedundantAngle { axis: 0, angle: 2.0, tick_us: 7 }).unwrap();
        hub.drain(&mut rx, |_, _, _| {});
        assert_eq!(hub.axis(0).unwrap().redundant_pair(), Some((2.0, 2.0)));

        hub.drain(&mut rx, |_, _, _| {});
        assert_eq!(hub.axis(0).unwrap().redundant_pair(), None);
    }

    #[test]
    fn primary_without_redundant_is_missing() {
        let (mut tx, mut rx) = sensor_channel();
        tx.enqueue(SensorEvent::AngleSample { axis: 0, angle: 1.0, tick_us: 5 }).unwrap();
        tx.enqueue(SensorEvent::AngleSample { axis: 1, angle: 1.0, tick_us: 5 }).unwrap();
        tx.enqueue(SensorEvent::RedundantAngle { axis: 1, angle: 1.0, tick_us: 5 }).unwrap();
        let mut hub = FeedbackHub::new();
        hub.drain(&mut rx, |_, _, _| {});
        assert!(hub.axis(0).unwrap().redundant_missing());
        assert!(!hub.axis(1).unwrap().redundant_missing());
        // No primary sample, nothing to cross-check.
        assert!(!hub.axis(2).unwrap().redundant_missing());
    }

    #[test]
    fn analog_readings_age_from_their_sample() {
        let (mut tx, mut rx) = sensor_channel();
        let mut hub = FeedbackHub::new();
        hub.arm(1_000);
        tx.enqueue(SensorEvent::Current { axis: 0, amps: 0.5, tick_us: 4_000 }).unwrap();
        hub.drain(&mut rx, |_, _, _| {});

        let axis = hub.axis(0).unwrap();
        assert_eq!(axis.current_age_us(10_000, hub.armed_us()), 6_000);
        // Never reported: ages from arming.
        assert_eq!(axis.temperature_age_us(10_000, hub.armed_us()), 9_000);

        // Later drains without a new sample keep the old tick.
        hub.drain(&mut rx, |_, _, _| {});
        assert_eq!(hub.axis(0).unwrap().current_age_us(50_000, hub.armed_us()), 46_000);
        assert_eq!(hub.axis(0).unwrap().current, Some(0.5));
    }

    #[test]
    fn emergency_edge_and_overflow_reported() {
        let (mut tx, mut rx) = sensor_channel();
        tx.enqueue(SensorEvent::EmergencyInput { asserted: true, tick_us: 1 }).unwrap();
        while tx
            .enqueue(SensorEvent::SupplyVoltage { volts: 24.0, tick_us: 2 })
            .is_ok()
        {}
        let mut hub = FeedbackHub::new();
        let drained = hub.drain(&mut rx, |_, _, _| {});
        assert!(drained.overflowed);
        assert!(drained.emergency_asserted);
        assert_eq!(drained.events, SENSOR_QUEUE_DEPTH - 1);
        assert_eq!(hub.overflows(), 1);
    }

    #[test]
    fn out_of_range_axis_ignored() {
        let (mut tx, mut rx) = sensor_channel();
        tx.enqueue(SensorEvent::Current { axis: 200, amps: 1.0, tick_us: 1 }).unwrap();
        let mut hub = FeedbackHub::new();
        assert_eq!(hub.drain(&mut rx, |_, _, _| {}).events, 1);
        assert!(hub.axis(200).is_none());
    }
}
