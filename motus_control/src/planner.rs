//! Motion Planner.
//!
//! Generates time-parameterized segments (trapezoidal or jerk-limited
//! S-curve) and keeps one active segment per axis. A new segment replaces
//! the active one mid-flight by starting from the current sampled state,
//! so velocity never jumps.
//!
//! - [`segment`] - phases, sampling, time scaling
//! - [`trapezoid`] / [`scurve`] - profile generators
//! - [`slot`] - per-axis active/retired bookkeeping

pub mod scurve;
pub mod segment;
pub mod slot;
pub mod trapezoid;

use heapless::Vec as HVec;
use tracing::debug;

use motus_common::consts::{MAX_AXES, MAX_PHASES};
use motus_common::motion::command::MotionLimits;
use motus_common::motion::error::ConfigurationError;
use motus_common::motion::state::{AxisId, ProfileKind, SegmentStatus};

use scurve::{plan_scurve, plan_scurve_stop};
use segment::{Kinematics, MotionSegment, Phase, PhaseBuilder};
use slot::{RetiredSegment, SegmentSlot};
use trapezoid::plan_trapezoid;

fn check_limits(limits: &MotionLimits) -> Result<(), ConfigurationError> {
    ConfigurationError::check_range("limits.velocity", limits.velocity, f64::MIN_POSITIVE, f64::MAX)?;
    ConfigurationError::check_range("limits.acceleration", limits.acceleration, f64::MIN_POSITIVE, f64::MAX)?;
    ConfigurationError::check_range("limits.jerk", limits.jerk, f64::MIN_POSITIVE, f64::MAX)
}

fn check_state(start: &Kinematics) -> Result<(), ConfigurationError> {
    if start.position.is_finite() && start.velocity.is_finite() && start.acceleration.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::Invalid {
            field: "start",
            reason: "non-finite start state",
        })
    }
}

const PHASE_OVERFLOW: ConfigurationError = ConfigurationError::Invalid {
    field: "segment",
    reason: "profile needs more phases than available",
};

/// Phases from `start` to rest at `target`.
///
/// A zero distance from rest yields no phases (a zero-duration segment).
pub fn plan(
    start: Kinematics,
    target: f64,
    limits: &MotionLimits,
) -> Result<HVec<Phase, MAX_PHASES>, ConfigurationError> {
    check_limits(limits)?;
    check_state(&start)?;
    ConfigurationError::check_range("target", target, f64::MIN, f64::MAX)?;

    let mut b = PhaseBuilder::new(start);
    let ok = match limits.profile {
        ProfileKind::Trapezoidal => plan_trapezoid(&mut b, target, limits.velocity, limits.acceleration),
        ProfileKind::Scurve => plan_scurve(&mut b, target, limits.velocity, limits.acceleration, limits.jerk),
    };
    if !ok {
        return Err(PHASE_OVERFLOW);
    }
    Ok(b.finish().0)
}

/// Velocity-continuous stop from `start`. Returns the phases and the rest
/// position.
pub fn plan_stop(
    start: Kinematics,
    limits: &MotionLimits,
) -> Result<(HVec<Phase, MAX_PHASES>, f64), ConfigurationError> {
    check_limits(limits)?;
    check_state(&start)?;

    let mut b = PhaseBuilder::new(start);
    let ok = match limits.profile {
        ProfileKind::Trapezoidal => {
            let v = start.velocity;
            b.push_accel(v.abs() / limits.acceleration, -v.signum() * limits.acceleration)
        }
        ProfileKind::Scurve => plan_scurve_stop(&mut b, limits.acceleration, limits.jerk),
    };
    if !ok {
        return Err(PHASE_OVERFLOW);
    }
    let (phases, end) = b.finish();
    Ok((phases, end.position))
}

// ─── MotionPlanner ──────────────────────────────────────────────────

/// Owner of every axis' active segment.
#[derive(Debug, Clone)]
pub struct MotionPlanner {
    slots: [SegmentSlot; MAX_AXES],
    next_id: u32,
}

impl Default for MotionPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionPlanner {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| SegmentSlot::default()),
            next_id: 1,
        }
    }

    fn slot_index(axis: AxisId) -> Result<usize, ConfigurationError> {
        let i = usize::from(axis);
        if i < MAX_AXES {
            Ok(i)
        } else {
            Err(ConfigurationError::OutOfRange {
                field: "axis_id",
                value: f64::from(axis),
                min: 0.0,
                max: (MAX_AXES - 1) as f64,
            })
        }
    }

    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Plan a move without installing it.
    pub fn build_move(
        &mut self,
        axis: AxisId,
        start: Kinematics,
        target: f64,
        limits: &MotionLimits,
        now_us: u64,
    ) -> Result<MotionSegment, ConfigurationError> {
        Self::slot_index(axis)?;
        let phases = plan(start, target, limits)?;
        Ok(MotionSegment::new(
            self.take_id(),
            axis,
            now_us,
            start,
            phases,
            Kinematics::at_rest(target),
            *limits,
        ))
    }

    /// Install a planned segment, superseding the active one.
    pub fn install(&mut self, segment: MotionSegment, now_us: u64) -> Result<(), ConfigurationError> {
        let i = Self::slot_index(segment.axis)?;
        debug!(axis = segment.axis, id = segment.id, duration = segment.duration, "segment installed");
        if let Some(old) = self.slots[i].install(segment, now_us) {
            debug!(axis = i, id = old.id, "segment superseded");
        }
        Ok(())
    }

    /// Plan and install a move.
    pub fn start_move(
        &mut self,
        axis: AxisId,
        start: Kinematics,
        target: f64,
        limits: &MotionLimits,
        now_us: u64,
    ) -> Result<&MotionSegment, ConfigurationError> {
        let segment = self.build_move(axis, start, target, limits, now_us)?;
        self.install(segment, now_us)?;
        self.active(axis).ok_or(PHASE_OVERFLOW)
    }

    /// Replace the active segment (if any) with a controlled stop.
    pub fn start_stop(
        &mut self,
        axis: AxisId,
        start: Kinematics,
        limits: &MotionLimits,
        now_us: u64,
    ) -> Result<(), ConfigurationError> {
        Self::slot_index(axis)?;
        let (phases, rest) = plan_stop(start, limits)?;
        let segment = MotionSegment::new(
            self.take_id(),
            axis,
            now_us,
            start,
            phases,
            Kinematics::at_rest(rest),
            *limits,
        );
        self.install(segment, now_us)
    }

    /// Cancel the active segment of `axis`.
    pub fn cancel(&mut self, axis: AxisId, now_us: u64) -> Option<RetiredSegment> {
        let i = Self::slot_index(axis).ok()?;
        self.slots[i].retire(SegmentStatus::Cancelled, now_us)
    }

    /// Cancel every active segment. Returns how many were cancelled.
    pub fn cancel_all(&mut self, now_us: u64) -> usize {
        self.slots
            .iter_mut()
            .filter_map(|s| s.retire(SegmentStatus::Cancelled, now_us))
            .count()
    }

    /// Mark segments whose end time has passed as completed.
    pub fn retire_finished(&mut self, now_us: u64) -> HVec<(AxisId, RetiredSegment), MAX_AXES> {
        let mut done = HVec::new();
        for (axis, slot) in self.slots.iter_mut().enumerate() {
            if slot.active().is_some_and(|s| s.is_finished_at(now_us)) {
                if let Some(r) = slot.retire(SegmentStatus::Completed, now_us) {
                    let _ = done.push((axis as AxisId, r));
                }
            }
        }
        done
    }

    /// Setpoint of `axis` at `now_us`, if a segment is active.
    #[inline]
    pub fn sample(&self, axis: AxisId, now_us: u64) -> Option<Kinematics> {
        self.active(axis).map(|s| s.sample(now_us))
    }

    #[inline]
    pub fn active(&self, axis: AxisId) -> Option<&MotionSegment> {
        self.slots.get(usize::from(axis)).and_then(SegmentSlot::active)
    }

    #[inline]
    pub fn is_active(&self, axis: AxisId) -> bool {
        self.active(axis).is_some()
    }

    #[inline]
    pub fn last_retired(&self, axis: AxisId) -> Option<&RetiredSegment> {
        self.slots.get(usize::from(axis)).and_then(SegmentSlot::last)
    }
}
