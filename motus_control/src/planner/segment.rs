//! Motion segments as sequences of constant-jerk phases.
//!
//! Every profile shape reduces to phases of constant jerk: a trapezoid
//! uses zero-jerk phases with stepped acceleration, an S-curve uses the
//! jerk-limited seven-phase form. Each phase stores its start state, so
//! sampling is a closed-form evaluation of one cubic.

use heapless::Vec as HVec;

use motus_common::consts::MAX_PHASES;
use motus_common::motion::command::MotionLimits;
use motus_common::motion::state::{AxisId, ProfileKind, SegmentStatus};

/// Phases shorter than this are dropped [s].
pub const MIN_PHASE_S: f64 = 1.0e-12;

/// Position, velocity and acceleration at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kinematics {
    /// [units]
    pub position: f64,
    /// [units/s]
    pub velocity: f64,
    /// [units/s²]
    pub acceleration: f64,
}

impl Kinematics {
    /// At rest at `position`.
    #[inline]
    pub const fn at_rest(position: f64) -> Self {
        Self {
            position,
            velocity: 0.0,
            acceleration: 0.0,
        }
    }
}

/// One constant-jerk phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    /// [s]
    pub duration: f64,
    /// [units/s³]
    pub jerk: f64,
    /// State at the start of the phase.
    pub start: Kinematics,
}

impl Phase {
    /// State `t` seconds into the phase.
    #[inline]
    pub fn sample(&self, t: f64) -> Kinematics {
        let s = &self.start;
        let j = self.jerk;
        Kinematics {
            position: s.position + s.velocity * t + s.acceleration * t * t / 2.0 + j * t * t * t / 6.0,
            velocity: s.velocity + s.acceleration * t + j * t * t / 2.0,
            acceleration: s.acceleration + j * t,
        }
    }

    /// State at the end of the phase.
    #[inline]
    pub fn end(&self) -> Kinematics {
        self.sample(self.duration)
    }

    /// Largest |velocity| reached inside the phase.
    fn peak_velocity(&self) -> f64 {
        let mut peak = self.start.velocity.abs().max(self.end().velocity.abs());
        // Interior extremum where acceleration crosses zero.
        if self.jerk != 0.0 {
            let t = -self.start.acceleration / self.jerk;
            if t > 0.0 && t < self.duration {
                peak = peak.max(self.sample(t).velocity.abs());
            }
        }
        peak
    }
}

/// Incremental phase builder.
///
/// Tracks the running state; each push appends a phase starting where the
/// previous one ended.
#[derive(Debug, Clone)]
pub struct PhaseBuilder {
    phases: HVec<Phase, MAX_PHASES>,
    state: Kinematics,
}

impl PhaseBuilder {
    pub fn new(start: Kinematics) -> Self {
        Self {
            phases: HVec::new(),
            state: start,
        }
    }

    #[inline]
    pub fn state(&self) -> Kinematics {
        self.state
    }

    /// Overwrite the running state, e.g. to clear rounding residue after
    /// a phase that should end exactly at zero velocity or acceleration.
    #[inline]
    pub fn set_state(&mut self, state: Kinematics) {
        self.state = state;
    }

    /// Constant-jerk phase from the current acceleration.
    ///
    /// Durations below [`MIN_PHASE_S`] are skipped. Returns `false` when
    /// the phase table is full.
    pub fn push_jerk(&mut self, duration: f64, jerk: f64) -> bool {
        if !(duration > MIN_PHASE_S) {
            return true;
        }
        let phase = Phase {
            duration,
            jerk,
            start: self.state,
        };
        if self.phases.push(phase).is_err() {
            return false;
        }
        self.state = phase.end();
        true
    }

    /// Constant-acceleration phase; the acceleration steps to `acceleration`.
    pub fn push_accel(&mut self, duration: f64, acceleration: f64) -> bool {
        if !(duration > MIN_PHASE_S) {
            return true;
        }
        self.state.acceleration = acceleration;
        self.push_jerk(duration, 0.0)
    }

    /// Finish at rest-acceleration, returning the phases and final state.
    pub fn finish(mut self) -> (HVec<Phase, MAX_PHASES>, Kinematics) {
        self.state.acceleration = 0.0;
        (self.phases, self.state)
    }
}

/// Tolerance [µs] for snapping a segment end onto a whole microsecond.
pub const END_SNAP_US: f64 = 1e-3;

/// A planned, time-parameterized trajectory piece for one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSegment {
    pub id: u32,
    pub axis: AxisId,
    pub profile: ProfileKind,
    /// Board tick at which the segment starts [µs].
    pub start_us: u64,
    pub phases: HVec<Phase, MAX_PHASES>,
    pub start: Kinematics,
    pub end: Kinematics,
    /// Sum of phase durations [s].
    pub duration: f64,
    /// Limits the segment was planned with.
    pub limits: MotionLimits,
    pub status: SegmentStatus,
}

impl MotionSegment {
    /// Assemble a segment. `end` is taken as exact; sampling past the last
    /// phase returns it unchanged.
    pub fn new(
        id: u32,
        axis: AxisId,
        start_us: u64,
        start: Kinematics,
        phases: HVec<Phase, MAX_PHASES>,
        end: Kinematics,
        limits: MotionLimits,
    ) -> Self {
        let duration = phases.iter().map(|p| p.duration).sum();
        Self {
            id,
            axis,
            profile: limits.profile,
            start_us,
            phases,
            start,
            end,
            duration,
            limits,
            status: SegmentStatus::Active,
        }
    }

    /// Zero-duration segment that is complete as soon as it exists.
    #[inline]
    pub fn is_zero_duration(&self) -> bool {
        self.phases.is_empty()
    }

    /// End tick [µs]. Rounded up, except that float residue within
    /// [`END_SNAP_US`] of a whole microsecond snaps to it.
    #[inline]
    pub fn end_us(&self) -> u64 {
        let us = self.duration * 1e6;
        let nearest = us.round();
        let whole = if (us - nearest).abs() <= END_SNAP_US { nearest } else { us.ceil() };
        self.start_us + whole as u64
    }

    #[inline]
    pub fn is_finished_at(&self, now_us: u64) -> bool {
        now_us >= self.end_us()
    }

    /// State `t` seconds after the segment start. At or before the start
    /// this is exactly the start state the segment was planned from.
    pub fn sample_at(&self, t: f64) -> Kinematics {
        if t <= 0.0 {
            return if self.phases.is_empty() { self.end } else { self.start };
        }
        let mut elapsed = 0.0;
        for phase in &self.phases {
            if t < elapsed + phase.duration {
                return phase.sample(t - elapsed);
            }
            elapsed += phase.duration;
        }
        self.end
    }

    /// State at board tick `now_us`.
    #[inline]
    pub fn sample(&self, now_us: u64) -> Kinematics {
        self.sample_at(now_us.saturating_sub(self.start_us) as f64 * 1e-6)
    }

    /// Largest |velocity| over the segment.
    pub fn peak_velocity(&self) -> f64 {
        self.phases.iter().map(Phase::peak_velocity).fold(0.0, f64::max)
    }

    /// Largest |acceleration| over the segment.
    pub fn peak_acceleration(&self) -> f64 {
        self.phases
            .iter()
            .map(|p| p.start.acceleration.abs().max(p.end().acceleration.abs()))
            .fold(0.0, f64::max)
    }

    /// Largest |jerk| over the segment.
    pub fn peak_jerk(&self) -> f64 {
        self.phases.iter().map(|p| p.jerk.abs()).fold(0.0, f64::max)
    }

    /// Same path stretched in time by `factor >= 1`.
    ///
    /// Only valid for rest-to-rest segments: velocity scales by `1/k`,
    /// acceleration by `1/k²` and jerk by `1/k³`, so no limit is exceeded
    /// and the path is unchanged. Returns `None` otherwise.
    pub fn time_scaled(&self, factor: f64) -> Option<Self> {
        let at_rest = |k: &Kinematics| k.velocity == 0.0 && k.acceleration == 0.0;
        if !(factor >= 1.0 && factor.is_finite()) || !at_rest(&self.start) || !at_rest(&self.end) {
            return None;
        }
        let mut phases = HVec::new();
        for p in &self.phases {
            let scaled = Phase {
                duration: p.duration * factor,
                jerk: p.jerk / (factor * factor * factor),
                start: Kinematics {
                    position: p.start.position,
                    velocity: p.start.velocity / factor,
                    acceleration: p.start.acceleration / (factor * factor),
                },
            };
            // Same length as the source table.
            let _ = phases.push(scaled);
        }
        let mut segment = Self::new(self.id, self.axis, self.start_us, self.start, phases, self.end, self.limits);
        segment.profile = self.profile;
        Some(segment)
    }
}
