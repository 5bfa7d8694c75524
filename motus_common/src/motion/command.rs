//! Inbound motor commands.
//!
//! Commands arrive from the communication layer already parsed; the core
//! never sees wire framing. Parameter overrides may only lower the
//! configured limits.

use heapless::Vec as HVec;
use serde::{Deserialize, Serialize};

use crate::consts::MAX_AXES;

use super::config::AxisConfig;
use super::error::ConfigurationError;
use super::state::{AxisId, ProfileKind};

/// One axis target inside a coordinated move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisTarget {
    pub axis: AxisId,
    /// Absolute target position [units].
    pub position: f64,
}

/// Command variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotorCommandKind {
    /// Move to an absolute position [units].
    MoveAbsolute { target: f64 },
    /// Move by a signed distance from the current commanded position [units].
    MoveRelative { distance: f64 },
    /// Move several axes so they arrive together. `axis_id` of the envelope is ignored.
    CoordinatedMove { targets: HVec<AxisTarget, MAX_AXES> },
    /// Controlled stop along a velocity-continuous ramp.
    Stop,
    /// Software emergency stop.
    EmergencyStop,
    /// Operator reset of a latched emergency stop.
    ResetEmergency,
    /// Run the bounded step-response test on an idle axis.
    StartAutotune,
    /// Apply the gains proposed by the last completed auto-tune.
    ApplyTunedGains,
}

impl MotorCommandKind {
    /// Whether the command starts new motion (and so requires a motion-permitting state).
    #[inline]
    pub const fn starts_motion(&self) -> bool {
        matches!(
            self,
            Self::MoveAbsolute { .. }
                | Self::MoveRelative { .. }
                | Self::CoordinatedMove { .. }
                | Self::StartAutotune
        )
    }
}

/// Optional limit overrides for a single move.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionParameters {
    #[serde(default)]
    pub max_velocity: Option<f64>,
    #[serde(default)]
    pub max_acceleration: Option<f64>,
    #[serde(default)]
    pub max_jerk: Option<f64>,
    #[serde(default)]
    pub profile: Option<ProfileKind>,
}

/// Kinematic limits in effect for one planned move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    pub velocity: f64,
    pub acceleration: f64,
    pub jerk: f64,
    pub profile: ProfileKind,
}

impl MotionLimits {
    /// Configured maxima of an axis.
    pub fn from_axis(axis: &AxisConfig) -> Self {
        Self {
            velocity: axis.max_velocity,
            acceleration: axis.max_acceleration,
            jerk: axis.max_jerk,
            profile: axis.default_profile,
        }
    }

    /// Same limits with velocity scaled by `scale` (0, 1].
    #[inline]
    pub fn with_velocity_scale(self, scale: f64) -> Self {
        Self {
            velocity: self.velocity * scale,
            ..self
        }
    }
}

impl MotionParameters {
    /// Resolve overrides against the axis maxima.
    ///
    /// Overrides above the configured maximum or not strictly positive are
    /// rejected, never clamped.
    pub fn resolve(&self, axis: &AxisConfig) -> Result<MotionLimits, ConfigurationError> {
        let base = MotionLimits::from_axis(axis);
        let pick = |field, requested: Option<f64>, max: f64| match requested {
            Some(v) => ConfigurationError::check_range(field, v, f64::MIN_POSITIVE, max).map(|_| v),
            None => Ok(max),
        };
        Ok(MotionLimits {
            velocity: pick("parameters.max_velocity", self.max_velocity, base.velocity)?,
            acceleration: pick("parameters.max_acceleration", self.max_acceleration, base.acceleration)?,
            jerk: pick("parameters.max_jerk", self.max_jerk, base.jerk)?,
            profile: self.profile.unwrap_or(base.profile),
        })
    }
}

/// Command envelope received from the communication layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    pub axis_id: AxisId,
    #[serde(flatten)]
    pub kind: MotorCommandKind,
    #[serde(default)]
    pub parameters: MotionParameters,
}

impl MotorCommand {
    /// Command with default parameters.
    pub fn new(axis_id: AxisId, kind: MotorCommandKind) -> Self {
        Self {
            axis_id,
            kind,
            parameters: MotionParameters::default(),
        }
    }

    /// Attach parameter overrides.
    pub fn with_parameters(mut self, parameters: MotionParameters) -> Self {
        self.parameters = parameters;
        self
    }
}
