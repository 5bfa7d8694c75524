//! Dual-channel cross-check.
//!
//! Two independently sampled readings of the same angle are compared once
//! per cycle. A difference beyond tolerance for `required` consecutive
//! samples escalates; disagreement is a failure mode and is never averaged
//! away. A cycle where the redundant channel stays silent counts as a
//! discrepancy of unbounded size.

use crate::control::angle::wrap_error;

/// Result of one comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DualChannelStatus {
    Agree,
    /// Beyond tolerance, not yet for long enough.
    Discrepant { consecutive: u32, difference: f64 },
    /// Sustained discrepancy.
    Escalate { difference: f64 },
}

#[derive(Debug, Clone)]
pub struct DualChannelCheck {
    tolerance: f64,
    required: u32,
    wrap_period: Option<f64>,
    consecutive: u32,
    total: u64,
}

impl DualChannelCheck {
    pub fn new(tolerance: f64, required: u32, wrap_period: Option<f64>) -> Self {
        Self {
            tolerance,
            required: required.max(1),
            wrap_period,
            consecutive: 0,
            total: 0,
        }
    }

    /// Compare one primary/redundant pair.
    pub fn check(&mut self, primary: f64, redundant: f64) -> DualChannelStatus {
        let difference = wrap_error(primary, redundant, self.wrap_period).abs();
        // NaN on either channel counts as disagreement.
        if difference <= self.tolerance {
            self.consecutive = 0;
            return DualChannelStatus::Agree;
        }
        self.discrepant(difference)
    }

    /// Primary sample without a redundant counterpart.
    pub fn missing(&mut self) -> DualChannelStatus {
        self.discrepant(f64::INFINITY)
    }

    fn discrepant(&mut self, difference: f64) -> DualChannelStatus {
        self.consecutive = self.consecutive.saturating_add(1);
        self.total += 1;
        if self.consecutive >= self.required {
            DualChannelStatus::Escalate { difference }
        } else {
            DualChannelStatus::Discrepant {
                consecutive: self.consecutive,
                difference,
            }
        }
    }

    #[inline]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Discrepant samples seen since start.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}
