//! Per-axis segment slot: the active segment plus the last retired one.

use motus_common::motion::state::SegmentStatus;

use super::segment::{Kinematics, MotionSegment};

/// Record of a segment that left the slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetiredSegment {
    pub id: u32,
    pub status: SegmentStatus,
    /// Tick at which it was retired [µs].
    pub at_us: u64,
    /// State it ended in (the planned end for completed segments).
    pub end: Kinematics,
}

/// Slot owned by the planner for one axis.
#[derive(Debug, Clone, Default)]
pub struct SegmentSlot {
    active: Option<MotionSegment>,
    last: Option<RetiredSegment>,
}

impl SegmentSlot {
    #[inline]
    pub fn active(&self) -> Option<&MotionSegment> {
        self.active.as_ref()
    }

    #[inline]
    pub fn last(&self) -> Option<&RetiredSegment> {
        self.last.as_ref()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Install a new segment, superseding any active one.
    pub fn install(&mut self, segment: MotionSegment, now_us: u64) -> Option<RetiredSegment> {
        let superseded = self.retire(SegmentStatus::Superseded, now_us);
        self.active = Some(segment);
        superseded
    }

    /// Retire the active segment with `status`.
    pub fn retire(&mut self, status: SegmentStatus, now_us: u64) -> Option<RetiredSegment> {
        let mut segment = self.active.take()?;
        segment.status = status;
        let end = match status {
            SegmentStatus::Completed => segment.end,
            _ => segment.sample(now_us),
        };
        let record = RetiredSegment {
            id: segment.id,
            status,
            at_us: now_us,
            end,
        };
        self.last = Some(record);
        Some(record)
    }
}
