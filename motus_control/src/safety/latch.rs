//! Emergency-stop latch broadcast.
//!
//! Single writer (the supervisor), any number of readers. Readers can only
//! observe the flag; the writer half is not `Clone`, so no other component
//! can set or clear it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

/// Create a connected writer/reader pair. The latch starts cleared.
pub fn emergency_latch() -> (EmergencyWriter, EmergencyReader) {
    let flag = Arc::new(AtomicBool::new(false));
    (
        EmergencyWriter {
            flag: Arc::clone(&flag),
        },
        EmergencyReader { flag },
    )
}

/// Owning half of the latch.
#[derive(Debug)]
pub struct EmergencyWriter {
    flag: Arc<AtomicBool>,
}

impl EmergencyWriter {
    /// Set the latch. Returns `true` if it was previously clear.
    #[inline]
    pub fn set(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    /// Clear the latch. Only the supervisor's reset path calls this.
    #[inline]
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Another observer of the same latch.
    pub fn reader(&self) -> EmergencyReader {
        EmergencyReader {
            flag: Arc::clone(&self.flag),
        }
    }
}

/// Read-only observer of the latch.
#[derive(Debug, Clone)]
pub struct EmergencyReader {
    flag: Arc<AtomicBool>,
}

impl EmergencyReader {
    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ─── Stop latency ───────────────────────────────────────────────────

/// Measures trigger-to-stop latency against the configured bound.
#[derive(Debug, Clone)]
pub struct LatencyMonitor {
    bound_us: u64,
    pending_since: Option<u64>,
    last_us: Option<u64>,
    worst_us: u64,
    violations: u64,
}

impl LatencyMonitor {
    pub fn new(bound_us: u32) -> Self {
        Self {
            bound_us: u64::from(bound_us),
            pending_since: None,
            last_us: None,
            worst_us: 0,
            violations: 0,
        }
    }

    /// Trigger detected at `now_us`. A second trigger before the stop is
    /// issued keeps the earlier timestamp.
    #[inline]
    pub fn triggered(&mut self, now_us: u64) {
        self.pending_since.get_or_insert(now_us);
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Stop commands went out at `now_us`. Returns the measured latency.
    pub fn stop_issued(&mut self, now_us: u64) -> Option<u64> {
        let since = self.pending_since.take()?;
        let latency = now_us.saturating_sub(since);
        self.last_us = Some(latency);
        self.worst_us = self.worst_us.max(latency);
        if latency > self.bound_us {
            self.violations += 1;
            error!(latency_us = latency, bound_us = self.bound_us, "emergency stop latency bound exceeded");
        }
        Some(latency)
    }

    #[inline]
    pub fn last_us(&self) -> Option<u64> {
        self.last_us
    }

    #[inline]
    pub fn worst_us(&self) -> u64 {
        self.worst_us
    }

    #[inline]
    pub fn violations(&self) -> u64 {
        self.violations
    }
}
