//! Host real-time setup and tick pacing.
//!
//! With the `rt` feature the host loop locks memory, pins itself to one
//! core, runs under `SCHED_FIFO` and sleeps with
//! `clock_nanosleep(TIMER_ABSTIME)`. Without it every setup call is a
//! no-op and pacing falls back to `std::thread::sleep`.

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum RtError {
    #[error("RT setup failed: {0}")]
    Setup(String),
}

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), RtError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RtError::Setup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), RtError> {
    Ok(())
}

/// Touch 256 KiB of stack so the tick never page-faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, aligned, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), RtError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| RtError::Setup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset).map_err(|e| RtError::Setup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), RtError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), RtError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RtError::Setup(format!("sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}")));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), RtError> {
    Ok(())
}

/// Full RT setup sequence; call once before the first tick.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), RtError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    debug!(cpu_core, rt_priority, rt = cfg!(feature = "rt"), "host RT setup done");
    Ok(())
}

// ─── Pacer ──────────────────────────────────────────────────────────

/// Sleeps until the next tick boundary on an absolute schedule, so
/// per-tick jitter never accumulates into drift.
#[derive(Debug)]
pub struct Pacer {
    period_ns: i64,
    #[cfg(feature = "rt")]
    next: nix::sys::time::TimeSpec,
    #[cfg(not(feature = "rt"))]
    next: std::time::Instant,
    late: u64,
}

impl Pacer {
    #[cfg(feature = "rt")]
    pub fn new(period_us: u32) -> Result<Self, RtError> {
        use nix::time::{ClockId, clock_gettime};
        let next = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(|e| RtError::Setup(format!("clock_gettime: {e}")))?;
        Ok(Self {
            period_ns: i64::from(period_us) * 1000,
            next,
            late: 0,
        })
    }

    #[cfg(not(feature = "rt"))]
    pub fn new(period_us: u32) -> Result<Self, RtError> {
        Ok(Self {
            period_ns: i64::from(period_us) * 1000,
            next: std::time::Instant::now(),
            late: 0,
        })
    }

    /// Block until the next boundary. Returns `false` when the boundary had
    /// already passed.
    #[cfg(feature = "rt")]
    pub fn wait(&mut self) -> bool {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};
        let clock = ClockId::CLOCK_MONOTONIC;
        self.next = timespec_add_ns(self.next, self.period_ns);
        let on_time = clock_gettime(clock).map(|now| now < self.next).unwrap_or(true);
        if !on_time {
            self.late += 1;
        }
        let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &self.next);
        on_time
    }

    #[cfg(not(feature = "rt"))]
    pub fn wait(&mut self) -> bool {
        use std::time::{Duration, Instant};
        self.next += Duration::from_nanos(self.period_ns as u64);
        let now = Instant::now();
        match self.next.checked_duration_since(now) {
            Some(remaining) => {
                std::thread::sleep(remaining);
                true
            }
            None => {
                self.late += 1;
                // Re-anchor instead of bursting to catch up.
                self.next = now;
                false
            }
        }
    }

    /// Boundaries that had already passed when `wait` was called.
    #[inline]
    pub fn late(&self) -> u64 {
        self.late
    }
}

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let total = ts.tv_nsec() + ns;
    TimeSpec::new(ts.tv_sec() + total.div_euclid(1_000_000_000), total.rem_euclid(1_000_000_000))
}
