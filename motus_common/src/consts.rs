//! System-wide constants for the motus workspace.
//!
//! Single source of truth for fixed capacities. Every RT data structure is
//! sized from these, so the control tick never allocates.

/// Maximum number of axes (and chained driver devices) on one bus.
pub const MAX_AXES: usize = 8;

/// Maximum number of constant-jerk phases in one motion segment.
///
/// Seven for a full S-curve, plus up to four lead-in phases used when a
/// segment is replanned from a moving state (bring acceleration to zero,
/// then stop before reversing).
pub const MAX_PHASES: usize = 12;

/// Capacity of the ISR → task sensor event queue.
///
/// `heapless::spsc::Queue` keeps one slot free, so usable depth is one less.
pub const SENSOR_QUEUE_DEPTH: usize = 64;

/// Capacity of the inbound motor command queue.
pub const COMMAND_QUEUE_DEPTH: usize = 16;

/// Capacity of the outbound telemetry queue.
pub const TELEMETRY_QUEUE_DEPTH: usize = 8;

/// Default control tick period in microseconds (1 kHz).
pub const TICK_US: u32 = 1000;

/// Minimum configurable tick period [µs].
pub const TICK_US_MIN: u32 = 100;

/// Maximum configurable tick period [µs].
pub const TICK_US_MAX: u32 = 10_000;

/// Default configuration file path for the host binary.
pub const DEFAULT_CONFIG_PATH: &str = "config/machine.toml";
