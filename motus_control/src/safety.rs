//! Safety module root.
//!
//! Channel threshold monitoring, dual-channel cross-checks, the emergency
//! latch, the watchdog refresh gate and the supervisor state machine that
//! ties them together.

pub mod channels;
pub mod dual_channel;
pub mod latch;
pub mod supervisor;
pub mod watchdog;

pub use latch::{EmergencyReader, EmergencyWriter, emergency_latch};
pub use supervisor::{SafetyInputs, SafetySupervisor, SafetyVerdict};
pub use watchdog::WatchdogGate;
