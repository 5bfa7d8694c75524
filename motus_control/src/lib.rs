//! # motus Control Core
//!
//! Real-time multi-axis stepper positioning with safety interlocks. One
//! cooperative tick (default 1 kHz) runs the safety supervisor, every axis
//! controller and exactly one transaction on the daisy-chained driver bus.
//!
//! ## Layers
//!
//! 1. **Scheduler** - strict per-tick ordering: Safety → Motor Control →
//!    Communication → Telemetry
//! 2. **Safety Supervisor** - Init/Safe/Warning/Fault/EmergencyStop state
//!    machine, emergency latch, watchdog gate
//! 3. **Coordinator** - command validation, coordinated moves, bus
//!    arbitration
//! 4. **Planner** - trapezoidal and S-curve segments, velocity-continuous
//!    replanning
//! 5. **Axis Controller** - sensor fusion, PID + feedforward, output clamp,
//!    auto-tune
//! 6. **Protocol Engine** - 40-bit datagrams, chain framing, retry, status
//!    polling
//!
//! ## Zero-Allocation Tick
//!
//! All runtime state is sized at startup from `motus_common::consts`; the
//! tick itself never allocates.

pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod planner;
pub mod protocol;
pub mod safety;
pub mod scheduler;
