//! Error module root.
//!
//! Maps every error class onto the escalation the safety supervisor acts
//! on: retry locally, stop one axis, warn, fault, or emergency stop.

pub mod propagation;

pub use propagation::Escalation;
