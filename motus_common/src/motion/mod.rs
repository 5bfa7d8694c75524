//! Motion core shared types.
//!
//! Everything exchanged between the RT core, the simulated board and the
//! communication layer lives here: state enums, the error taxonomy,
//! configuration structures, motor commands and telemetry payloads.

pub mod command;
pub mod config;
pub mod error;
pub mod state;
pub mod telemetry;
