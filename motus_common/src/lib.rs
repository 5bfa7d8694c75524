//! Motus Common Library
//!
//! Shared types for the motus multi-axis stepper core: state enums, the error
//! taxonomy, configuration structures, command and telemetry payloads, and
//! the hardware capability interface the core consumes.
//!
//! # Module Structure
//!
//! - [`consts`] - Compile-time capacities (axes, phases, queue depths)
//! - [`config`] - TOML loading traits and shared config fields
//! - [`motion`] - State, error, configuration, command and telemetry types
//! - [`hal`] - Capability traits, sensor events, driver register map
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use motus_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod hal;
pub mod motion;
pub mod prelude;
