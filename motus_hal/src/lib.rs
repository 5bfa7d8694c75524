//! # Motus HAL Library
//!
//! Board implementations of the capability interface defined in
//! `motus_common::hal::driver`. The only board shipped here is a
//! deterministic simulation used by the host binary, the integration
//! tests and the benchmarks.
//!
//! # Module Structure
//!
//! - [`simulation`] - simulated board: driver chain, motor plants, GPIO, watchdog
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        SimBoard                               │
//! │  ┌──────────────┐   ┌───────────────┐   ┌─────────────────┐   │
//! │  │ ChainDevice  │──►│  AxisPlant    │──►│ SensorProducer  │──►│ core
//! │  │ (registers)  │   │ (first order) │   │ (ISR events)    │   │
//! │  └──────▲───────┘   └───────────────┘   └─────────────────┘   │
//! │         │ bus_transfer                                        │
//! │  ┌──────┴───────┐   ┌───────────────┐                         │
//! │  │ frame slots  │   │  GpioBank     │◄── gpio_read/write      │
//! │  └──────────────┘   └───────────────┘                         │
//! └───────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod simulation;

pub use simulation::{SimBoard, SimWatchdog};
