//! Hardware abstraction boundary.
//!
//! The core knows the board only through the small synchronous capability
//! set in [`driver`], the sensor events posted from interrupt context in
//! [`types`], and the chained driver register layout in [`registers`].

pub mod driver;
pub mod registers;
pub mod types;
