//! Driver Protocol Engine.
//!
//! Encodes one command per chained device into a single bus transaction and
//! decodes the returned status words per device.
//!
//! - [`model`] - datagrams, device-model encode/decode
//! - [`codec`] - frame packing in physical chain order
//! - [`chain`] - transaction engine with whole-frame retry and status polling

pub mod chain;
pub mod codec;
pub mod model;

pub use chain::{ChainEngine, ChainReply, ChainStats};
pub use model::{DecodedStatus, DriverCommand, DriverDevice, StatusFlags};
