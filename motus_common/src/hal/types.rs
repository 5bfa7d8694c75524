//! Board-level data types: pins, bus errors and ISR sensor events.

use heapless::spsc::{Consumer, Producer, Queue};
use thiserror::Error;

use crate::consts::SENSOR_QUEUE_DEPTH;
use crate::motion::error::TransferFailure;
use crate::motion::state::AxisId;

/// Discrete signals the core reads or drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    /// Hardware emergency-stop input (high = asserted).
    EmergencyInput,
    /// Operator confirmation that the external fault has cleared (high = clear).
    ResetConfirm,
    /// Driver enable output (high = bridges enabled).
    DriverEnable,
    /// Fault indicator output.
    FaultLamp,
}

/// Bus transfer failure reported by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// Transfer did not complete in time.
    #[error("bus transfer timed out")]
    Timeout,
    /// Frame error detected by the peripheral.
    #[error("bus framing error")]
    Framing,
    /// CRC/checksum mismatch detected by the peripheral.
    #[error("bus checksum mismatch")]
    Checksum,
    /// Bus held by another transaction.
    #[error("bus busy")]
    Busy,
    /// `tx` and `rx` lengths differ.
    #[error("tx/rx length mismatch")]
    LengthMismatch,
}

impl BusError {
    /// Map to the transfer failure class used by the retry policy.
    pub const fn failure(&self) -> TransferFailure {
        match self {
            Self::Timeout => TransferFailure::Timeout,
            Self::Framing | Self::LengthMismatch => TransferFailure::Framing,
            Self::Checksum => TransferFailure::Checksum,
            Self::Busy => TransferFailure::Busy,
        }
    }
}

/// Event posted by interrupt-context code.
///
/// ISRs only enqueue; all interpretation happens in the safety task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Primary angle sensor sample [units].
    AngleSample { axis: AxisId, angle: f64, tick_us: u64 },
    /// Redundant (second channel) angle sample [units].
    RedundantAngle { axis: AxisId, angle: f64, tick_us: u64 },
    /// Phase current sample [A].
    Current { axis: AxisId, amps: f64, tick_us: u64 },
    /// Temperature sample [°C].
    Temperature { axis: AxisId, celsius: f64, tick_us: u64 },
    /// Motor supply voltage sample [V].
    SupplyVoltage { volts: f64, tick_us: u64 },
    /// Edge on the hardware emergency input.
    EmergencyInput { asserted: bool, tick_us: u64 },
}

impl SensorEvent {
    /// Timestamp of the sample [µs].
    pub const fn tick_us(&self) -> u64 {
        match *self {
            Self::AngleSample { tick_us, .. }
            | Self::RedundantAngle { tick_us, .. }
            | Self::Current { tick_us, .. }
            | Self::Temperature { tick_us, .. }
            | Self::SupplyVoltage { tick_us, .. }
            | Self::EmergencyInput { tick_us, .. } => tick_us,
        }
    }
}

/// Lock-free single-producer/single-consumer sensor queue.
pub type SensorQueue = Queue<SensorEvent, SENSOR_QUEUE_DEPTH>;

/// ISR-side handle.
pub type SensorProducer = Producer<'static, SensorEvent, SENSOR_QUEUE_DEPTH>;

/// Task-side handle.
pub type SensorConsumer = Consumer<'static, SensorEvent, SENSOR_QUEUE_DEPTH>;

/// Allocate the sensor queue once at startup and split it.
///
/// The queue lives for the rest of the process, matching a `static`
/// queue on a bare-metal target.
pub fn sensor_channel() -> (SensorProducer, SensorConsumer) {
    let queue: &'static mut SensorQueue = Box::leak(Box::new(Queue::new()));
    queue.split()
}
