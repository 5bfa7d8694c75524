//! Driver device model: command encoding and status decoding.
//!
//! The device variants differ only in their DRV_STATUS layout and clock,
//! so a [`DriverDevice`] is built once from configuration and carries the
//! selected layout. Encoding rejects any value that does not fit its
//! field; nothing is silently clamped.

use motus_common::hal::registers::{
    self, DATAGRAM_LEN, DrvStatusLayout, DriverModel, Register, WRITE_BIT, gstat, ihold_irun,
    status_byte, vactual,
};
use motus_common::motion::error::{ConfigurationError, DriverFault};

// ─── Datagrams ──────────────────────────────────────────────────────

/// One 40-bit datagram addressed to a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Datagram {
    /// Address byte, write flag included.
    pub address: u8,
    /// 32-bit payload.
    pub data: u32,
}

impl Datagram {
    /// Write request.
    #[inline]
    pub const fn write(register: Register, data: u32) -> Self {
        Self {
            address: register.address() | WRITE_BIT,
            data,
        }
    }

    /// Read request. The register contents arrive with the next transaction.
    #[inline]
    pub const fn read(register: Register) -> Self {
        Self {
            address: register.address(),
            data: 0,
        }
    }

    #[inline]
    pub const fn is_write(&self) -> bool {
        self.address & WRITE_BIT != 0
    }

    #[inline]
    pub const fn register(&self) -> Option<Register> {
        Register::from_address(self.address)
    }

    /// Serialize: address byte followed by the big-endian payload.
    #[inline]
    pub fn to_bytes(&self) -> [u8; DATAGRAM_LEN] {
        let d = self.data.to_be_bytes();
        [self.address, d[0], d[1], d[2], d[3]]
    }
}

/// Reply status byte, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags {
    pub reset: bool,
    pub driver_error: bool,
    pub stall: bool,
    pub standstill: bool,
}

impl StatusFlags {
    /// Decode a status byte. `None` when a reserved bit is set.
    #[inline]
    pub const fn decode(byte: u8) -> Option<Self> {
        if byte & status_byte::RESERVED_MASK != 0 {
            return None;
        }
        Some(Self {
            reset: byte & status_byte::RESET != 0,
            driver_error: byte & status_byte::DRIVER_ERROR != 0,
            stall: byte & status_byte::STALL != 0,
            standstill: byte & status_byte::STANDSTILL != 0,
        })
    }

    /// Faults readable directly from the status byte.
    #[inline]
    pub fn faults(&self) -> DriverFault {
        let mut f = DriverFault::empty();
        f.set(DriverFault::RESET, self.reset);
        f.set(DriverFault::STALL, self.stall);
        f
    }
}

/// One device's reply slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reply {
    pub status: StatusFlags,
    /// Data of the previous read request.
    pub data: u32,
}

// ─── Commands ───────────────────────────────────────────────────────

/// Command for one device in one transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverCommand {
    /// Velocity [µsteps/s], written to VACTUAL.
    Velocity(f64),
    /// Zero velocity.
    Stop,
    /// Raw register write.
    Write { register: Register, value: u32 },
    /// Read request.
    Read(Register),
}

/// Decoded register contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedStatus {
    pub faults: DriverFault,
    pub standstill: bool,
    /// Stall detector load value (DRV_STATUS only).
    pub load: u16,
    /// Actual current scale (DRV_STATUS only).
    pub current_scale: u8,
}

// ─── Device model ───────────────────────────────────────────────────

/// Encoder/decoder for one device model, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverDevice {
    model: DriverModel,
    layout: DrvStatusLayout,
    clock_hz: f64,
}

impl DriverDevice {
    pub fn new(model: DriverModel, clock_hz: f64) -> Self {
        Self {
            model,
            layout: model.drv_status_layout(),
            clock_hz,
        }
    }

    #[inline]
    pub const fn model(&self) -> DriverModel {
        self.model
    }

    /// Encode one command.
    pub fn encode_command(&self, command: &DriverCommand) -> Result<Datagram, ConfigurationError> {
        match *command {
            DriverCommand::Velocity(usteps) => {
                let code = self.velocity_to_vactual(usteps)?;
                let word = vactual::VALUE.insert_signed(0, code).ok_or(ConfigurationError::Invalid {
                    field: "vactual",
                    reason: "value does not fit field",
                })?;
                Ok(Datagram::write(Register::Vactual, word))
            }
            DriverCommand::Stop => Ok(Datagram::write(Register::Vactual, 0)),
            DriverCommand::Write { register, value } => {
                if !register.is_writable() {
                    return Err(ConfigurationError::Invalid {
                        field: "register",
                        reason: "register is read-only",
                    });
                }
                Ok(Datagram::write(register, value))
            }
            DriverCommand::Read(register) => {
                if !register.is_readable() {
                    return Err(ConfigurationError::Invalid {
                        field: "register",
                        reason: "register is write-only",
                    });
                }
                Ok(Datagram::read(register))
            }
        }
    }

    /// Decode the data word of a read request.
    pub fn decode_status(&self, register: Register, word: u32) -> DecodedStatus {
        match register {
            Register::DrvStatus => self.decode_drv_status(word),
            Register::Gstat => decode_gstat(word),
            _ => DecodedStatus::default(),
        }
    }

    fn decode_drv_status(&self, word: u32) -> DecodedStatus {
        let l = &self.layout;
        let mut faults = DriverFault::empty();
        let short_supply = l.short_supply_a.is_some_and(|f| f.is_set(word))
            || l.short_supply_b.is_some_and(|f| f.is_set(word));
        faults.set(
            DriverFault::OVERCURRENT,
            l.short_ground_a.is_set(word) || l.short_ground_b.is_set(word) || short_supply,
        );
        faults.set(DriverFault::THERMAL_SHUTDOWN, l.over_temperature.is_set(word));
        faults.set(DriverFault::THERMAL_WARNING, l.over_temperature_warning.is_set(word));
        faults.set(DriverFault::STALL, l.stall.is_set(word));
        faults.set(
            DriverFault::OPEN_LOAD,
            l.open_load_a.is_set(word) || l.open_load_b.is_set(word),
        );
        DecodedStatus {
            faults,
            standstill: l.standstill.is_set(word),
            load: l.sg_result.extract(word) as u16,
            current_scale: l.cs_actual.extract(word) as u8,
        }
    }

    /// Build the DRV_STATUS word a device reports for `faults`.
    ///
    /// Flags with no DRV_STATUS bit (undervoltage, reset) are ignored.
    pub fn drv_status_word(&self, faults: DriverFault, standstill: bool) -> u32 {
        let l = &self.layout;
        let mut word = 0u32;
        let mut set = |field: registers::Field, on: bool| {
            if on {
                word |= field.mask();
            }
        };
        set(l.short_ground_a, faults.contains(DriverFault::OVERCURRENT));
        set(l.over_temperature, faults.contains(DriverFault::THERMAL_SHUTDOWN));
        set(l.over_temperature_warning, faults.contains(DriverFault::THERMAL_WARNING));
        set(l.stall, faults.contains(DriverFault::STALL));
        set(l.open_load_a, faults.contains(DriverFault::OPEN_LOAD));
        set(l.standstill, standstill);
        word
    }

    /// Convert µsteps/s to the VACTUAL fixed-point code.
    pub fn velocity_to_vactual(&self, usteps_per_s: f64) -> Result<i32, ConfigurationError> {
        let (min, max) = vactual::VALUE.signed_range();
        let scale = f64::from(1u32 << vactual::SCALE_BITS) / self.clock_hz;
        let code = (usteps_per_s * scale).round();
        ConfigurationError::check_range("vactual", code, f64::from(min), f64::from(max))?;
        Ok(code as i32)
    }

    /// Convert a VACTUAL code back to µsteps/s.
    #[inline]
    pub fn vactual_to_velocity(&self, code: i32) -> f64 {
        f64::from(code) * self.clock_hz / f64::from(1u32 << vactual::SCALE_BITS)
    }
}

fn decode_gstat(word: u32) -> DecodedStatus {
    let mut faults = DriverFault::empty();
    faults.set(DriverFault::RESET, gstat::RESET.is_set(word));
    faults.set(DriverFault::UNDERVOLTAGE, gstat::UV_CP.is_set(word));
    DecodedStatus {
        faults,
        ..Default::default()
    }
}

/// Encode IHOLD_IRUN from current codes. Each code must fit its field.
pub fn encode_ihold_irun(hold: u8, run: u8, delay: u8) -> Result<u32, ConfigurationError> {
    let out_of_range = |field, value: u8, max: u32| ConfigurationError::OutOfRange {
        field,
        value: f64::from(value),
        min: 0.0,
        max: f64::from(max),
    };
    let word = ihold_irun::IHOLD
        .insert(0, u32::from(hold))
        .ok_or_else(|| out_of_range("ihold", hold, ihold_irun::IHOLD.max()))?;
    let word = ihold_irun::IRUN
        .insert(word, u32::from(run))
        .ok_or_else(|| out_of_range("irun", run, ihold_irun::IRUN.max()))?;
    ihold_irun::IHOLDDELAY
        .insert(word, u32::from(delay))
        .ok_or_else(|| out_of_range("iholddelay", delay, ihold_irun::IHOLDDELAY.max()))
}
