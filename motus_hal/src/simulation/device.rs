//! Register-level model of one chained driver device.

use motus_common::hal::registers::{
    DATAGRAM_LEN, DriverModel, DrvStatusLayout, Register, WRITE_BIT, gconf, gstat, status_byte, vactual,
};
use motus_common::motion::error::DriverFault;

/// One device on the daisy chain.
///
/// Holds the writable registers, the injected fault set and the pipelined
/// read latch: the data shifted out in a reply belongs to the read request
/// of the previous transaction.
#[derive(Debug, Clone)]
pub struct ChainDevice {
    layout: DrvStatusLayout,
    clock_hz: f64,
    gconf: u32,
    ihold_irun: u32,
    vactual: i32,
    gstat: u32,
    faults: DriverFault,
    read_latch: u32,
}

impl ChainDevice {
    /// Device in its power-up state (GSTAT reset flag set, motor stopped).
    pub fn new(model: DriverModel, clock_hz: f64) -> Self {
        Self {
            layout: model.drv_status_layout(),
            clock_hz,
            gconf: 0,
            ihold_irun: 0,
            vactual: 0,
            gstat: gstat::RESET.mask(),
            faults: DriverFault::empty(),
            read_latch: 0,
        }
    }

    /// Exchange one datagram: returns the reply for this slot, then
    /// applies the received command.
    pub fn exchange(&mut self, datagram: &[u8; DATAGRAM_LEN]) -> [u8; DATAGRAM_LEN] {
        let data = self.read_latch.to_be_bytes();
        let reply = [self.status_byte(), data[0], data[1], data[2], data[3]];

        let value = u32::from_be_bytes([datagram[1], datagram[2], datagram[3], datagram[4]]);
        let register = Register::from_address(datagram[0]);
        if datagram[0] & WRITE_BIT != 0 {
            match register {
                Some(Register::Gconf) => self.gconf = value,
                Some(Register::IholdIrun) => self.ihold_irun = value,
                Some(Register::Vactual) => self.vactual = vactual::VALUE.extract_signed(value),
                Some(Register::Gstat) => self.gstat &= !value,
                _ => {}
            }
        } else {
            self.read_latch = match register {
                Some(Register::Gconf) => self.gconf,
                Some(Register::Gstat) => self.gstat,
                Some(Register::DrvStatus) => self.drv_status(),
                _ => 0,
            };
        }
        reply
    }

    fn status_byte(&self) -> u8 {
        let mut byte = 0;
        if gstat::RESET.is_set(self.gstat) {
            byte |= status_byte::RESET;
        }
        if self
            .faults
            .intersects(DriverFault::OVERCURRENT | DriverFault::THERMAL_SHUTDOWN | DriverFault::THERMAL_WARNING | DriverFault::OPEN_LOAD)
        {
            byte |= status_byte::DRIVER_ERROR;
        }
        if self.faults.contains(DriverFault::STALL) {
            byte |= status_byte::STALL;
        }
        if self.vactual == 0 {
            byte |= status_byte::STANDSTILL;
        }
        byte
    }

    fn drv_status(&self) -> u32 {
        let l = &self.layout;
        let mut word = 0;
        let flags = [
            (l.short_ground_a, DriverFault::OVERCURRENT),
            (l.over_temperature, DriverFault::THERMAL_SHUTDOWN),
            (l.over_temperature_warning, DriverFault::THERMAL_WARNING),
            (l.stall, DriverFault::STALL),
            (l.open_load_a, DriverFault::OPEN_LOAD),
        ];
        for (field, flag) in flags {
            if self.faults.contains(flag) {
                word |= field.mask();
            }
        }
        if self.vactual == 0 {
            word |= l.standstill.mask();
        }
        word
    }

    /// Set or clear injected fault flags. Undervoltage and reset are
    /// reported through GSTAT, everything else through DRV_STATUS.
    pub fn inject(&mut self, faults: DriverFault, on: bool) {
        let drv = faults.difference(DriverFault::UNDERVOLTAGE | DriverFault::RESET);
        self.faults.set(drv, on);
        if faults.contains(DriverFault::UNDERVOLTAGE) && on {
            self.gstat |= gstat::UV_CP.mask();
        }
        if faults.contains(DriverFault::RESET) && on {
            self.power_cycle();
        }
    }

    /// Lose every register value, as after a supply brown-out.
    pub fn power_cycle(&mut self) {
        self.gconf = 0;
        self.ihold_irun = 0;
        self.vactual = 0;
        self.gstat |= gstat::RESET.mask();
    }

    /// Raw VACTUAL code.
    #[inline]
    pub fn vactual(&self) -> i32 {
        self.vactual
    }

    /// Raw IHOLD_IRUN word.
    #[inline]
    pub fn ihold_irun(&self) -> u32 {
        self.ihold_irun
    }

    /// Commanded motor velocity [µsteps/s], zero unless the device runs
    /// in internal velocity mode. Direction inversion is applied.
    pub fn velocity(&self) -> f64 {
        if !gconf::INTERNAL_VELOCITY.is_set(self.gconf) {
            return 0.0;
        }
        let v = f64::from(self.vactual) * self.clock_hz / f64::from(1u32 << vactual::SCALE_BITS);
        if gconf::SHAFT.is_set(self.gconf) { -v } else { v }
    }
}
