//! Register map of the daisy-chained stepper driver devices.
//!
//! Each device exchanges a 40-bit datagram per transaction:
//!
//! ```text
//! TX:  [ addr | W ] [ d31..d24 ] [ d23..d16 ] [ d15..d8 ] [ d7..d0 ]
//! RX:  [ status   ] [ ............ data of the previous read ........ ]
//! ```
//!
//! Bit 7 of the address byte selects write. Reads are pipelined: the data
//! returned in a reply belongs to the read request of the previous
//! transaction. All fields are fixed-width and fixed-point; [`Field`]
//! performs the exact mask/shift.
//!
//! Slot 0 of a chain frame is shifted out first and therefore reaches the
//! device farthest from the controller. Chain position `p` of `n` devices
//! occupies slot `n - 1 - p` in both directions.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Bytes per device datagram.
pub const DATAGRAM_LEN: usize = 5;

// Address byte plus one 32-bit register word.
const_assert_eq!(DATAGRAM_LEN, 1 + core::mem::size_of::<u32>());

/// Write-access flag in the address byte.
pub const WRITE_BIT: u8 = 0x80;

/// Address bits of the address byte.
pub const ADDRESS_MASK: u8 = 0x7F;

/// Frame slot occupied by chain position `position` in a chain of `len`.
#[inline]
pub const fn slot_of(position: usize, len: usize) -> usize {
    len - 1 - position
}

/// Register addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Register {
    /// Global configuration.
    Gconf = 0x00,
    /// Global status (read clears).
    Gstat = 0x01,
    /// Hold / run current and hold delay.
    IholdIrun = 0x10,
    /// Signed velocity command.
    Vactual = 0x22,
    /// Driver status and fault flags.
    DrvStatus = 0x6F,
}

impl Register {
    /// Look up a register by its 7-bit address.
    #[inline]
    pub const fn from_address(address: u8) -> Option<Self> {
        match address & ADDRESS_MASK {
            0x00 => Some(Self::Gconf),
            0x01 => Some(Self::Gstat),
            0x10 => Some(Self::IholdIrun),
            0x22 => Some(Self::Vactual),
            0x6F => Some(Self::DrvStatus),
            _ => None,
        }
    }

    /// 7-bit address.
    #[inline]
    pub const fn address(&self) -> u8 {
        *self as u8
    }

    /// Whether the register accepts writes.
    #[inline]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::Gconf | Self::Gstat | Self::IholdIrun | Self::Vactual)
    }

    /// Whether the register can be read back.
    #[inline]
    pub const fn is_readable(&self) -> bool {
        matches!(self, Self::Gconf | Self::Gstat | Self::DrvStatus)
    }
}

/// A fixed-width bit field inside a 32-bit register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Position of the least significant bit.
    pub shift: u8,
    /// Width in bits (1..=32).
    pub width: u8,
}

impl Field {
    /// Construct a field.
    pub const fn new(shift: u8, width: u8) -> Self {
        Self { shift, width }
    }

    /// Largest unsigned value the field can hold.
    #[inline]
    pub const fn max(&self) -> u32 {
        ((1u64 << self.width) - 1) as u32
    }

    /// Mask of the field in its register word.
    #[inline]
    pub const fn mask(&self) -> u32 {
        self.max() << self.shift
    }

    /// Extract the raw unsigned value.
    #[inline]
    pub const fn extract(&self, word: u32) -> u32 {
        (word & self.mask()) >> self.shift
    }

    /// Extract as two's-complement signed value.
    #[inline]
    pub const fn extract_signed(&self, word: u32) -> i32 {
        let raw = self.extract(word);
        let sign_bit = 1u32 << (self.width - 1);
        if raw & sign_bit != 0 {
            (raw as i64 - (1i64 << self.width)) as i32
        } else {
            raw as i32
        }
    }

    /// Insert an unsigned value. `None` if it does not fit.
    #[inline]
    pub const fn insert(&self, word: u32, value: u32) -> Option<u32> {
        if value > self.max() {
            return None;
        }
        Some((word & !self.mask()) | (value << self.shift))
    }

    /// Smallest and largest signed value the field can hold.
    #[inline]
    pub const fn signed_range(&self) -> (i32, i32) {
        let half = 1i64 << (self.width - 1);
        ((-half + 1) as i32, (half - 1) as i32)
    }

    /// Insert a signed value in two's complement. `None` if it does not fit.
    ///
    /// The most negative code is excluded so the range is symmetric.
    #[inline]
    pub const fn insert_signed(&self, word: u32, value: i32) -> Option<u32> {
        let (min, max) = self.signed_range();
        if value < min || value > max {
            return None;
        }
        let raw = (value as u32) & self.max();
        Some((word & !self.mask()) | (raw << self.shift))
    }

    /// Test a single-bit field.
    #[inline]
    pub const fn is_set(&self, word: u32) -> bool {
        self.extract(word) != 0
    }
}

/// Reply status byte flags.
pub mod status_byte {
    /// Device has been reset since GSTAT was last cleared.
    pub const RESET: u8 = 0x01;
    /// A driver error is latched in DRV_STATUS.
    pub const DRIVER_ERROR: u8 = 0x02;
    /// Stall detector active.
    pub const STALL: u8 = 0x04;
    /// Motor at standstill.
    pub const STANDSTILL: u8 = 0x08;
    /// Reserved bits; always zero on a healthy link.
    pub const RESERVED_MASK: u8 = 0xF0;
}

/// GSTAT fields.
pub mod gstat {
    use super::Field;
    pub const RESET: Field = Field::new(0, 1);
    pub const DRV_ERR: Field = Field::new(1, 1);
    pub const UV_CP: Field = Field::new(2, 1);
    /// Write-one-to-clear mask for all flags.
    pub const CLEAR_ALL: u32 = 0x7;
}

/// GCONF fields.
pub mod gconf {
    use super::Field;
    /// Velocity command taken from VACTUAL instead of step/dir input.
    pub const INTERNAL_VELOCITY: Field = Field::new(0, 1);
    /// Invert motor direction.
    pub const SHAFT: Field = Field::new(3, 1);
}

/// IHOLD_IRUN fields. Currents are in 1/32 of driver full scale, minus one.
pub mod ihold_irun {
    use super::Field;
    pub const IHOLD: Field = Field::new(0, 5);
    pub const IRUN: Field = Field::new(8, 5);
    pub const IHOLDDELAY: Field = Field::new(16, 4);
}

/// VACTUAL field: signed 24-bit velocity, units of µsteps per `2^24 / f_clk` s.
pub mod vactual {
    use super::Field;
    pub const VALUE: Field = Field::new(0, 24);
    /// Fixed-point scale exponent.
    pub const SCALE_BITS: u32 = 24;
}

/// DRV_STATUS layout, which differs between device models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrvStatusLayout {
    pub sg_result: Field,
    pub cs_actual: Field,
    pub stall: Field,
    pub over_temperature: Field,
    pub over_temperature_warning: Field,
    pub short_ground_a: Field,
    pub short_ground_b: Field,
    pub open_load_a: Field,
    pub open_load_b: Field,
    pub standstill: Field,
    /// Low-side short detection, present only on high-voltage devices.
    pub short_supply_a: Option<Field>,
    pub short_supply_b: Option<Field>,
}

const COMMON_DRV_STATUS: DrvStatusLayout = DrvStatusLayout {
    sg_result: Field::new(0, 10),
    cs_actual: Field::new(16, 5),
    stall: Field::new(24, 1),
    over_temperature: Field::new(25, 1),
    over_temperature_warning: Field::new(26, 1),
    short_ground_a: Field::new(27, 1),
    short_ground_b: Field::new(28, 1),
    open_load_a: Field::new(29, 1),
    open_load_b: Field::new(30, 1),
    standstill: Field::new(31, 1),
    short_supply_a: None,
    short_supply_b: None,
};

/// Chained driver device model, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverModel {
    /// Standard low-voltage device.
    #[default]
    Standard,
    /// High-voltage device with additional low-side short detection.
    HighVoltage,
}

impl DriverModel {
    /// DRV_STATUS bit layout.
    pub const fn drv_status_layout(&self) -> DrvStatusLayout {
        match self {
            Self::Standard => COMMON_DRV_STATUS,
            Self::HighVoltage => DrvStatusLayout {
                short_supply_a: Some(Field::new(12, 1)),
                short_supply_b: Some(Field::new(13, 1)),
                ..COMMON_DRV_STATUS
            },
        }
    }

    /// Nominal internal clock frequency [Hz].
    pub const fn default_clock_hz(&self) -> f64 {
        match self {
            Self::Standard => 12_000_000.0,
            Self::HighVoltage => 16_000_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn field_insert_extract() {
        let f = Field::new(8, 5);
        assert_eq!(f.mask(), 0x1F00);
        let w = f.insert(0xFFFF_0000, 17).unwrap();
        assert_eq!(f.extract(w), 17);
        assert_eq!(w & 0xFFFF_0000, 0xFFFF_0000);
        assert!(f.insert(0, 32).is_none());
    }

    #[test]
    fn signed_field_twos_complement() {
        let f = vactual::VALUE;
        let w = f.insert_signed(0, -1).unwrap();
        assert_eq!(w, 0x00FF_FFFF);
        assert_eq!(f.extract_signed(w), -1);
        let (min, max) = f.signed_range();
        assert_eq!(max, (1 << 23) - 1);
        assert_eq!(min, -((1 << 23) - 1));
        assert!(f.insert_signed(0, max + 1).is_none());
        assert!(f.insert_signed(0, min - 1).is_none());
        assert_eq!(f.extract_signed(f.insert_signed(0, min).unwrap()), min);
    }

    #[test]
    fn register_lookup() {
        assert_eq!(Register::from_address(0x22), Some(Register::Vactual));
        assert_eq!(Register::from_address(0x22 | WRITE_BIT), Some(Register::Vactual));
        assert_eq!(Register::from_address(0x7E), None);
        assert!(!Register::DrvStatus.is_writable());
        assert!(!Register::Vactual.is_readable());
    }

    #[test]
    fn slot_mapping_reverses_chain() {
        assert_eq!(slot_of(0, 3), 2);
        assert_eq!(slot_of(2, 3), 0);
    }

    #[test]
    fn high_voltage_layout_adds_supply_shorts() {
        assert!(DriverModel::Standard.drv_status_layout().short_supply_a.is_none());
        let hv = DriverModel::HighVoltage.drv_status_layout();
        assert_eq!(hv.short_supply_a, Some(Field::new(12, 1)));
        assert_eq!(hv.stall, Field::new(24, 1));
    }

    fn field_and_value() -> impl Strategy<Value = (Field, u32)> {
        (1u8..=32)
            .prop_flat_map(|width| (0..=32 - width, Just(width)))
            .prop_flat_map(|(shift, width)| {
                let field = Field::new(shift, width);
                (Just(field), 0..=field.max())
            })
    }

    fn field_and_signed() -> impl Strategy<Value = (Field, i32)> {
        (1u8..=32)
            .prop_flat_map(|width| (0..=32 - width, Just(width)))
            .prop_flat_map(|(shift, width)| {
                let field = Field::new(shift, width);
                let (min, max) = field.signed_range();
                (Just(field), min..=max)
            })
    }

    proptest! {
        #[test]
        fn insert_keeps_the_rest_of_the_word((field, value) in field_and_value(), word in any::<u32>()) {
            let w = field.insert(word, value).unwrap();
            prop_assert_eq!(field.extract(w), value);
            prop_assert_eq!(w & !field.mask(), word & !field.mask());
        }

        #[test]
        fn signed_insert_extract((field, value) in field_and_signed(), word in any::<u32>()) {
            let w = field.insert_signed(word, value).unwrap();
            prop_assert_eq!(field.extract_signed(w), value);
            prop_assert_eq!(w & !field.mask(), word & !field.mask());
        }

        #[test]
        fn oversized_value_rejected(width in 1u8..32, excess in 1u32..1024) {
            let field = Field::new(0, width);
            let value = field.max().saturating_add(excess);
            prop_assert!(field.insert(0, value).is_none());
        }
    }
}
