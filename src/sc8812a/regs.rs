//! Register addresses and named bit-fields for the SC8812A.
//! Only the registers this crate touches are listed.

pub const I2C_ADDR: u8 = 0x74;

// Set-point registers (whole byte unless a field below says otherwise)
pub const REG_VBAT_SET: u8 = 0x00;        // CSEL + VCELL_SET
pub const REG_VBUSREF_I_SET: u8 = 0x01;   // internal VBUS reference, high 8 bits
pub const REG_VBUSREF_I_SET2: u8 = 0x02;  // internal VBUS reference, low 2 bits in [7:6]
pub const REG_IBUS_LIM_SET: u8 = 0x05;
pub const REG_IBAT_LIM_SET: u8 = 0x06;
pub const REG_VINREG_SET: u8 = 0x07;

// Control registers
pub const REG_CTRL0_SET: u8 = 0x09;
pub const REG_CTRL2_SET: u8 = 0x0B;
pub const REG_CTRL3: u8 = 0x0C;

// ADC results: MSB holds bits [9:2], the following register holds bits [1:0] in [7:6]
pub const REG_VBUS_FB: u8 = 0x0D;
pub const REG_VBAT_FB: u8 = 0x0F;
pub const REG_IBUS_VAL: u8 = 0x11;
pub const REG_IBAT_VAL: u8 = 0x13;

pub const REG_STATUS: u8 = 0x17;

// STATUS bits (read-only)
pub const AC_OK: u8 = 1 << 6;
pub const INDET: u8 = 1 << 5;
pub const VBUS_SHORT: u8 = 1 << 3;
pub const OTP: u8 = 1 << 2;
pub const EOC: u8 = 1 << 1;

/// A contiguous bit-field inside one 8-bit register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Field {
    pub reg: u8,
    pub mask: u8,
    pub shift: u8,
}

impl Field {
    pub const fn new(reg: u8, mask: u8, shift: u8) -> Self {
        Self { reg, mask, shift }
    }

    pub const fn bit(reg: u8, bit: u8) -> Self {
        Self { reg, mask: 1 << bit, shift: bit }
    }

    /// Replace this field inside `orig` with `code`, leaving every other bit alone.
    #[inline]
    pub const fn insert(self, orig: u8, code: u8) -> u8 {
        (orig & !self.mask) | ((code << self.shift) & self.mask)
    }

    #[inline]
    pub const fn extract(self, reg: u8) -> u8 {
        (reg & self.mask) >> self.shift
    }
}

/// Battery cell count, 00=1S .. 11=4S.
pub const CSEL: Field = Field::new(REG_VBAT_SET, 0b0001_1000, 3);
/// Per-cell termination voltage code, 000=4.10 V .. 111=4.50 V.
pub const VCELL_SET: Field = Field::new(REG_VBAT_SET, 0b0000_0111, 0);

/// Low two bits of the 10-bit internal VBUS reference.
pub const VBUSREF_I_SET2: Field = Field::new(REG_VBUSREF_I_SET2, 0b1100_0000, 6);

/// 1 = discharge (OTG, VBAT -> VBUS), 0 = charge (VBUS -> VBAT).
pub const EN_OTG: Field = Field::bit(REG_CTRL0_SET, 7);
/// 1 = VINREG in 40 mV steps, 0 = 100 mV steps.
pub const VINREG_RATIO: Field = Field::bit(REG_CTRL0_SET, 4);
/// 00=150 kHz, 01=300 kHz, 11=450 kHz.
pub const FREQ_SET: Field = Field::new(REG_CTRL0_SET, 0b0000_1100, 2);
/// 00=20 ns .. 11=80 ns.
pub const DT_SET: Field = Field::new(REG_CTRL0_SET, 0b0000_0011, 0);

/// Must be written to 1 by the host after power-up.
pub const FACTORY: Field = Field::bit(REG_CTRL2_SET, 3);

/// 1 = ADC converting.
pub const AD_START: Field = Field::bit(REG_CTRL3, 5);
/// 1 = VBUS short-circuit foldback disabled.
pub const DIS_SHORT_FOLDBACK: Field = Field::bit(REG_CTRL3, 2);
/// 1 = PFM at light load in discharge, 0 = forced PWM.
pub const EN_PFM: Field = Field::bit(REG_CTRL3, 0);
