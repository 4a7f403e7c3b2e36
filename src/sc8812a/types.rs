//! Public enums, calibration and the driver error type.

use serde::{Deserialize, Serialize};

use super::regs::*;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    I2c(E),
    /// The bounded wait elapsed before the device answered.
    Timeout,
    /// A control register read back as 0xFF (floating bus); the dependent write was skipped.
    Sentinel(u8),
    /// The PSTOP line could not be driven.
    Pin,
}

impl<E> Error<E> {
    /// Short name for log lines; the bus error payload is not always loggable.
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::I2c(_) => "i2c",
            Error::Timeout => "timeout",
            Error::Sentinel(_) => "sentinel read",
            Error::Pin => "pstop pin",
        }
    }
}

/// VBUS_RATIO / VBAT_MON_RATIO: divider between the rail and the internal reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoltageRatio { X12_5, X5 }

impl VoltageRatio {
    pub const fn factor(self) -> f32 {
        match self {
            VoltageRatio::X12_5 => 12.5,
            VoltageRatio::X5 => 5.0,
        }
    }
}

/// IBUS_RATIO: 6x or 3x (POR default 3x).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IbusRatio { X6, X3 }

impl IbusRatio {
    pub const fn factor(self) -> f32 {
        match self {
            IbusRatio::X6 => 6.0,
            IbusRatio::X3 => 3.0,
        }
    }
}

/// IBAT_RATIO: 6x or 12x (POR default 12x).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IbatRatio { X6, X12 }

impl IbatRatio {
    pub const fn factor(self) -> f32 {
        match self {
            IbatRatio::X6 => 6.0,
            IbatRatio::X12 => 12.0,
        }
    }
}

/// Board-dependent constants needed to convert between amps/volts and register codes.
///
/// The ratios must match what the chip is strapped/configured to; the driver never
/// rewrites the RATIO register itself.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationProfile {
    /// Input-side (VBUS) shunt, mΩ.
    pub rs1_milliohm: f32,
    /// Battery-side (VBAT) shunt, mΩ.
    pub rs2_milliohm: f32,
    pub vbus_ratio: VoltageRatio,
    pub vbat_ratio: VoltageRatio,
    pub ibus_ratio: IbusRatio,
    pub ibat_ratio: IbatRatio,
}

impl Default for CalibrationProfile {
    /// 10 mΩ shunts and the chip's power-on ratios.
    fn default() -> Self {
        Self {
            rs1_milliohm: 10.0,
            rs2_milliohm: 10.0,
            vbus_ratio: VoltageRatio::X12_5,
            vbat_ratio: VoltageRatio::X12_5,
            ibus_ratio: IbusRatio::X3,
            ibat_ratio: IbatRatio::X12,
        }
    }
}

/// Which side of the converter a current limit or ADC channel belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// VBUS / input side, sensed through RS1.
    Bus,
    /// VBAT / battery side, sensed through RS2.
    Battery,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// VBUS -> VBAT.
    Charge,
    /// VBAT -> VBUS (OTG).
    Discharge,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchingFrequency { Khz150 = 0b00, Khz300 = 0b01, Khz450 = 0b11 }

impl SwitchingFrequency {
    /// Tier 0..2; anything above 2 selects the fastest setting.
    pub const fn from_tier(tier: u8) -> Self {
        match tier {
            0 => SwitchingFrequency::Khz150,
            1 => SwitchingFrequency::Khz300,
            _ => SwitchingFrequency::Khz450,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeadTime { Ns20 = 0, Ns40 = 1, Ns60 = 2, Ns80 = 3 }

impl DeadTime {
    pub const fn from_tier(tier: u8) -> Self {
        match tier & 0b11 {
            0 => DeadTime::Ns20,
            1 => DeadTime::Ns40,
            2 => DeadTime::Ns60,
            _ => DeadTime::Ns80,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CellCount { S1 = 0, S2 = 1, S3 = 2, S4 = 3 }

impl CellCount {
    pub const fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => CellCount::S1,
            1 => CellCount::S2,
            2 => CellCount::S3,
            _ => CellCount::S4,
        }
    }

    pub const fn cells(self) -> u8 {
        self as u8 + 1
    }
}

/// VCELL_SET termination voltage per cell.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CellVoltage { V4_10 = 0, V4_20 = 1, V4_25 = 2, V4_30 = 3, V4_35 = 4, V4_40 = 5, V4_45 = 6, V4_50 = 7 }

impl CellVoltage {
    pub const fn from_code(code: u8) -> Self {
        match code & 0b111 {
            0 => CellVoltage::V4_10,
            1 => CellVoltage::V4_20,
            2 => CellVoltage::V4_25,
            3 => CellVoltage::V4_30,
            4 => CellVoltage::V4_35,
            5 => CellVoltage::V4_40,
            6 => CellVoltage::V4_45,
            _ => CellVoltage::V4_50,
        }
    }

    pub const fn millivolts(self) -> u16 {
        match self {
            CellVoltage::V4_10 => 4100,
            CellVoltage::V4_20 => 4200,
            CellVoltage::V4_25 => 4250,
            CellVoltage::V4_30 => 4300,
            CellVoltage::V4_35 => 4350,
            CellVoltage::V4_40 => 4400,
            CellVoltage::V4_45 => 4450,
            CellVoltage::V4_50 => 4500,
        }
    }
}

/// Decoded STATUS register (0x17).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub raw: u8,
    pub ac_ok: bool,
    pub input_detected: bool,
    pub vbus_short: bool,
    pub over_temperature: bool,
    pub end_of_charge: bool,
}

impl Status {
    pub const fn from_bits(raw: u8) -> Self {
        Self {
            raw,
            ac_ok: raw & AC_OK != 0,
            input_detected: raw & INDET != 0,
            vbus_short: raw & VBUS_SHORT != 0,
            over_temperature: raw & OTP != 0,
            end_of_charge: raw & EOC != 0,
        }
    }
}
