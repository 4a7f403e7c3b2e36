//! High-level driver API (async, owns the I²C device and the PSTOP line).
//!
//! This is the only code that touches the chip's register space. Everything above it
//! talks in volts and amps.

use core::future::Future;
use core::result::Result as CoreResult;
use embassy_time::with_timeout;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;

use crate::config::{I2C_OP_TIMEOUT, MIN_CURRENT_LIMIT_A, VINREG_RATIO_BREAKPOINT_V};
use crate::sc8812a::decode;
use crate::sc8812a::regs::*;
use crate::sc8812a::types::*;
use crate::settings::ChargerSetup;
use crate::shared_state::TelemetrySample;

pub type Result<E> = CoreResult<(), Error<E>>;

/// Raw code reported for an ADC pair that could not be read.
pub const ADC_SENTINEL: u16 = 0;

/// Value a single-register read is reported as when the device does not answer.
pub const REG_SENTINEL: u8 = 0xFF;

/// Run the provided bus operation with the short per-transaction timeout.
///
/// Returns `Err(Error::Timeout)` if the wait elapses before the future completes.
async fn with_i2c_timeout<F, T, E>(fut: F) -> CoreResult<T, Error<E>>
where
    F: Future<Output = CoreResult<T, Error<E>>>,
{
    match with_timeout(I2C_OP_TIMEOUT, fut).await {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout),
    }
}

// ------------------ Quantization helpers ------------------
//
// The chip never represents "0 units": every field stores (value / LSB) - 1, so every
// encoder subtracts one after rounding and every decoder adds it back.

/// Round `units` (a count of LSBs) to a register code, clamped into `0..=max`.
#[inline]
fn to_code(units: f32, max: i32) -> u16 {
    let rounded = libm::roundf(units) as i32; // saturating; NaN becomes 0
    rounded.saturating_sub(1).clamp(0, max) as u16
}

/// IBUS_LIM_SET / IBAT_LIM_SET code for a current limit.
///
/// `amps` is floored to the 0.3 A datasheet minimum first.
/// `code = round(A * 256 * Rs / (ratio * 10 mΩ)) - 1`, clamped to 0..=255.
pub fn current_limit_code(amps: f32, rs_milliohm: f32, ratio: f32) -> u8 {
    let amps = amps.max(MIN_CURRENT_LIMIT_A);
    to_code(amps * 256.0 * rs_milliohm / (ratio * 10.0), 255) as u8
}

/// Inverse of [`current_limit_code`]: `(code + 1) / 256 * ratio * 10 mΩ / Rs`.
pub fn current_limit_from_code(code: u8, rs_milliohm: f32, ratio: f32) -> f32 {
    (code as f32 + 1.0) / 256.0 * ratio * 10.0 / rs_milliohm
}

/// VINREG encoding: `(low_range, code)`.
///
/// `low_range` selects the 40 mV ratio (set at or below 10.24 V), otherwise 100 mV.
/// `code = round(V * 1000 / ratio) - 1`, clamped to 0..=255.
pub fn vinreg_encoding(volts: f32) -> (bool, u8) {
    let low_range = volts <= VINREG_RATIO_BREAKPOINT_V;
    let ratio_mv = if low_range { 40.0 } else { 100.0 };
    (low_range, to_code(volts * 1000.0 / ratio_mv, 255) as u8)
}

/// Inverse of [`vinreg_encoding`].
pub fn vinreg_from_code(low_range: bool, code: u8) -> f32 {
    let ratio_mv = if low_range { 40.0 } else { 100.0 };
    (code as f32 + 1.0) * ratio_mv / 1000.0
}

/// 10-bit internal VBUS reference for an output voltage (2 mV/LSB before the ratio).
/// `raw10 = round(V * 1000 / ratio / 2) - 1`, clamped to 0..=1023.
pub fn vbus_reference_code(volts: f32, vbus_ratio: f32) -> u16 {
    to_code(volts * 1000.0 / vbus_ratio / 2.0, 1023)
}

/// ADC voltage: `(raw10 + 1) * ratio * 2 mV`. Also decodes a VBUS reference code.
pub fn adc_voltage(raw10: u16, ratio: f32) -> f32 {
    (raw10 as f32 + 1.0) * ratio * 0.002
}

/// ADC current: `(raw10 + 1) * 2 / 1200 * ratio * 10 mΩ / Rs`.
pub fn adc_current(raw10: u16, ratio: f32, rs_milliohm: f32) -> f32 {
    (raw10 as f32 + 1.0) * 2.0 / 1200.0 * ratio * (10.0 / rs_milliohm)
}

/// Split a 10-bit code into the 8 high bits and the 2 low bits.
#[inline]
pub fn split_raw10(raw10: u16) -> (u8, u8) {
    let raw10 = raw10 & 0x3FF;
    ((raw10 >> 2) as u8, (raw10 & 0b11) as u8)
}

/// Assemble an ADC result from its MSB register and the [7:6] bits of the next one.
#[inline]
pub fn join_raw10(msb: u8, lsb: u8) -> u16 {
    ((msb as u16) << 2) | ((lsb >> 6) & 0b11) as u16
}

/// SC8812A async driver over I²C, with an optional PSTOP (converter stop) line.
pub struct Sc8812a<I2C, P> {
    i2c: I2C,
    addr: u8,
    pstop: Option<P>,
    cal: CalibrationProfile,
}

impl<I2C, P> Sc8812a<I2C, P>
where
    I2C: I2c,
    P: OutputPin,
{
    /// Create a driver at the default 7-bit address (0x74).
    ///
    /// Pass `None` for `pstop` on boards where the line is hard-wired; output
    /// enable/disable then only manipulates the direction bit.
    pub fn new(i2c: I2C, pstop: Option<P>, cal: CalibrationProfile) -> Self {
        Self { i2c, addr: I2C_ADDR, pstop, cal }
    }

    /// Create a driver at an explicit 7-bit address.
    pub fn with_address(i2c: I2C, addr: u8, pstop: Option<P>, cal: CalibrationProfile) -> Self {
        Self { i2c, addr, pstop, cal }
    }

    /// Consume the driver and return the owned bus and pin.
    pub fn release(self) -> (I2C, Option<P>) {
        (self.i2c, self.pstop)
    }

    pub fn calibration(&self) -> &CalibrationProfile {
        &self.cal
    }

    /// Update the shunt values; a non-positive value leaves that shunt unchanged.
    pub fn set_shunt_resistors(&mut self, rs1_milliohm: f32, rs2_milliohm: f32) {
        if rs1_milliohm > 0.0 { self.cal.rs1_milliohm = rs1_milliohm; }
        if rs2_milliohm > 0.0 { self.cal.rs2_milliohm = rs2_milliohm; }
    }

    // ------------------ Bring-up ------------------

    /// Put the converter in standby and set the FACTORY bit.
    ///
    /// Fails if the device does not answer; nothing else should be trusted then.
    pub async fn init(&mut self) -> Result<I2C::Error> {
        self.drive_pstop(true)?;
        let status = self.read_status().await?;
        debug!("SC8812A: online at 0x{:02X}, STATUS=0x{:02X}", self.addr, status.raw);
        self.modify(FACTORY, 1).await
    }

    /// Apply the one-time charger configuration.
    pub async fn apply_setup(&mut self, setup: &ChargerSetup) -> Result<I2C::Error> {
        self.set_shunt_resistors(setup.rs1_milliohm, setup.rs2_milliohm);
        self.set_cell_count(setup.cell_count).await?;
        self.set_switching_frequency(setup.switching_frequency).await?;
        self.set_dead_time(setup.dead_time).await?;
        self.set_light_load_mode(setup.light_load_mode).await?;
        self.set_current_foldback(setup.current_foldback).await?;
        self.set_cell_termination_voltage(setup.cell_voltage).await?;
        self.write_current_limit(Channel::Battery, setup.battery_current_limit_a).await
    }

    // ------------------ Helpers ------------------

    /// Read a single register (write register address, read one byte).
    async fn read1(&mut self, reg: u8) -> CoreResult<u8, Error<I2C::Error>> {
        let addr = self.addr;
        let i2c = &mut self.i2c;
        with_i2c_timeout(async {
            let mut buf = [0u8; 1];
            i2c.write_read(addr, &[reg], &mut buf)
                .await
                .map_err(Error::I2c)?;
            Ok(buf[0])
        }).await
    }

    /// Write a single register.
    async fn write1(&mut self, reg: u8, val: u8) -> Result<I2C::Error> {
        let addr = self.addr;
        let i2c = &mut self.i2c;
        with_i2c_timeout(async {
            i2c.write(addr, &[reg, val])
                .await
                .map_err(Error::I2c)
        }).await
    }

    /// Read an ADC result pair starting at its MSB register.
    async fn read_adc_raw(&mut self, msb_reg: u8) -> CoreResult<u16, Error<I2C::Error>> {
        let addr = self.addr;
        let i2c = &mut self.i2c;
        with_i2c_timeout(async {
            let mut buf = [0u8; 2];
            i2c.write_read(addr, &[msb_reg], &mut buf)
                .await
                .map_err(Error::I2c)?;
            Ok(join_raw10(buf[0], buf[1]))
        }).await
    }

    /// Read a register that is about to be merged into; 0xFF counts as a failed read.
    async fn read_for_merge(&mut self, reg: u8) -> CoreResult<u8, Error<I2C::Error>> {
        match self.read1(reg).await {
            Ok(REG_SENTINEL) => Err(Error::Sentinel(reg)),
            other => other,
        }
    }

    /// Read-modify-write one field. When the read half fails nothing is written.
    async fn modify(&mut self, field: Field, code: u8) -> Result<I2C::Error> {
        let orig = match self.read_for_merge(field.reg).await {
            Ok(v) => v,
            Err(e) => {
                warn!("SC8812A: reg 0x{:02X} unreadable ({}), write skipped", field.reg, e.as_str());
                return Err(e);
            }
        };
        self.write1(field.reg, field.insert(orig, code)).await
    }

    fn drive_pstop(&mut self, stop: bool) -> Result<I2C::Error> {
        if let Some(pin) = self.pstop.as_mut() {
            let res = if stop { pin.set_high() } else { pin.set_low() };
            res.map_err(|_| Error::Pin)?;
        }
        Ok(())
    }

    /// Read any register; a failed read is reported as 0xFF.
    pub async fn read_register(&mut self, reg: u8) -> u8 {
        self.read1(reg).await.unwrap_or(REG_SENTINEL)
    }

    // ------------------ Set-points ------------------

    /// Program the input-side (IBUS) or battery-side (IBAT) current limit in amps.
    pub async fn write_current_limit(&mut self, channel: Channel, amps: f32) -> Result<I2C::Error> {
        let (reg, code) = match channel {
            Channel::Bus => (
                REG_IBUS_LIM_SET,
                current_limit_code(amps, self.cal.rs1_milliohm, self.cal.ibus_ratio.factor()),
            ),
            Channel::Battery => (
                REG_IBAT_LIM_SET,
                current_limit_code(amps, self.cal.rs2_milliohm, self.cal.ibat_ratio.factor()),
            ),
        };
        trace!("SC8812A: {:?} limit {} A -> code {}", channel, amps, code);
        self.write1(reg, code).await
    }

    /// Program the minimum input voltage (VINREG) the converter will hold the source at.
    pub async fn write_input_regulation_voltage(&mut self, volts: f32) -> Result<I2C::Error> {
        let (low_range, code) = vinreg_encoding(volts);
        self.modify(VINREG_RATIO, low_range as u8).await?;
        self.write1(REG_VINREG_SET, code).await
    }

    /// Program the discharge (OTG) output voltage through the internal VBUS reference.
    ///
    /// The low two bits share a register with other fields, so that register is read
    /// first; if the read fails neither half is written.
    pub async fn write_output_voltage(&mut self, volts: f32) -> Result<I2C::Error> {
        let raw10 = vbus_reference_code(volts, self.cal.vbus_ratio.factor());
        let (msb, lsb2) = split_raw10(raw10);
        let reg02 = match self.read_for_merge(REG_VBUSREF_I_SET2).await {
            Ok(v) => v,
            Err(e) => {
                warn!("SC8812A: VBUSREF_I_SET2 unreadable ({}), output voltage not written", e.as_str());
                return Err(e);
            }
        };
        self.write1(REG_VBUSREF_I_SET, msb).await?;
        self.write1(REG_VBUSREF_I_SET2, VBUSREF_I_SET2.insert(reg02, lsb2)).await
    }

    // ------------------ Telemetry ------------------

    async fn read_adc_or_sentinel(&mut self, msb_reg: u8) -> u16 {
        match self.read_adc_raw(msb_reg).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("SC8812A: ADC 0x{:02X} read failed ({})", msb_reg, e.as_str());
                ADC_SENTINEL
            }
        }
    }

    /// VBUS in volts.
    pub async fn read_input_voltage(&mut self) -> f32 {
        let raw = self.read_adc_or_sentinel(REG_VBUS_FB).await;
        adc_voltage(raw, self.cal.vbus_ratio.factor())
    }

    /// VBAT in volts.
    pub async fn read_battery_voltage(&mut self) -> f32 {
        let raw = self.read_adc_or_sentinel(REG_VBAT_FB).await;
        adc_voltage(raw, self.cal.vbat_ratio.factor())
    }

    /// IBUS in amps.
    pub async fn read_input_current(&mut self) -> f32 {
        let raw = self.read_adc_or_sentinel(REG_IBUS_VAL).await;
        adc_current(raw, self.cal.ibus_ratio.factor(), self.cal.rs1_milliohm)
    }

    /// IBAT in amps.
    pub async fn read_battery_current(&mut self) -> f32 {
        let raw = self.read_adc_or_sentinel(REG_IBAT_VAL).await;
        adc_current(raw, self.cal.ibat_ratio.factor(), self.cal.rs2_milliohm)
    }

    /// All four channels, one ADC pair each. Channels are sampled back to back, not
    /// simultaneously.
    pub async fn read_telemetry(&mut self) -> TelemetrySample {
        TelemetrySample {
            input_voltage: self.read_input_voltage().await,
            input_current: self.read_input_current().await,
            battery_voltage: self.read_battery_voltage().await,
            battery_current: self.read_battery_current().await,
        }
    }

    pub async fn read_status(&mut self) -> CoreResult<Status, Error<I2C::Error>> {
        Ok(Status::from_bits(self.read1(REG_STATUS).await?))
    }

    // ------------------ Control bits ------------------

    pub async fn set_output_direction(&mut self, direction: Direction) -> Result<I2C::Error> {
        self.modify(EN_OTG, (direction == Direction::Discharge) as u8).await
    }

    /// Enable: release PSTOP. Disable: assert PSTOP and fall back to the charge direction.
    pub async fn set_output_enabled(&mut self, enabled: bool) -> Result<I2C::Error> {
        if enabled {
            self.drive_pstop(false)
        } else {
            self.drive_pstop(true)?;
            self.modify(EN_OTG, 0).await
        }
    }

    pub async fn set_adc_enabled(&mut self, enabled: bool) -> Result<I2C::Error> {
        self.modify(AD_START, enabled as u8).await
    }

    pub async fn set_switching_frequency(&mut self, freq: SwitchingFrequency) -> Result<I2C::Error> {
        self.modify(FREQ_SET, freq as u8).await
    }

    pub async fn set_dead_time(&mut self, dead_time: DeadTime) -> Result<I2C::Error> {
        self.modify(DT_SET, dead_time as u8).await
    }

    /// `true` keeps VBUS short-circuit foldback active (the register bit is a disable).
    pub async fn set_current_foldback(&mut self, enabled: bool) -> Result<I2C::Error> {
        self.modify(DIS_SHORT_FOLDBACK, (!enabled) as u8).await
    }

    /// PFM at light load in discharge; `false` forces PWM.
    pub async fn set_light_load_mode(&mut self, enabled: bool) -> Result<I2C::Error> {
        self.modify(EN_PFM, enabled as u8).await
    }

    pub async fn set_cell_count(&mut self, count: CellCount) -> Result<I2C::Error> {
        self.modify(CSEL, count as u8).await
    }

    pub async fn set_cell_termination_voltage(&mut self, voltage: CellVoltage) -> Result<I2C::Error> {
        self.modify(VCELL_SET, voltage as u8).await
    }

    /// Read back and log the programmed set-points and control bits.
    pub async fn dump_settings(&mut self) -> Result<I2C::Error> {
        let ctrl0 = self.read1(REG_CTRL0_SET).await?;
        let ctrl3 = self.read1(REG_CTRL3).await?;
        let vbat_set = self.read1(REG_VBAT_SET).await?;
        let ibus = self.read1(REG_IBUS_LIM_SET).await?;
        let ibat = self.read1(REG_IBAT_LIM_SET).await?;
        let vinreg = self.read1(REG_VINREG_SET).await?;
        let status = self.read1(REG_STATUS).await?;

        let cal = self.cal;
        let ibus_a = current_limit_from_code(ibus, cal.rs1_milliohm, cal.ibus_ratio.factor());
        let ibat_a = current_limit_from_code(ibat, cal.rs2_milliohm, cal.ibat_ratio.factor());
        let vinreg_v = vinreg_from_code(VINREG_RATIO.extract(ctrl0) != 0, vinreg);

        info!("SC8812A settings:");
        info!("  OTG={}  ADC={}  PFM={}  FOLDBACK_DIS={}  FREQ=0b{:02b}  DT={}",
            EN_OTG.extract(ctrl0), AD_START.extract(ctrl3), EN_PFM.extract(ctrl3),
            DIS_SHORT_FOLDBACK.extract(ctrl3), FREQ_SET.extract(ctrl0), DT_SET.extract(ctrl0));
        info!("  CELLS={}  VCELL={} mV",
            CellCount::from_code(CSEL.extract(vbat_set)).cells(),
            CellVoltage::from_code(VCELL_SET.extract(vbat_set)).millivolts());
        info!("  IBUS_LIM={} A  IBAT_LIM={} A  VINREG={} V", ibus_a, ibat_a, vinreg_v);
        decode::log_status(&Status::from_bits(status));
        Ok(())
    }
}
