//! Runtime configuration read once at start from the persistence layer.
//!
//! The persistence layer stores [`ControlConfig`] as a postcard blob; writing it back
//! is the caller's business.

use serde::{Deserialize, Serialize};

use crate::config::{FAN_CURVE_MAX_C, FAN_CURVE_MIN_C};
use crate::power_mode::PowerMode;
use crate::sc8812a::types::{CellCount, CellVoltage, DeadTime, SwitchingFrequency};

/// DC output mode selected in the quick menu.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DcMode {
    /// Converter parked at power-up.
    Off,
    /// Discharge at a fixed voltage.
    FixedOutput,
    /// Charge from a fixed supply.
    Charge,
    /// Charge from a solar panel or other variable source (MPPT).
    TrackSource,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QuickSettings {
    pub usb_output: bool,
    pub ac_output: bool,
    pub dc_mode: DcMode,
    /// Output voltage in discharge, minimum input voltage in charge (V).
    pub dc_voltage: f32,
    /// Bus-side current limit (A).
    pub dc_current: f32,
}

/// One-time charger configuration applied by `Sc8812a::apply_setup`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargerSetup {
    pub rs1_milliohm: f32,
    pub rs2_milliohm: f32,
    pub cell_count: CellCount,
    pub cell_voltage: CellVoltage,
    pub battery_current_limit_a: f32,
    pub switching_frequency: SwitchingFrequency,
    pub dead_time: DeadTime,
    pub light_load_mode: bool,
    pub current_foldback: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MpptConfig {
    pub start_voltage: f32,
    pub min_voltage: f32,
    pub max_voltage: f32,
    /// Step magnitude (V); the direction lives in the engine state.
    pub step: f32,
    /// Minimum time between two perturbations (ms).
    pub interval_ms: u32,
}

/// Temperature band over which one zone ramps the fan from the floor duty to 100 %.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FanCurve {
    pub low_c: f32,
    pub high_c: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FanConfig {
    pub startup_self_test: bool,
    /// Duty (%) the fan jumps to as soon as any zone crosses its low threshold.
    pub min_duty: u8,
    pub battery: FanCurve,
    /// Shared by both module probes.
    pub module: FanCurve,
    pub inverter: FanCurve,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AutoPowerOffConfig {
    pub enabled: bool,
    /// Idle threshold on |battery current| with the AC output off (mA).
    pub idle_current_ma: f32,
    /// Idle threshold with the AC output on (mA); the inverter draws more at no load.
    pub idle_current_ac_ma: f32,
    pub delay_minutes: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocCalibration {
    pub empty_cell_v: f32,
    pub full_cell_v: f32,
    /// Internal-resistance compensation, volts per 10 A.
    pub sag_compensation: f32,
}

/// Everything the control core reads from persistent storage.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlConfig {
    pub quick: QuickSettings,
    pub charger: ChargerSetup,
    pub mppt: MpptConfig,
    pub fan: FanConfig,
    pub auto_power_off: AutoPowerOffConfig,
    pub soc: SocCalibration,
}

impl Default for QuickSettings {
    fn default() -> Self {
        Self {
            usb_output: false,
            ac_output: false,
            dc_mode: DcMode::Off,
            dc_voltage: 12.0,
            dc_current: 2.0,
        }
    }
}

impl Default for ChargerSetup {
    fn default() -> Self {
        Self {
            rs1_milliohm: 5.0,
            rs2_milliohm: 5.0,
            cell_count: CellCount::S4,
            cell_voltage: CellVoltage::V4_20,
            battery_current_limit_a: 8.0,
            switching_frequency: SwitchingFrequency::Khz150,
            dead_time: DeadTime::Ns20,
            light_load_mode: true,
            current_foldback: true,
        }
    }
}

impl Default for MpptConfig {
    fn default() -> Self {
        Self {
            start_voltage: 14.0,
            min_voltage: 12.0,
            max_voltage: 18.0,
            step: 0.2,
            interval_ms: 500,
        }
    }
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            startup_self_test: true,
            min_duty: 50,
            battery: FanCurve { low_c: 40.0, high_c: 50.0 },
            module: FanCurve { low_c: 45.0, high_c: 65.0 },
            inverter: FanCurve { low_c: 45.0, high_c: 60.0 },
        }
    }
}

impl Default for AutoPowerOffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_current_ma: 20.0,
            idle_current_ac_ma: 150.0,
            delay_minutes: 5,
        }
    }
}

impl Default for SocCalibration {
    fn default() -> Self {
        Self { empty_cell_v: 3.2, full_cell_v: 4.0, sag_compensation: 0.30 }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            quick: QuickSettings::default(),
            charger: ChargerSetup::default(),
            mppt: MpptConfig::default(),
            fan: FanConfig::default(),
            auto_power_off: AutoPowerOffConfig::default(),
            soc: SocCalibration::default(),
        }
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 { value } else { fallback }
}

impl QuickSettings {
    /// Converter mode the quick menu asks for.
    pub fn power_mode(&self) -> PowerMode {
        let (v, a) = (self.dc_voltage, self.dc_current);
        match self.dc_mode {
            DcMode::Off => PowerMode::Off,
            DcMode::FixedOutput => PowerMode::Discharge { output_voltage: v, current_limit: a },
            DcMode::Charge => PowerMode::Charge { min_input_voltage: v, current_limit: a },
            DcMode::TrackSource => PowerMode::TrackSource { current_limit: a },
        }
    }

    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        self.dc_voltage = positive_or(self.dc_voltage, d.dc_voltage);
        self.dc_current = positive_or(self.dc_current, d.dc_current);
        self
    }
}

impl ChargerSetup {
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        self.rs1_milliohm = positive_or(self.rs1_milliohm, d.rs1_milliohm);
        self.rs2_milliohm = positive_or(self.rs2_milliohm, d.rs2_milliohm);
        self.battery_current_limit_a = positive_or(self.battery_current_limit_a, d.battery_current_limit_a);
        self
    }
}

impl MpptConfig {
    /// Finite, ordered band with the start voltage inside it and a positive step.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        self.min_voltage = finite_or(self.min_voltage, d.min_voltage);
        self.max_voltage = finite_or(self.max_voltage, d.max_voltage);
        if self.min_voltage > self.max_voltage {
            core::mem::swap(&mut self.min_voltage, &mut self.max_voltage);
        }
        self.start_voltage = finite_or(self.start_voltage, d.start_voltage)
            .clamp(self.min_voltage, self.max_voltage);
        self.step = positive_or(self.step, d.step);
        self
    }
}

impl FanCurve {
    /// Finite thresholds inside `FAN_CURVE_MIN_C..=FAN_CURVE_MAX_C`, low before high.
    fn sanitized(self, fallback: FanCurve) -> Self {
        let low = finite_or(self.low_c, fallback.low_c).clamp(FAN_CURVE_MIN_C, FAN_CURVE_MAX_C);
        let high = finite_or(self.high_c, fallback.high_c).clamp(FAN_CURVE_MIN_C, FAN_CURVE_MAX_C);
        if low <= high { Self { low_c: low, high_c: high } } else { Self { low_c: high, high_c: low } }
    }
}

impl FanConfig {
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        self.min_duty = self.min_duty.min(100);
        self.battery = self.battery.sanitized(d.battery);
        self.module = self.module.sanitized(d.module);
        self.inverter = self.inverter.sanitized(d.inverter);
        self
    }
}

impl AutoPowerOffConfig {
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(self.idle_current_ma.is_finite() && self.idle_current_ma >= 0.0) {
            self.idle_current_ma = d.idle_current_ma;
        }
        if !(self.idle_current_ac_ma.is_finite() && self.idle_current_ac_ma >= 0.0) {
            self.idle_current_ac_ma = d.idle_current_ac_ma;
        }
        self
    }
}

impl SocCalibration {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let usable = self.empty_cell_v.is_finite()
            && self.full_cell_v.is_finite()
            && self.sag_compensation.is_finite()
            && self.empty_cell_v < self.full_cell_v;
        if usable { self } else { d }
    }
}

impl ControlConfig {
    /// Decode a stored blob; anything unreadable yields the defaults.
    pub fn from_bytes_or_default(bytes: &[u8]) -> Self {
        match postcard::from_bytes::<ControlConfig>(bytes) {
            Ok(cfg) => cfg.sanitized(),
            Err(e) => {
                warn!("settings: stored config unreadable ({}), using defaults", postcard_err_str(&e));
                Self::default()
            }
        }
    }

    /// Encode for the persistence layer. Returns the used prefix of `buf`.
    pub fn to_slice<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], postcard::Error> {
        postcard::to_slice(self, buf)
    }

    /// Repair orderings and ranges a hand-edited or stale blob could break.
    pub fn sanitized(self) -> Self {
        Self {
            quick: self.quick.sanitized(),
            charger: self.charger.sanitized(),
            mppt: self.mppt.sanitized(),
            fan: self.fan.sanitized(),
            auto_power_off: self.auto_power_off.sanitized(),
            soc: self.soc.sanitized(),
        }
    }
}

fn postcard_err_str(e: &postcard::Error) -> &'static str {
    match e {
        postcard::Error::DeserializeUnexpectedEnd => "truncated",
        postcard::Error::DeserializeBadVarint => "bad varint",
        postcard::Error::DeserializeBadBool => "bad bool",
        postcard::Error::DeserializeBadEnum => "bad enum",
        _ => "decode error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trips() {
        let mut cfg = ControlConfig::default();
        cfg.mppt.max_voltage = 21.0;
        cfg.auto_power_off.delay_minutes = 15;
        cfg.quick.dc_mode = DcMode::TrackSource;

        let mut buf = [0u8; 256];
        let used = cfg.to_slice(&mut buf).unwrap().len();
        assert_eq!(ControlConfig::from_bytes_or_default(&buf[..used]), cfg);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        assert_eq!(ControlConfig::from_bytes_or_default(&[]), ControlConfig::default());
        assert_eq!(ControlConfig::from_bytes_or_default(&[0xFF; 4]), ControlConfig::default());
    }

    #[test]
    fn sanitize_repairs_orderings() {
        let mut cfg = ControlConfig::default();
        cfg.mppt.min_voltage = 20.0;
        cfg.mppt.max_voltage = 10.0;
        cfg.mppt.start_voltage = 25.0;
        cfg.mppt.step = 0.0;
        cfg.fan.min_duty = 180;
        cfg.fan.module = FanCurve { low_c: 70.0, high_c: 40.0 };
        cfg.charger.rs1_milliohm = -1.0;
        cfg.soc.empty_cell_v = 4.1;

        let s = cfg.sanitized();
        assert_eq!((s.mppt.min_voltage, s.mppt.max_voltage), (10.0, 20.0));
        assert_eq!(s.mppt.start_voltage, 20.0);
        assert_eq!(s.mppt.step, 0.2);
        assert_eq!(s.fan.min_duty, 100);
        assert_eq!(s.fan.module, FanCurve { low_c: 40.0, high_c: 70.0 });
        assert_eq!(s.charger.rs1_milliohm, 5.0);
        assert_eq!((s.soc.empty_cell_v, s.soc.full_cell_v), (3.2, 4.0));
    }

    #[test]
    fn non_finite_values_fall_back_to_defaults() {
        let m = MpptConfig { start_voltage: f32::NAN, min_voltage: f32::NEG_INFINITY, step: f32::NAN, ..Default::default() }
            .sanitized();
        assert_eq!(m, MpptConfig::default());

        let m = MpptConfig { step: -0.5, ..Default::default() }.sanitized();
        assert_eq!(m.step, 0.2);

        let apo = AutoPowerOffConfig { idle_current_ma: f32::NAN, idle_current_ac_ma: -3.0, ..Default::default() }
            .sanitized();
        assert_eq!(apo, AutoPowerOffConfig::default());

        let soc = SocCalibration { sag_compensation: f32::INFINITY, ..Default::default() }.sanitized();
        assert_eq!(soc, SocCalibration::default());
    }

    #[test]
    fn fan_curves_are_kept_in_a_sane_range() {
        let cfg = FanConfig {
            battery: FanCurve { low_c: -1.0e30, high_c: 3.0e38 },
            module: FanCurve { low_c: f32::NAN, high_c: 70.0 },
            inverter: FanCurve { low_c: 500.0, high_c: 450.0 },
            ..Default::default()
        }
        .sanitized();
        assert_eq!(cfg.battery, FanCurve { low_c: FAN_CURVE_MIN_C, high_c: FAN_CURVE_MAX_C });
        assert_eq!(cfg.module, FanCurve { low_c: 45.0, high_c: 70.0 });
        assert_eq!(cfg.inverter, FanCurve { low_c: FAN_CURVE_MAX_C, high_c: FAN_CURVE_MAX_C });
    }

    #[test]
    fn quick_settings_select_the_startup_mode() {
        let mut q = QuickSettings::default();
        assert_eq!(q.power_mode(), PowerMode::Off);

        q.dc_voltage = 11.0;
        q.dc_current = 1.5;
        q.dc_mode = DcMode::FixedOutput;
        assert_eq!(q.power_mode(), PowerMode::Discharge { output_voltage: 11.0, current_limit: 1.5 });
        q.dc_mode = DcMode::Charge;
        assert_eq!(q.power_mode(), PowerMode::Charge { min_input_voltage: 11.0, current_limit: 1.5 });
        q.dc_mode = DcMode::TrackSource;
        assert_eq!(q.power_mode(), PowerMode::TrackSource { current_limit: 1.5 });

        q.dc_voltage = f32::NAN;
        q.dc_current = 0.0;
        let q = q.sanitized();
        assert_eq!((q.dc_voltage, q.dc_current), (12.0, 2.0));
    }

    #[test]
    fn defaults_are_already_sane() {
        assert_eq!(ControlConfig::default().sanitized(), ControlConfig::default());
    }
}
