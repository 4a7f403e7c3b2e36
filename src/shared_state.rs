//! Data passed between the control loop and its collaborators.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pubsub::{ImmediatePublisher, PubSubChannel, Subscriber};

use crate::auto_power_off::ApoState;
use crate::config::MIN_VALID_TEMPERATURE_C;
use crate::power_mode::PowerMode;
use crate::sc8812a::types::{CellVoltage, DeadTime, Status, SwitchingFrequency};
use crate::settings::{AutoPowerOffConfig, FanConfig, MpptConfig, QuickSettings};

/// One pass over the four converter ADC channels.
///
/// Channels are read one after another, so the values are not from the same instant.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySample {
    pub input_voltage: f32,
    pub input_current: f32,
    pub battery_voltage: f32,
    pub battery_current: f32,
}

impl TelemetrySample {
    pub fn input_power(&self) -> f32 {
        self.input_voltage * self.input_current
    }
}

/// Pack voltage and current from the external battery monitor.
/// Positive current charges the pack.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryReading {
    pub voltage: f32,
    pub current: f32,
}

/// Last valid reading of each temperature probe (°C).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ZoneTemperatures {
    pub battery: f32,
    pub module_a: f32,
    pub module_b: f32,
    pub inverter: f32,
}

impl ZoneTemperatures {
    /// Take new probe values in battery, module A, module B, inverter order.
    /// A disconnected probe (at or below the validity floor) keeps its previous value.
    pub fn update_from_probes(&mut self, probes: [f32; 4]) {
        let slots = [&mut self.battery, &mut self.module_a, &mut self.module_b, &mut self.inverter];
        for (slot, value) in slots.into_iter().zip(probes) {
            if value > MIN_VALID_TEMPERATURE_C {
                *slot = value;
            }
        }
    }

    pub fn module(&self) -> f32 {
        self.module_a.max(self.module_b)
    }
}

/// Per-tick inputs shared by every control component.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlContext {
    pub telemetry: TelemetrySample,
    pub battery: BatteryReading,
    pub temperatures: ZoneTemperatures,
    pub usb_output: bool,
    pub ac_output: bool,
    /// Any button or UI input since the previous control tick.
    pub input_activity: bool,
    /// `None` until a mode transition has completed (or after one was abandoned).
    pub mode: Option<PowerMode>,
}

/// Requests from the UI, shell or network collaborators.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetPowerMode(PowerMode),
    /// Output switches plus the DC mode built from the quick menu, applied together.
    ApplyQuickSettings(QuickSettings),
    SetUsbOutput(bool),
    SetAcOutput(bool),
    SetBatteryCurrentLimit(f32),
    SetCellVoltage(CellVoltage),
    SetSwitchingFrequency(SwitchingFrequency),
    SetDeadTime(DeadTime),
    SetLightLoadMode(bool),
    SetCurrentFoldback(bool),
    SetMpptConfig(MpptConfig),
    SetFanConfig(FanConfig),
    SetAutoPowerOffConfig(AutoPowerOffConfig),
    Shutdown,
}

/// Snapshot published once per control tick for display and network collaborators.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Readings {
    pub telemetry: TelemetrySample,
    pub battery: BatteryReading,
    pub soc_percent: f32,
    pub temperatures: ZoneTemperatures,
    pub fan_duty: u8,
    pub fan_speed: f32,
    pub auto_power_off: ApoState,
    pub mppt_target: Option<f32>,
    pub mode: Option<PowerMode>,
    pub usb_output: bool,
    pub ac_output: bool,
    pub chip_online: bool,
    pub status: Status,
}

/// Buffer of 4 commands, one consumer (the control loop), up to 3 producers.
pub type CommandChannel = PubSubChannel<CriticalSectionRawMutex, Command, 4, 1, 3>;
pub type CommandSubscriber<'a> = Subscriber<'a, CriticalSectionRawMutex, Command, 4, 1, 3>;

/// Buffer of 2 snapshots, up to 3 subscribers, one publisher (the control loop).
pub type ReadingsChannel = PubSubChannel<CriticalSectionRawMutex, Readings, 2, 3, 1>;
/// Overwrites the oldest snapshot instead of waiting for slow subscribers.
pub type ReadingsPublisher<'a> = ImmediatePublisher<'a, CriticalSectionRawMutex, Readings, 2, 3, 1>;

/// Firmware-wide channels. `ControlLoop::on_static_channels` takes the command
/// subscriber and the readings publisher; UI, shell and network tasks take the rest.
pub static COMMAND_CHANNEL: CommandChannel = PubSubChannel::new();
pub static READINGS_CHANNEL: ReadingsChannel = PubSubChannel::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_probe_keeps_last_value() {
        let mut t = ZoneTemperatures::default();
        t.update_from_probes([30.0, 41.0, 44.0, 35.0]);
        t.update_from_probes([31.0, -127.0, -50.0, 36.0]);
        assert_eq!(t, ZoneTemperatures { battery: 31.0, module_a: 41.0, module_b: 44.0, inverter: 36.0 });
        assert_eq!(t.module(), 44.0);
    }

    #[test]
    fn input_power_is_v_times_i() {
        let s = TelemetrySample { input_voltage: 15.0, input_current: 2.0, ..Default::default() };
        assert_eq!(s.input_power(), 30.0);
    }
}
