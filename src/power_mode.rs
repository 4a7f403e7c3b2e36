//! Operating-mode transitions of the converter.

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;

use crate::mppt::MpptEngine;
use crate::sc8812a::device::{Result, Sc8812a};
use crate::sc8812a::types::{Channel, Direction};

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    /// Converter parked.
    Off,
    /// VBAT -> VBUS at a fixed output voltage, limited on the bus side.
    Discharge { output_voltage: f32, current_limit: f32 },
    /// VBUS -> VBAT from a stiff supply that must not sag below `min_input_voltage`.
    Charge { min_input_voltage: f32, current_limit: f32 },
    /// VBUS -> VBAT from a variable source, VINREG driven by the MPPT engine.
    TrackSource { current_limit: f32 },
}

impl PowerMode {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            PowerMode::Off => None,
            PowerMode::Discharge { .. } => Some(Direction::Discharge),
            PowerMode::Charge { .. } | PowerMode::TrackSource { .. } => Some(Direction::Charge),
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self, PowerMode::TrackSource { .. })
    }
}

/// Applies [`PowerMode`]s in the order disable, reprogram, re-enable.
#[derive(Debug, Default)]
pub struct PowerModeController {
    active: Option<PowerMode>,
}

impl PowerModeController {
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Mode of the last transition that completed. `None` before the first one and
    /// after a transition was abandoned partway.
    pub fn active(&self) -> Option<PowerMode> {
        self.active
    }

    /// Switch the converter to `mode`.
    ///
    /// On error the sequence stops where it failed; nothing already written is rolled
    /// back. Entering `TrackSource` restarts the MPPT engine at its start voltage;
    /// leaving it stops the engine but keeps the last VINREG the engine wrote.
    pub async fn apply<I2C, P>(
        &mut self,
        dev: &mut Sc8812a<I2C, P>,
        mode: PowerMode,
        mppt: &mut MpptEngine,
        now: Instant,
    ) -> Result<I2C::Error>
    where
        I2C: I2c,
        P: OutputPin,
    {
        info!("power: {:?} -> {:?}", self.active, mode);
        self.active = None;
        mppt.stop();

        let start_voltage = mppt.start_voltage();
        match Self::sequence(dev, mode, start_voltage).await {
            Ok(()) => {
                self.active = Some(mode);
                if mode.is_tracking() {
                    mppt.start(now);
                }
                Ok(())
            }
            Err(e) => {
                warn!("power: transition to {:?} abandoned ({})", mode, e.as_str());
                Err(e)
            }
        }
    }

    async fn sequence<I2C, P>(dev: &mut Sc8812a<I2C, P>, mode: PowerMode, start_voltage: f32) -> Result<I2C::Error>
    where
        I2C: I2c,
        P: OutputPin,
    {
        // 1. never reconfigure a running converter
        dev.set_output_enabled(false).await?;

        // 2. set-points
        match mode {
            PowerMode::Off => return Ok(()),
            PowerMode::Discharge { output_voltage, current_limit } => {
                dev.write_output_voltage(output_voltage).await?;
                dev.write_current_limit(Channel::Bus, current_limit).await?;
            }
            PowerMode::Charge { min_input_voltage, current_limit } => {
                dev.write_input_regulation_voltage(min_input_voltage).await?;
                dev.write_current_limit(Channel::Bus, current_limit).await?;
            }
            PowerMode::TrackSource { current_limit } => {
                dev.write_input_regulation_voltage(start_voltage).await?;
                dev.write_current_limit(Channel::Bus, current_limit).await?;
            }
        }

        // 3. direction first, then release PSTOP
        let direction = match mode.direction() {
            Some(d) => d,
            None => return Ok(()),
        };
        dev.set_adc_enabled(true).await?;
        dev.set_output_direction(direction).await?;
        dev.set_output_enabled(true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sc8812a::regs::*;
    use crate::sc8812a::types::CalibrationProfile;
    use crate::settings::MpptConfig;
    use crate::testing::{FakeChip, FakePin};
    use embassy_futures::block_on;

    fn setup(chip: FakeChip) -> (Sc8812a<FakeChip, FakePin>, MpptEngine) {
        let cal = CalibrationProfile { rs1_milliohm: 5.0, rs2_milliohm: 5.0, ..Default::default() };
        (
            Sc8812a::new(chip, Some(FakePin::default()), cal),
            MpptEngine::new(MpptConfig::default()),
        )
    }

    #[test]
    fn discharge_disables_before_reprogramming() {
        let mut chip = FakeChip::new();
        chip.regs[REG_CTRL0_SET as usize] = 0x80; // was discharging
        let (mut dev, mut mppt) = setup(chip);
        let mut ctl = PowerModeController::new();

        let mode = PowerMode::Discharge { output_voltage: 12.0, current_limit: 3.0 };
        block_on(ctl.apply(&mut dev, mode, &mut mppt, Instant::from_millis(0))).unwrap();
        assert_eq!(ctl.active(), Some(mode));
        assert!(mppt.state().is_none());

        let (chip, pin) = dev.release();
        // first write clears EN_OTG, set-points follow, EN_OTG comes back last
        assert_eq!(chip.writes.first(), Some(&(REG_CTRL0_SET, 0x00)));
        assert_eq!(chip.writes.last(), Some(&(REG_CTRL0_SET, 0x80)));
        let vbus_ref = chip.writes.iter().position(|w| w.0 == REG_VBUSREF_I_SET).unwrap();
        let ibus = chip.writes.iter().position(|w| *w == (REG_IBUS_LIM_SET, 127)).unwrap();
        assert!(vbus_ref > 0 && ibus > vbus_ref);
        assert_eq!(chip.regs[REG_VBUSREF_I_SET as usize], 119);
        assert!(!pin.unwrap().high);
    }

    #[test]
    fn track_source_starts_mppt_at_start_voltage() {
        let (mut dev, mut mppt) = setup(FakeChip::new());
        let mut ctl = PowerModeController::new();
        let mode = PowerMode::TrackSource { current_limit: 2.0 };
        block_on(ctl.apply(&mut dev, mode, &mut mppt, Instant::from_millis(10))).unwrap();

        assert_eq!(mppt.target_voltage(), Some(14.0));
        let (chip, _) = dev.release();
        assert_eq!(chip.regs[REG_VINREG_SET as usize], 139);
        assert_eq!(chip.regs[REG_CTRL0_SET as usize] & 0x80, 0);
        assert_eq!(chip.regs[REG_CTRL3 as usize] & (1 << 5), 1 << 5);
    }

    #[test]
    fn leaving_track_source_stops_mppt_and_keeps_vinreg() {
        let (mut dev, mut mppt) = setup(FakeChip::new());
        let mut ctl = PowerModeController::new();
        block_on(ctl.apply(&mut dev, PowerMode::TrackSource { current_limit: 2.0 }, &mut mppt, Instant::from_millis(0))).unwrap();
        block_on(ctl.apply(&mut dev, PowerMode::Off, &mut mppt, Instant::from_millis(5))).unwrap();

        assert_eq!(ctl.active(), Some(PowerMode::Off));
        assert!(mppt.state().is_none());
        let (chip, pin) = dev.release();
        assert_eq!(chip.regs[REG_VINREG_SET as usize], 139);
        assert!(pin.unwrap().high);
    }

    #[test]
    fn failed_step_abandons_transition() {
        let mut chip = FakeChip::new();
        chip.fail_reads_of = Some(REG_VBUSREF_I_SET2);
        let (mut dev, mut mppt) = setup(chip);
        let mut ctl = PowerModeController::new();
        let mode = PowerMode::Discharge { output_voltage: 12.0, current_limit: 3.0 };

        assert!(block_on(ctl.apply(&mut dev, mode, &mut mppt, Instant::from_millis(0))).is_err());
        assert_eq!(ctl.active(), None);
        let (chip, pin) = dev.release();
        // stayed disabled, current limit never reached
        assert!(pin.unwrap().high);
        assert!(!chip.writes.iter().any(|w| w.0 == REG_IBUS_LIM_SET));
        assert_eq!(chip.regs[REG_CTRL0_SET as usize] & 0x80, 0);
    }
}
