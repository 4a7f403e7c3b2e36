//! Thermal fan control: four probes, three curves, one PWM output.

use embassy_time::Instant;

use crate::config::{FAN_MIN_REPORTED_SPEED, FAN_STARTUP_WINDOW};
use crate::settings::{FanConfig, FanCurve};
use crate::shared_state::ZoneTemperatures;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FanOutput {
    /// 0..=100 %.
    pub duty: u8,
    /// Duty scaled to the 0..=255 actuator range.
    pub pwm: u8,
    /// Normalized speed for display, 0.0 or `FAN_MIN_REPORTED_SPEED..=1.0`.
    pub speed: f32,
}

/// Duty (%) one zone asks for.
///
/// 0 below `low`, 100 at or above `high`, otherwise linear from `min_duty` at `low`
/// to 100 at `high`. Interpolation is done on integer centi-degrees.
pub fn curve_duty(temp_c: f32, curve: &FanCurve, min_duty: u8) -> u8 {
    if temp_c < curve.low_c {
        return 0;
    }
    if temp_c >= curve.high_c {
        return 100;
    }
    // saturate to i32 centi-degrees, interpolate in i64
    let centi = |c: f32| libm::roundf(c * 100.0) as i32 as i64;
    let (t, lo, hi) = (centi(temp_c), centi(curve.low_c), centi(curve.high_c));
    let floor = min_duty.min(100) as i64;
    if hi <= lo {
        return 100;
    }
    let duty = floor + (t - lo).clamp(0, hi - lo) * (100 - floor) / (hi - lo);
    duty.clamp(floor, 100) as u8
}

/// Normalized speed for a duty: the floor maps to the minimum reported speed and 100 %
/// to 1.0.
pub fn speed_fraction(duty: u8, min_duty: u8) -> f32 {
    if duty == 0 {
        return 0.0;
    }
    if duty >= 100 || min_duty >= 100 {
        return 1.0;
    }
    let span = (100 - min_duty) as f32;
    ((duty as f32 - min_duty as f32) / span).clamp(FAN_MIN_REPORTED_SPEED, 1.0)
}

pub fn duty_to_pwm(duty: u8) -> u8 {
    (duty.min(100) as u16 * 255 / 100) as u8
}

#[derive(Debug)]
pub struct ThermalFanController {
    config: FanConfig,
    started_at: Option<Instant>,
}

impl ThermalFanController {
    pub fn new(config: FanConfig) -> Self {
        Self { config, started_at: None }
    }

    pub fn config(&self) -> &FanConfig {
        &self.config
    }

    /// Curves change immediately; an ongoing startup window is not restarted.
    pub fn set_config(&mut self, config: FanConfig) {
        self.config = config;
    }

    /// The startup window opens on the first call.
    pub fn update(&mut self, temps: &ZoneTemperatures, now: Instant) -> FanOutput {
        let started = *self.started_at.get_or_insert(now);
        if self.config.startup_self_test && now < started + FAN_STARTUP_WINDOW {
            return FanOutput { duty: 100, pwm: duty_to_pwm(100), speed: 1.0 };
        }

        let c = &self.config;
        let duty = curve_duty(temps.battery, &c.battery, c.min_duty)
            .max(curve_duty(temps.module(), &c.module, c.min_duty))
            .max(curve_duty(temps.inverter, &c.inverter, c.min_duty));
        FanOutput { duty, pwm: duty_to_pwm(duty), speed: speed_fraction(duty, c.min_duty) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_time::Duration;

    const BAT: FanCurve = FanCurve { low_c: 40.0, high_c: 50.0 };

    fn temps(battery: f32, module_a: f32, module_b: f32, inverter: f32) -> ZoneTemperatures {
        ZoneTemperatures { battery, module_a, module_b, inverter }
    }

    #[test]
    fn curve_shape() {
        assert_eq!(curve_duty(39.99, &BAT, 50), 0);
        assert_eq!(curve_duty(40.0, &BAT, 50), 50);
        assert_eq!(curve_duty(45.0, &BAT, 50), 75);
        assert_eq!(curve_duty(49.99, &BAT, 50), 99);
        assert_eq!(curve_duty(50.0, &BAT, 50), 100);
        assert_eq!(curve_duty(120.0, &BAT, 50), 100);
        assert_eq!(curve_duty(-20.0, &BAT, 50), 0);
    }

    #[test]
    fn curve_non_decreasing_in_band() {
        let mut prev = 0;
        let mut t = 40.0f32;
        while t < 50.0 {
            let d = curve_duty(t, &BAT, 30);
            assert!(d >= prev, "{} °C -> {} after {}", t, d, prev);
            prev = d;
            t += 0.05;
        }
    }

    #[test]
    fn degenerate_curve() {
        let c = FanCurve { low_c: 45.0, high_c: 45.0 };
        assert_eq!(curve_duty(44.9, &c, 50), 0);
        assert_eq!(curve_duty(45.0, &c, 50), 100);
    }

    #[test]
    fn extreme_band_saturates_without_overflow() {
        let c = FanCurve { low_c: -3.0e38, high_c: 3.0e38 };
        assert_eq!(curve_duty(0.0, &c, 0), 50);
        assert_eq!(curve_duty(0.0, &c, 20), 60);
        let c = FanCurve { low_c: f32::MIN, high_c: f32::MAX };
        assert_eq!(curve_duty(2.0e38, &c, 50), 100);
    }

    #[test]
    fn modules_combined_by_max_then_max_over_zones() {
        let cfg = FanConfig { startup_self_test: false, ..FanConfig::default() };
        let mut fan = ThermalFanController::new(cfg);
        let t0 = Instant::from_millis(0);

        assert_eq!(fan.update(&temps(25.0, 30.0, 30.0, 30.0), t0).duty, 0);
        // module B at the middle of 45..65 -> 75 %
        assert_eq!(fan.update(&temps(25.0, 30.0, 55.0, 30.0), t0).duty, 75);
        // battery over its high threshold dominates
        let out = fan.update(&temps(51.0, 30.0, 55.0, 30.0), t0);
        assert_eq!(out, FanOutput { duty: 100, pwm: 255, speed: 1.0 });
    }

    #[test]
    fn startup_window_forces_full_speed() {
        let mut fan = ThermalFanController::new(FanConfig::default());
        let cold = temps(20.0, 20.0, 20.0, 20.0);
        let t0 = Instant::from_millis(1_000);

        assert_eq!(fan.update(&cold, t0).duty, 100);
        assert_eq!(fan.update(&cold, t0 + Duration::from_millis(1_999)).speed, 1.0);
        assert_eq!(fan.update(&cold, t0 + Duration::from_millis(2_000)).duty, 0);
    }

    #[test]
    fn speed_and_pwm_scaling() {
        assert_eq!(speed_fraction(0, 50), 0.0);
        assert_eq!(speed_fraction(50, 50), FAN_MIN_REPORTED_SPEED);
        assert_eq!(speed_fraction(75, 50), 0.5);
        assert_eq!(speed_fraction(100, 50), 1.0);
        assert_eq!(duty_to_pwm(0), 0);
        assert_eq!(duty_to_pwm(50), 127);
        assert_eq!(duty_to_pwm(100), 255);
    }
}
