//! Post-processing of the external battery monitor's readings.

use crate::config::BATTERY_CURRENT_DEADBAND_A;
use crate::sc8812a::types::CellCount;
use crate::settings::SocCalibration;
use crate::shared_state::BatteryReading;

/// Zero the current inside the monitor's noise band.
pub fn filter_reading(raw: BatteryReading) -> BatteryReading {
    let current = if libm::fabsf(raw.current) < BATTERY_CURRENT_DEADBAND_A { 0.0 } else { raw.current };
    BatteryReading { voltage: raw.voltage, current }
}

/// State of charge in percent.
///
/// The pack voltage is compensated for internal-resistance sag (`sag_compensation`
/// volts per 10 A, positive current charging) and mapped linearly between the empty
/// and full cell voltages times the cell count, clamped to 0..=100.
pub fn estimate_soc(reading: BatteryReading, cells: CellCount, cal: &SocCalibration) -> f32 {
    let compensated = reading.voltage - reading.current * cal.sag_compensation / 10.0;
    let n = cells.cells() as f32;
    let empty = cal.empty_cell_v * n;
    let full = cal.full_cell_v * n;
    if full <= empty {
        return 0.0;
    }
    ((compensated - empty) / (full - empty) * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn deadband_zeroes_noise_only() {
        let r = filter_reading(BatteryReading { voltage: 14.8, current: 0.0015 });
        assert_eq!(r.current, 0.0);
        assert_eq!(r.voltage, 14.8);
        let r = filter_reading(BatteryReading { voltage: 14.8, current: -0.0015 });
        assert_eq!(r.current, 0.0);
        let r = filter_reading(BatteryReading { voltage: 14.8, current: -0.25 });
        assert_eq!(r.current, -0.25);
    }

    #[test]
    fn soc_linear_between_calibration_points() {
        let cal = SocCalibration::default();
        let at = |v: f32| estimate_soc(BatteryReading { voltage: v, current: 0.0 }, CellCount::S4, &cal);
        assert!(close(at(12.8), 0.0));
        assert!(close(at(16.0), 100.0));
        assert!(close(at(14.4), 50.0));
        assert_eq!(at(10.0), 0.0);
        assert_eq!(at(17.5), 100.0);
    }

    #[test]
    fn soc_compensates_sag() {
        let cal = SocCalibration::default();
        // 10 A discharge sags the pack by 0.3 V, which is added back
        let discharging = BatteryReading { voltage: 14.1, current: -10.0 };
        assert!(close(estimate_soc(discharging, CellCount::S4, &cal), 50.0));
        // and charging lifts it by the same amount
        let charging = BatteryReading { voltage: 14.7, current: 10.0 };
        assert!(close(estimate_soc(charging, CellCount::S4, &cal), 50.0));
    }
}
