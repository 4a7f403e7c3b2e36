//! Compile-time knobs for the power-bank control core.
//! Edit these constants and rebuild. Anything the user can change at runtime lives
//! in [`crate::settings`] instead.
use embassy_time::Duration;

/// Bounded wait for a single bus transaction before it is treated as failed.
pub const I2C_OP_TIMEOUT: Duration = Duration::from_millis(5);

/// Fast tick: input/activity polling and command handling.
pub const INPUT_TICK_PERIOD: Duration = Duration::from_millis(20);

/// Slow tick: telemetry acquisition and every control loop (MPPT, fan, auto power-off).
pub const CONTROL_TICK_PERIOD: Duration = Duration::from_millis(100);

/// The fan runs flat out for this long after start when the self-test is enabled.
pub const FAN_STARTUP_WINDOW: Duration = Duration::from_millis(2_000);

/// Smallest normalized fan speed reported while the fan is spinning at all.
pub const FAN_MIN_REPORTED_SPEED: f32 = 0.01;

/// Battery current (A) above which the pack counts as charging, and therefore active.
pub const CHARGE_DETECT_FLOOR_A: f32 = 0.1;

/// Battery monitor readings inside +/- this band (A) are reported as zero.
pub const BATTERY_CURRENT_DEADBAND_A: f32 = 0.002;

/// Probe readings at or below this (°C) mean a disconnected sensor; the last value is kept.
pub const MIN_VALID_TEMPERATURE_C: f32 = -50.0;

/// Fan curve thresholds are clamped into this range (°C).
pub const FAN_CURVE_MIN_C: f32 = -50.0;
pub const FAN_CURVE_MAX_C: f32 = 200.0;

/// Datasheet minimum for either current-limit register (A).
pub const MIN_CURRENT_LIMIT_A: f32 = 0.3;

/// VINREG uses the 40 mV ratio at or below this voltage, the 100 mV ratio above it.
pub const VINREG_RATIO_BREAKPOINT_V: f32 = 10.24;
