//! Perturb-and-observe maximum power point tracking.
//!
//! Every `interval_ms` the engine compares input power with the previous sample. A drop
//! reverses the step direction; the target then moves one step and is clamped into the
//! configured band. There is no dead band, so in steady state the target oscillates one
//! step around the maximum power point.

use embassy_time::{Duration, Instant};

use crate::settings::MpptConfig;
use crate::shared_state::ControlContext;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MpptState {
    pub target_voltage: f32,
    pub last_power: f32,
    /// Signed step (V).
    pub step: f32,
}

#[derive(Debug)]
pub struct MpptEngine {
    config: MpptConfig,
    state: Option<MpptState>,
    last_run: Instant,
}

/// `value` limited to `[min, max]`; if the band is inverted `min` wins, and a
/// non-finite value lands on `min`.
fn clamp_band(value: f32, min: f32, max: f32) -> f32 {
    if !value.is_finite() || value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

impl MpptEngine {
    pub fn new(config: MpptConfig) -> Self {
        Self { config, state: None, last_run: Instant::from_ticks(0) }
    }

    pub fn config(&self) -> &MpptConfig {
        &self.config
    }

    /// Replace the configuration. A running engine keeps its direction and moves its
    /// target into the new band.
    pub fn set_config(&mut self, config: MpptConfig) {
        let config = config.sanitized();
        self.config = config;
        if let Some(s) = self.state.as_mut() {
            s.target_voltage = clamp_band(s.target_voltage, config.min_voltage, config.max_voltage);
            s.step = if s.step < 0.0 { -config.step } else { config.step };
        }
    }

    pub fn start_voltage(&self) -> f32 {
        clamp_band(self.config.start_voltage, self.config.min_voltage, self.config.max_voltage)
    }

    /// Fresh state at the start voltage, stepping upward first. The first perturbation
    /// happens one interval after `now`.
    pub fn start(&mut self, now: Instant) -> f32 {
        let target = self.start_voltage();
        self.state = Some(MpptState { target_voltage: target, last_power: 0.0, step: self.config.step });
        self.last_run = now;
        debug!("mppt: started at {} V", target);
        target
    }

    pub fn stop(&mut self) {
        if self.state.take().is_some() {
            debug!("mppt: stopped");
        }
    }

    pub fn state(&self) -> Option<&MpptState> {
        self.state.as_ref()
    }

    pub fn target_voltage(&self) -> Option<f32> {
        self.state.map(|s| s.target_voltage)
    }

    /// Run one perturbation if the engine is tracking and the interval has elapsed.
    /// Returns the new VINREG target to command.
    pub fn tick(&mut self, ctx: &ControlContext, now: Instant) -> Option<f32> {
        if !ctx.mode.is_some_and(|m| m.is_tracking()) {
            return None;
        }
        let interval = Duration::from_millis(self.config.interval_ms as u64);
        if now < self.last_run + interval {
            return None;
        }
        self.last_run = now;
        self.perturb(ctx.telemetry.input_power())
    }

    /// One perturb-and-observe step with the given input power, ignoring the interval.
    pub fn perturb(&mut self, power: f32) -> Option<f32> {
        let (min, max) = (self.config.min_voltage, self.config.max_voltage);
        let s = self.state.as_mut()?;
        if power < s.last_power {
            s.step = -s.step;
        }
        s.target_voltage = clamp_band(s.target_voltage + s.step, min, max);
        s.last_power = power;
        debug!("mppt: P={} W -> target {} V", power, s.target_voltage);
        Some(s.target_voltage)
    }
}
