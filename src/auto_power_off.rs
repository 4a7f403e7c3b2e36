//! Idle timeout that asks for a shutdown when nothing is happening.

use embassy_time::{Duration, Instant};

use crate::config::CHARGE_DETECT_FLOOR_A;
use crate::settings::{AutoPowerOffConfig, FanConfig};
use crate::shared_state::ControlContext;

/// Reported state. Only informational: the timeout check does not depend on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApoState {
    Active,
    CountingDown,
}

#[derive(Debug)]
pub struct AutoPowerOffMonitor {
    config: AutoPowerOffConfig,
    last_activity: Instant,
    state: ApoState,
    /// Cleared by the trigger, set again by the next activity.
    armed: bool,
}

impl AutoPowerOffMonitor {
    pub fn new(config: AutoPowerOffConfig, now: Instant) -> Self {
        Self { config, last_activity: now, state: ApoState::Active, armed: true }
    }

    pub fn state(&self) -> ApoState {
        self.state
    }

    pub fn config(&self) -> &AutoPowerOffConfig {
        &self.config
    }

    /// New thresholds count as activity, so the idle timer restarts.
    pub fn set_config(&mut self, config: AutoPowerOffConfig, now: Instant) {
        self.config = config;
        self.mark_active(now);
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.config.delay_minutes as u64 * 60)
    }

    /// Anything in `ctx` that keeps the bank awake: load current, charging, user input,
    /// or any zone above the low end of its fan curve.
    pub fn is_activity(&self, ctx: &ControlContext, fan: &FanConfig) -> bool {
        let current = ctx.battery.current;
        let threshold_ma = if ctx.ac_output {
            self.config.idle_current_ac_ma
        } else {
            self.config.idle_current_ma
        };
        let t = &ctx.temperatures;

        current > CHARGE_DETECT_FLOOR_A
            || libm::fabsf(current) * 1000.0 > threshold_ma
            || ctx.input_activity
            || t.battery > fan.battery.low_c
            || t.module_a > fan.module.low_c
            || t.module_b > fan.module.low_c
            || t.inverter > fan.inverter.low_c
    }

    /// Returns `true` once per idle episode, on the first evaluation at or after
    /// `last_activity + delay`.
    pub fn evaluate(&mut self, ctx: &ControlContext, fan: &FanConfig, now: Instant) -> bool {
        if !self.config.enabled {
            self.mark_active(now);
            return false;
        }

        if self.is_activity(ctx, fan) {
            self.mark_active(now);
            return false;
        }

        if self.state != ApoState::CountingDown {
            info!("auto power-off: idle, {} min countdown", self.config.delay_minutes);
            self.state = ApoState::CountingDown;
        }

        if self.armed && now >= self.last_activity + self.delay() {
            self.armed = false;
            info!("auto power-off: idle timeout reached");
            return true;
        }
        false
    }

    fn mark_active(&mut self, now: Instant) {
        if self.state != ApoState::Active {
            debug!("auto power-off: activity");
            self.state = ApoState::Active;
        }
        self.last_activity = now;
        self.armed = true;
    }
}
