//! The tick-driven control loop.
//!
//! Fast tick: poll user input, drain commands. Control tick: check the chip is alive,
//! sample telemetry and sensors, run MPPT, fan and auto power-off, publish a snapshot.

use embassy_time::{Instant, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;

use crate::auto_power_off::AutoPowerOffMonitor;
use crate::battery::{estimate_soc, filter_reading};
use crate::fan::ThermalFanController;
use crate::mppt::MpptEngine;
use crate::power_mode::{PowerMode, PowerModeController};
use crate::sc8812a::device::{Result, Sc8812a};
use crate::sc8812a::types::{Channel, Status};
use crate::scheduler::{Task, TickScheduler};
use crate::settings::ControlConfig;
use crate::shared_state::{
    BatteryReading, Command, CommandSubscriber, ControlContext, Readings, ReadingsPublisher,
    COMMAND_CHANNEL, READINGS_CHANNEL,
};

/// External pack monitor, already in volts and amps.
pub trait BatteryMonitor {
    fn read(&mut self) -> BatteryReading;
}

/// Four probes in battery, module A, module B, inverter order (°C).
/// Disconnected probes report a value at or below -50 °C.
pub trait TemperatureProbes {
    fn read(&mut self) -> [f32; 4];
}

/// Buttons and other UI input.
pub trait ActivityInput {
    /// `true` if anything happened since the previous poll.
    fn poll(&mut self) -> bool;
}

pub trait FanPwm {
    /// 0..=255.
    fn set_duty(&mut self, duty: u8);
}

/// Enable lines of the USB and AC outputs. They sit outside the converter and are
/// switched whether or not the chip answers.
pub trait OutputSwitches {
    fn set_usb(&mut self, on: bool);
    fn set_ac(&mut self, on: bool);
}

/// Why [`ControlLoop::run`] returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ShutdownCause {
    /// Auto power-off timed out.
    Idle,
    /// A `Command::Shutdown` arrived.
    Requested,
}

pub struct ControlLoop<'a, I2C, P, B, T, A, F, S> {
    dev: Sc8812a<I2C, P>,
    battery: B,
    probes: T,
    input: A,
    fan_pwm: F,
    outputs: S,

    config: ControlConfig,
    power: PowerModeController,
    /// Mode to (re)apply whenever the chip comes online.
    requested: PowerMode,
    mppt: MpptEngine,
    fan: ThermalFanController,
    apo: AutoPowerOffMonitor,

    ctx: ControlContext,
    input_latch: bool,
    online: bool,
    status: Status,

    commands: CommandSubscriber<'a>,
    readings: ReadingsPublisher<'a>,
}

impl<I2C, P, B, T, A, F, S> ControlLoop<'static, I2C, P, B, T, A, F, S>
where
    I2C: I2c,
    P: OutputPin,
    B: BatteryMonitor,
    T: TemperatureProbes,
    A: ActivityInput,
    F: FanPwm,
    S: OutputSwitches,
{
    /// Build the loop on [`COMMAND_CHANNEL`] and [`READINGS_CHANNEL`].
    ///
    /// Fails if the command channel already has its one subscriber, i.e. another loop
    /// was wired to it and is still alive.
    #[allow(clippy::too_many_arguments)]
    pub fn on_static_channels(
        dev: Sc8812a<I2C, P>,
        battery: B,
        probes: T,
        input: A,
        fan_pwm: F,
        outputs: S,
        config: ControlConfig,
        now: Instant,
    ) -> core::result::Result<Self, embassy_sync::pubsub::Error> {
        let commands = COMMAND_CHANNEL.subscriber()?;
        let readings = READINGS_CHANNEL.immediate_publisher();
        Ok(Self::new(dev, battery, probes, input, fan_pwm, outputs, config, commands, readings, now))
    }
}

impl<'a, I2C, P, B, T, A, F, S> ControlLoop<'a, I2C, P, B, T, A, F, S>
where
    I2C: I2c,
    P: OutputPin,
    B: BatteryMonitor,
    T: TemperatureProbes,
    A: ActivityInput,
    F: FanPwm,
    S: OutputSwitches,
{
    /// The quick settings decide the initial mode; it is applied by [`Self::start`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dev: Sc8812a<I2C, P>,
        battery: B,
        probes: T,
        input: A,
        fan_pwm: F,
        outputs: S,
        config: ControlConfig,
        commands: CommandSubscriber<'a>,
        readings: ReadingsPublisher<'a>,
        now: Instant,
    ) -> Self {
        let config = config.sanitized();
        let ctx = ControlContext {
            usb_output: config.quick.usb_output,
            ac_output: config.quick.ac_output,
            ..Default::default()
        };
        Self {
            dev,
            battery,
            probes,
            input,
            fan_pwm,
            outputs,
            config,
            power: PowerModeController::new(),
            requested: config.quick.power_mode(),
            mppt: MpptEngine::new(config.mppt),
            fan: ThermalFanController::new(config.fan),
            apo: AutoPowerOffMonitor::new(config.auto_power_off, now),
            ctx,
            input_latch: false,
            online: false,
            status: Status::default(),
            commands,
            readings,
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn context(&self) -> &ControlContext {
        &self.ctx
    }

    pub fn power_mode(&self) -> Option<PowerMode> {
        self.power.active()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Give back the driver (and with it the bus and PSTOP pin).
    pub fn release(self) -> Sc8812a<I2C, P> {
        self.dev
    }

    /// Drive the output switches, then bring the chip up: init, charger setup,
    /// settings dump, then the requested mode.
    pub async fn start(&mut self, now: Instant) -> Result<I2C::Error> {
        self.outputs.set_usb(self.ctx.usb_output);
        self.outputs.set_ac(self.ctx.ac_output);
        self.dev.init().await?;
        self.dev.apply_setup(&self.config.charger).await?;
        if let Err(e) = self.dev.dump_settings().await {
            warn!("control: settings dump failed ({})", e.as_str());
        }
        self.online = true;
        info!("control: SC8812A online");
        self.power.apply(&mut self.dev, self.requested, &mut self.mppt, now).await
    }

    /// Run until a shutdown; the converter output and ADC are off when this returns.
    pub async fn run(&mut self) -> ShutdownCause {
        let now = Instant::now();
        if let Err(e) = self.start(now).await {
            warn!("control: bring-up failed ({}), retrying on the control tick", e.as_str());
        }

        let mut sched = TickScheduler::new(now);
        loop {
            let now = Instant::now();
            while let Some(task) = sched.due(now) {
                let cause = match task {
                    Task::Input => self.fast_tick(now).await,
                    Task::Control => self.slow_tick(now).await,
                };
                if let Some(cause) = cause {
                    self.shutdown(cause).await;
                    return cause;
                }
            }
            Timer::at(sched.next_deadline()).await;
        }
    }

    /// Input polling and command handling.
    pub async fn fast_tick(&mut self, now: Instant) -> Option<ShutdownCause> {
        if self.input.poll() {
            self.input_latch = true;
        }
        while let Some(cmd) = self.commands.try_next_message_pure() {
            if let Some(cause) = self.handle_command(cmd, now).await {
                return Some(cause);
            }
        }
        None
    }

    /// Telemetry, control loops and the snapshot.
    pub async fn slow_tick(&mut self, now: Instant) -> Option<ShutdownCause> {
        self.check_health(now).await;

        self.ctx.telemetry = self.dev.read_telemetry().await;
        self.ctx.battery = filter_reading(self.battery.read());
        self.ctx.temperatures.update_from_probes(self.probes.read());
        self.ctx.input_activity = core::mem::take(&mut self.input_latch);
        self.ctx.mode = self.power.active();

        if let Some(target) = self.mppt.tick(&self.ctx, now) {
            if let Err(e) = self.dev.write_input_regulation_voltage(target).await {
                warn!("mppt: VINREG {} V not written ({})", target, e.as_str());
            }
        }

        let fan = self.fan.update(&self.ctx.temperatures, now);
        self.fan_pwm.set_duty(fan.pwm);

        let idle_timeout = self.apo.evaluate(&self.ctx, &self.config.fan, now);

        self.readings.publish_immediate(Readings {
            telemetry: self.ctx.telemetry,
            battery: self.ctx.battery,
            soc_percent: estimate_soc(self.ctx.battery, self.config.charger.cell_count, &self.config.soc),
            temperatures: self.ctx.temperatures,
            fan_duty: fan.duty,
            fan_speed: fan.speed,
            auto_power_off: self.apo.state(),
            mppt_target: self.mppt.target_voltage(),
            mode: self.ctx.mode,
            usb_output: self.ctx.usb_output,
            ac_output: self.ctx.ac_output,
            chip_online: self.online,
            status: self.status,
        });

        idle_timeout.then_some(ShutdownCause::Idle)
    }

    /// Park the converter and stop the ADC. Failures are logged, not retried.
    pub async fn shutdown(&mut self, cause: ShutdownCause) {
        info!("control: shutting down ({:?})", cause);
        self.mppt.stop();
        if let Err(e) = self.dev.set_output_enabled(false).await {
            warn!("control: output disable failed ({})", e.as_str());
        }
        if let Err(e) = self.dev.set_adc_enabled(false).await {
            warn!("control: ADC disable failed ({})", e.as_str());
        }
    }

    /// Poll STATUS as the bus health check; re-run bring-up after an outage.
    async fn check_health(&mut self, now: Instant) {
        match self.dev.read_status().await {
            Ok(status) => {
                if status.raw != self.status.raw {
                    crate::sc8812a::decode::log_status(&status);
                }
                self.status = status;
                if !self.online {
                    if let Err(e) = self.start(now).await {
                        warn!("control: bring-up failed ({})", e.as_str());
                    }
                }
            }
            Err(e) => {
                if self.online {
                    warn!("control: SC8812A offline ({})", e.as_str());
                }
                self.online = false;
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command, now: Instant) -> Option<ShutdownCause> {
        debug!("control: command {:?}", cmd);
        let res = match cmd {
            Command::SetPowerMode(mode) => {
                self.requested = mode;
                self.power.apply(&mut self.dev, mode, &mut self.mppt, now).await
            }
            Command::ApplyQuickSettings(q) => {
                let q = q.sanitized();
                self.config.quick = q;
                self.set_usb_output(q.usb_output);
                self.set_ac_output(q.ac_output);
                self.requested = q.power_mode();
                self.power.apply(&mut self.dev, self.requested, &mut self.mppt, now).await
            }
            Command::SetUsbOutput(on) => {
                self.set_usb_output(on);
                Ok(())
            }
            Command::SetAcOutput(on) => {
                self.set_ac_output(on);
                Ok(())
            }
            Command::SetBatteryCurrentLimit(amps) => {
                self.config.charger.battery_current_limit_a = amps;
                self.config.charger = self.config.charger.sanitized();
                let amps = self.config.charger.battery_current_limit_a;
                self.dev.write_current_limit(Channel::Battery, amps).await
            }
            Command::SetCellVoltage(v) => {
                self.config.charger.cell_voltage = v;
                self.dev.set_cell_termination_voltage(v).await
            }
            Command::SetSwitchingFrequency(f) => {
                self.config.charger.switching_frequency = f;
                self.dev.set_switching_frequency(f).await
            }
            Command::SetDeadTime(dt) => {
                self.config.charger.dead_time = dt;
                self.dev.set_dead_time(dt).await
            }
            Command::SetLightLoadMode(on) => {
                self.config.charger.light_load_mode = on;
                self.dev.set_light_load_mode(on).await
            }
            Command::SetCurrentFoldback(on) => {
                self.config.charger.current_foldback = on;
                self.dev.set_current_foldback(on).await
            }
            Command::SetMpptConfig(c) => {
                let c = c.sanitized();
                self.config.mppt = c;
                self.mppt.set_config(c);
                Ok(())
            }
            Command::SetFanConfig(c) => {
                let c = c.sanitized();
                self.config.fan = c;
                self.fan.set_config(c);
                Ok(())
            }
            Command::SetAutoPowerOffConfig(c) => {
                let c = c.sanitized();
                self.config.auto_power_off = c;
                self.apo.set_config(c, now);
                Ok(())
            }
            Command::Shutdown => return Some(ShutdownCause::Requested),
        };
        if let Err(e) = res {
            warn!("control: command failed ({})", e.as_str());
        }
        None
    }

    fn set_usb_output(&mut self, on: bool) {
        self.config.quick.usb_output = on;
        self.ctx.usb_output = on;
        self.outputs.set_usb(on);
    }

    fn set_ac_output(&mut self, on: bool) {
        self.config.quick.ac_output = on;
        self.ctx.ac_output = on;
        self.outputs.set_ac(on);
    }
}
