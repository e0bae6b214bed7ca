//! Temperature controller
//!
//! One `Controller` regulates one vessel. It owns the settings, the control
//! engine (sample window, PID memory, dwell timer) and the handles on its
//! output hardware. The control loop calls [`Controller::tick`] once per poll
//! while configuration calls arrive from other threads.
//!
//! # Locking
//!
//! Settings and engine state sit behind one mutex. Ticks compute under that
//! lock and push the result to the actuator after releasing it, so the
//! actuator never waits on a configuration call and vice versa. The state,
//! actuator and aux locks are never held at the same time.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::constants::{control, duty, timing};
use crate::data::{
    normalize_optional_pin, validate_finite, validate_non_negative, validate_pin,
    ChannelSettings, ChannelStatus, ControllerStatus, HysteresisStatus, HysteresisThresholds,
    Mode, PersistedController, SettingsStore, TempScale, TemperatureReading,
};
use crate::engine::{
    ControlEngine, Decision, HysteresisAction, OutputChannels, OutputCommand, PidGains,
    TickInputs,
};
use crate::error::{BrewloopError, Result};
use crate::hw::{AuxOutput, OutputActuator, OutputFactory};
use crate::messages::MessageBoard;

/// Which output channel a setting applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Heat,
    Cool,
}

/// Collaborators injected into every controller
#[derive(Clone)]
pub struct ControllerDeps {
    pub outputs: Arc<dyn OutputFactory>,
    pub store: Arc<dyn SettingsStore>,
    pub messages: Arc<dyn MessageBoard>,
}

/// Bulk settings change from an operator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsUpdate {
    pub mode: Mode,
    /// Only applied in manual mode
    pub duty: f64,
    /// Heat cycle time in seconds
    pub cycle_time: f64,
    pub setpoint: f64,
    pub gains: PidGains,
}

/// Cooling output wiring
#[derive(Debug, Clone, PartialEq)]
pub struct CoolingConfig {
    pub pin: String,
    pub cycle_time: f64,
    /// Minimum minutes between cooler state changes
    pub delay: f64,
    pub gains: PidGains,
}

#[derive(Debug)]
struct ControllerState {
    probe: String,
    mode: Mode,
    setpoint: f64,
    /// Manual duty, or the duty hysteresis last set
    duty: f64,
    calculated_duty: f64,
    manual_cycle: f64,
    scale: TempScale,
    heat: ChannelSettings,
    cool: ChannelSettings,
    thresholds: HysteresisThresholds,
    aux_pin: Option<String>,
    invert_aux: bool,
    last_reading: Option<TemperatureReading>,
    engine: ControlEngine,
}

impl ControllerState {
    fn from_persisted(p: &PersistedController) -> Self {
        Self {
            probe: p.probe.clone(),
            mode: p.mode,
            setpoint: p.setpoint.max(0.0),
            duty: duty::clamp(p.duty),
            calculated_duty: duty::OFF,
            manual_cycle: p.manual_cycle,
            scale: p.scale,
            heat: p.heat.clone(),
            cool: p.cool.clone(),
            thresholds: p.hysteresis,
            aux_pin: p.aux_gpio.clone(),
            invert_aux: p.invert_aux,
            last_reading: None,
            engine: ControlEngine::new(),
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelSettings {
        match channel {
            Channel::Heat => &mut self.heat,
            Channel::Cool => &mut self.cool,
        }
    }
}

struct AuxHandle {
    output: Box<dyn AuxOutput>,
    invert: bool,
}

impl AuxHandle {
    /// Logical state: `invert` swaps which signal level counts as on
    fn is_on(&self) -> Result<bool> {
        Ok(self.output.level()? != self.invert)
    }

    fn set_on(&mut self, on: bool) -> Result<()> {
        self.output.set_level(on != self.invert)
    }
}

/// A temperature controller for one vessel
pub struct Controller {
    name: String,
    state: Mutex<ControllerState>,
    actuator: RwLock<Option<Arc<dyn OutputActuator>>>,
    aux: Mutex<Option<AuxHandle>>,
    deps: ControllerDeps,
    cooler_retry_attempts: u32,
    cooler_retry_interval: Duration,
}

impl Controller {
    /// New controller in off mode with zero gains and no outputs
    pub fn new(name: impl Into<String>, deps: ControllerDeps) -> Self {
        let name = name.into();
        let settings = PersistedController {
            name: name.clone(),
            ..Default::default()
        };
        Self::build(name, &settings, deps)
    }

    /// Rebuild a controller from its saved settings
    ///
    /// Pin identifiers are validated; nothing is opened until
    /// [`attach_outputs`](Self::attach_outputs).
    /// All-zero hysteresis thresholds mean "not configured" and are kept as is.
    pub fn from_persisted(settings: &PersistedController, deps: ControllerDeps) -> Result<Self> {
        if settings.name.trim().is_empty() {
            return Err(BrewloopError::invalid_config("name", "must not be empty"));
        }

        let mut settings = settings.clone();
        settings.heat.gpio = normalize_optional_pin(settings.heat.gpio.as_deref())?;
        settings.cool.gpio = normalize_optional_pin(settings.cool.gpio.as_deref())?;
        settings.aux_gpio = normalize_optional_pin(settings.aux_gpio.as_deref())?;

        let saved = settings.hysteresis;
        if saved != HysteresisThresholds::default() {
            settings.hysteresis = HysteresisThresholds::new(saved.min, saved.max, saved.min_time)?;
        }

        Ok(Self::build(settings.name.clone(), &settings, deps))
    }

    fn build(name: String, settings: &PersistedController, deps: ControllerDeps) -> Self {
        Self {
            name,
            state: Mutex::new(ControllerState::from_persisted(settings)),
            actuator: RwLock::new(None),
            aux: Mutex::new(None),
            deps,
            cooler_retry_attempts: timing::COOLER_RETRY_ATTEMPTS,
            cooler_retry_interval: timing::COOLER_RETRY_INTERVAL,
        }
    }

    /// Override how long `configure_cooling` waits for a cooler to appear
    pub fn with_cooler_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.cooler_retry_attempts = attempts;
        self.cooler_retry_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn probe(&self) -> String {
        self.state.lock().probe.clone()
    }

    pub fn heat_pin(&self) -> Option<String> {
        self.state.lock().heat.gpio.clone()
    }

    pub fn thresholds(&self) -> HysteresisThresholds {
        self.state.lock().thresholds
    }

    pub fn actuator(&self) -> Option<Arc<dyn OutputActuator>> {
        self.actuator.read().clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the actuator and open the aux pin; required before the loop runs
    ///
    /// Fails with `OutputNotConfigured` when no heat pin is set: such a
    /// controller is disabled.
    pub fn attach_outputs(&self) -> Result<()> {
        let (heat_pin, heat_cycle, cool, aux_pin, invert_aux) = {
            let state = self.state.lock();
            (
                state.heat.gpio.clone(),
                state.heat.cycle_time,
                state.cool.clone(),
                state.aux_pin.clone(),
                state.invert_aux,
            )
        };

        let heat_pin = heat_pin
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| BrewloopError::OutputNotConfigured(format!("{}: no heat GPIO", self.name)))?;
        validate_pin(&heat_pin)?;

        let actuator = self.ensure_actuator(&heat_pin, heat_cycle)?;

        if let Some(cool_pin) = cool.gpio.as_deref() {
            if actuator.cooler().is_none() {
                actuator.configure_cooler(cool_pin, cool.cycle_time, cool.delay)?;
            }
        }

        if let Some(pin) = aux_pin {
            self.open_aux(&pin, invert_aux)?;
        }

        info!(controller = %self.name, heat = %heat_pin, "Outputs attached");
        Ok(())
    }

    /// Release the actuator and aux pin, then save the settings
    pub fn shutdown(&self) -> Result<()> {
        let actuator = self.actuator.write().take();
        if let Some(actuator) = actuator {
            actuator.shutdown();
        }

        let aux = self.aux.lock().take();
        if let Some(mut aux) = aux {
            if let Err(e) = aux.output.close() {
                warn!(controller = %self.name, "Failed to close aux output: {}", e);
            }
        }

        info!(controller = %self.name, "Controller shut down");
        self.deps.store.save(&self.persisted())
    }

    // ========================================================================
    // Control tick
    // ========================================================================

    /// Run one control step with a fresh reading and push the result to the actuator
    pub fn tick(&self, reading: TemperatureReading) -> Decision {
        let actuator = self.actuator();
        let (outputs, current_duty) = match &actuator {
            Some(a) => (
                OutputChannels::new(a.heater().is_some(), a.cooler().is_some()),
                a.duty(),
            ),
            None => (OutputChannels::default(), duty::OFF),
        };

        let (decision, mode, temperature) = {
            let mut state = self.state.lock();
            state.last_reading = Some(reading);
            let temperature = reading.in_scale(state.scale);

            let inputs = TickInputs {
                mode: state.mode,
                setpoint: state.setpoint,
                manual_duty: state.duty,
                manual_cycle: state.manual_cycle,
                heat_cycle: state.heat.cycle_time,
                gains: PidGains::new(
                    state.heat.proportional,
                    state.heat.integral,
                    state.heat.derivative,
                ),
                thresholds: state.thresholds,
                outputs,
                current_duty,
                temperature,
                now: reading.taken_at,
            };
            let decision = state.engine.step(&inputs);

            match decision {
                Decision::Drive {
                    calculated: Some(calculated),
                    ..
                } => state.calculated_duty = calculated,
                Decision::Hysteresis { action, .. } => {
                    if let Some(duty) = action.duty() {
                        state.duty = duty;
                    }
                }
                _ => {}
            }

            (decision, state.mode, temperature)
        };

        if let (Some(actuator), Some(command)) = (&actuator, decision.command()) {
            apply_command(actuator.as_ref(), command);
        }

        if let Decision::Hysteresis { action, .. } = decision {
            self.post_dwell_message(&action);
        }

        match decision {
            Decision::NoOutputs => debug!(controller = %self.name, "No outputs, skipping tick"),
            Decision::SensorStale => {
                debug!(controller = %self.name, "No usable reading, keeping previous duty")
            }
            _ => info!(
                controller = %self.name,
                mode = %mode,
                temp = temperature,
                duty = actuator.as_ref().map(|a| a.duty()).unwrap_or(duty::OFF),
                "Control tick"
            ),
        }

        decision
    }

    fn post_dwell_message(&self, action: &HysteresisAction) {
        match action {
            HysteresisAction::Waiting { remaining_minutes } => {
                self.deps.messages.set_message(format!(
                    "{} time before changing outputs {:.2} mins remaining",
                    control::DWELL_MESSAGE_PREFIX,
                    remaining_minutes
                ));
            }
            action if action.changes_output() => {
                self.deps.messages.clear_prefixed(control::DWELL_MESSAGE_PREFIX);
            }
            _ => {}
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Apply an operator settings change and save it
    ///
    /// Every value is validated before anything changes. A failed save is
    /// logged; the new settings stay in force.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<()> {
        let duty = validate_finite("duty", update.duty)?;
        let cycle_time = validate_non_negative("cycle_time", update.cycle_time)?;
        let setpoint = validate_finite("setpoint", update.setpoint)?;
        validate_gains(&update.gains)?;

        {
            let mut state = self.state.lock();
            state.mode = update.mode;
            if update.mode == Mode::Manual {
                state.duty = duty::clamp(duty);
            }
            state.heat.cycle_time = cycle_time;
            state.setpoint = setpoint.max(0.0);
            state.heat.proportional = update.gains.proportional;
            state.heat.integral = update.gains.integral;
            state.heat.derivative = update.gains.derivative;
        }

        info!(
            controller = %self.name,
            mode = %update.mode,
            setpoint,
            p = update.gains.proportional,
            i = update.gains.integral,
            d = update.gains.derivative,
            "Settings updated"
        );
        self.persist();
        Ok(())
    }

    /// Replace the hysteresis thresholds; invalid thresholds leave the old ones in place
    pub fn set_hysteresis(&self, min: f64, max: f64, min_time: f64) -> Result<()> {
        let thresholds = HysteresisThresholds::new(min, max, min_time)?;
        self.state.lock().thresholds = thresholds;
        info!(controller = %self.name, min, max, min_time, "Hysteresis thresholds set");
        self.persist();
        Ok(())
    }

    /// Switch to hysteresis mode
    pub fn use_hysteresis(&self) {
        self.set_mode(Mode::Hysteresis);
    }

    pub fn set_mode(&self, mode: Mode) {
        self.state.lock().mode = mode;
        debug!(controller = %self.name, mode = %mode, "Mode set");
    }

    /// Set the manual duty cycle, saturating at ±100
    pub fn set_duty(&self, duty: f64) {
        self.state.lock().duty = duty::clamp(duty);
    }

    /// Set the target temperature; negative targets become 0
    pub fn set_setpoint(&self, setpoint: f64) -> Result<()> {
        let setpoint = validate_finite("setpoint", setpoint)?;
        self.state.lock().setpoint = setpoint.max(0.0);
        Ok(())
    }

    pub fn set_scale(&self, scale: TempScale) {
        self.state.lock().scale = scale;
    }

    pub fn set_gains(&self, channel: Channel, gains: PidGains) -> Result<()> {
        validate_gains(&gains)?;
        let mut state = self.state.lock();
        let settings = state.channel_mut(channel);
        settings.proportional = gains.proportional;
        settings.integral = gains.integral;
        settings.derivative = gains.derivative;
        Ok(())
    }

    pub fn set_cycle_time(&self, channel: Channel, seconds: f64) -> Result<()> {
        let seconds = validate_non_negative("cycle_time", seconds)?;
        self.state.lock().channel_mut(channel).cycle_time = seconds;
        Ok(())
    }

    /// Minutes between cooler state changes
    pub fn set_cool_delay(&self, minutes: f64) -> Result<()> {
        let minutes = validate_non_negative("delay", minutes)?;
        self.state.lock().cool.delay = minutes;
        Ok(())
    }

    pub fn set_manual_cycle(&self, seconds: f64) -> Result<()> {
        let seconds = validate_non_negative("manual_cycle", seconds)?;
        self.state.lock().manual_cycle = seconds;
        Ok(())
    }

    // ========================================================================
    // Output wiring
    // ========================================================================

    /// Point the heater at a new pin, creating the actuator if needed
    pub fn set_heat_pin(&self, pin: &str) -> Result<()> {
        let pin = validate_pin(pin)?;
        let cycle = self.state.lock().heat.cycle_time;

        if let Some(actuator) = self.actuator() {
            if let Some(heater) = actuator.heater() {
                heater.disable();
            }
            actuator.attach_heater(&pin, cycle)?;
        } else {
            self.ensure_actuator(&pin, cycle)?;
        }

        self.state.lock().heat.gpio = Some(pin.clone());
        info!(controller = %self.name, pin = %pin, "Heat output set");
        Ok(())
    }

    /// Point the cooler at a new pin, or remove it with `None`
    pub fn set_cool_pin(&self, pin: Option<&str>) -> Result<()> {
        let pin = normalize_optional_pin(pin)?;
        let (cycle, delay) = {
            let state = self.state.lock();
            (state.cool.cycle_time, state.cool.delay)
        };

        if let Some(actuator) = self.actuator() {
            if let Some(cooler) = actuator.cooler() {
                cooler.disable();
            }
            match pin.as_deref() {
                Some(p) => actuator.configure_cooler(p, cycle, delay)?,
                None => actuator.detach_cooler(),
            }
        }

        self.state.lock().cool.gpio = pin.clone();
        info!(controller = %self.name, pin = ?pin, "Cool output set");
        Ok(())
    }

    /// Wire new cooling settings once the actuator exposes a cooler
    ///
    /// Polls for the cooler up to the retry budget (10 × 100ms by default)
    /// and fails with `HardwareUnavailable`, changing nothing, if it never
    /// appears.
    pub fn configure_cooling(&self, config: CoolingConfig) -> Result<()> {
        let pin = validate_pin(&config.pin)?;
        let cycle_time = validate_non_negative("cycle_time", config.cycle_time)?;
        let delay = validate_non_negative("delay", config.delay)?;
        validate_gains(&config.gains)?;

        let actuator = self.wait_for_cooler().ok_or_else(|| {
            warn!(controller = %self.name, "Cooler never appeared, cooling not configured");
            BrewloopError::HardwareUnavailable(format!("{}: no cooling output", self.name))
        })?;

        actuator.configure_cooler(&pin, cycle_time, delay)?;

        {
            let mut state = self.state.lock();
            state.cool = ChannelSettings {
                cycle_time,
                proportional: config.gains.proportional,
                integral: config.gains.integral,
                derivative: config.gains.derivative,
                delay,
                gpio: Some(pin.clone()),
            };
        }

        info!(controller = %self.name, pin = %pin, cycle_time, delay, "Cooling configured");
        Ok(())
    }

    fn wait_for_cooler(&self) -> Option<Arc<dyn OutputActuator>> {
        for attempt in 0..=self.cooler_retry_attempts {
            if let Some(actuator) = self.actuator() {
                if actuator.cooler().is_some() {
                    return Some(actuator);
                }
            }
            if attempt < self.cooler_retry_attempts {
                thread::sleep(self.cooler_retry_interval);
            }
        }
        None
    }

    /// Record the auxiliary pin; it is opened now if outputs are already attached
    pub fn set_aux_pin(&self, pin: Option<&str>, invert: bool) -> Result<()> {
        let pin = normalize_optional_pin(pin)?;

        {
            let mut state = self.state.lock();
            state.aux_pin = pin.clone();
            state.invert_aux = invert;
        }

        let old = self.aux.lock().take();
        if let Some(mut old) = old {
            if let Err(e) = old.output.close() {
                warn!(controller = %self.name, "Failed to close aux output: {}", e);
            }
        }

        if let (Some(pin), Some(_)) = (pin.as_deref(), self.actuator()) {
            self.open_aux(pin, invert)?;
        }
        Ok(())
    }

    /// Flip the auxiliary output and return its new logical state
    pub fn toggle_auxiliary(&self) -> Result<bool> {
        let mut guard = self.aux.lock();
        let Some(aux) = guard.as_mut() else {
            info!(controller = %self.name, "Aux pin is not set");
            return Err(BrewloopError::OutputNotConfigured(format!(
                "{}: no auxiliary output",
                self.name
            )));
        };

        let on = !aux.is_on()?;
        aux.set_on(on)?;
        info!(controller = %self.name, on, "Aux output toggled");
        Ok(on)
    }

    pub fn has_auxiliary(&self) -> bool {
        self.aux.lock().is_some()
    }

    fn ensure_actuator(&self, heat_pin: &str, heat_cycle: f64) -> Result<Arc<dyn OutputActuator>> {
        let mut slot = self.actuator.write();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let actuator = self
            .deps
            .outputs
            .create_actuator(&self.name, heat_pin, heat_cycle)?;
        *slot = Some(Arc::clone(&actuator));
        Ok(actuator)
    }

    fn open_aux(&self, pin: &str, invert: bool) -> Result<()> {
        let mut slot = self.aux.lock();
        if slot.is_some() {
            return Ok(());
        }
        let mut handle = AuxHandle {
            output: self.deps.outputs.open_aux(pin)?,
            invert,
        };
        handle.set_on(false)?;
        *slot = Some(handle);
        debug!(controller = %self.name, pin = %pin, invert, "Aux output opened");
        Ok(())
    }

    // ========================================================================
    // Reporting and persistence
    // ========================================================================

    /// Point-in-time view for the presentation layer
    pub fn status_snapshot(&self) -> ControllerStatus {
        let snapshot = {
            let state = self.state.lock();
            ControllerStatus {
                name: self.name.clone(),
                mode: state.mode,
                duty: state.duty,
                actual_duty: (state.mode == Mode::Auto).then_some(state.calculated_duty),
                setpoint: state.setpoint,
                manual_cycle: state.manual_cycle,
                scale: state.scale,
                heat: channel_status(&state.heat, false),
                cool: channel_status(&state.cool, true),
                hysteresis: HysteresisStatus {
                    min: state.thresholds.min,
                    max: state.thresholds.max,
                    time: state.thresholds.min_time,
                },
                temp_c: state.last_reading.map(|r| r.celsius),
                temp_f: state.last_reading.map(|r| r.fahrenheit),
                aux_status: None,
                status: String::new(),
            }
        };

        let status = match self.actuator() {
            Some(actuator) => actuator.status(),
            None => format!(
                "No output on! Duty Cycle: {} - Temp: {}",
                snapshot.duty,
                snapshot
                    .temp_c
                    .map(|t| format!("{:.2}", t))
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        };

        let aux_status = self.aux.lock().as_ref().and_then(|aux| aux.is_on().ok());

        ControllerStatus {
            status,
            aux_status,
            ..snapshot
        }
    }

    /// Settings in their saved form
    pub fn persisted(&self) -> PersistedController {
        let state = self.state.lock();
        PersistedController {
            name: self.name.clone(),
            probe: state.probe.clone(),
            scale: state.scale,
            mode: state.mode,
            setpoint: state.setpoint,
            duty: state.duty,
            manual_cycle: state.manual_cycle,
            heat: state.heat.clone(),
            cool: state.cool.clone(),
            hysteresis: state.thresholds,
            aux_gpio: state.aux_pin.clone(),
            invert_aux: state.invert_aux,
            updated_at: 0,
        }
    }

    fn persist(&self) {
        if let Err(e) = self.deps.store.save(&self.persisted()) {
            warn!(controller = %self.name, "Failed to save settings: {}", e);
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

fn apply_command(actuator: &dyn OutputActuator, command: &OutputCommand) {
    if let Some(duty) = command.duty {
        actuator.set_duty(duty);
    }
    if let (Some(cycle), Some(heater)) = (command.heat_cycle, actuator.heater()) {
        heater.set_cycle_time(cycle);
    }
    if let (Some(cycle), Some(cooler)) = (command.cool_cycle, actuator.cooler()) {
        cooler.set_cycle_time(cycle);
    }
    if command.wake {
        actuator.wake();
    }
}

fn channel_status(settings: &ChannelSettings, with_delay: bool) -> ChannelStatus {
    ChannelStatus {
        cycle: settings.cycle_time,
        p: settings.proportional,
        i: settings.integral,
        d: settings.derivative,
        gpio: settings.gpio.clone(),
        delay: with_delay.then_some(settings.delay),
    }
}

fn validate_gains(gains: &PidGains) -> Result<()> {
    validate_finite("proportional", gains.proportional)?;
    validate_finite("integral", gains.integral)?;
    validate_finite("derivative", gains.derivative)?;
    Ok(())
}
