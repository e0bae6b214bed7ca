//! Test fakes for the hardware traits
//!
//! In-memory stand-ins for the output actuator, its devices, and aux pins.
//! Everything records what was asked of it so tests can assert on it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BrewloopError, Result};
use crate::hw::{AuxOutput, OutputActuator, OutputDevice, OutputFactory};
use crate::messages::SharedMessageBoard;
use crate::data::{PersistedController, SettingsStore};

#[derive(Debug)]
pub struct FakeDevice {
    pin: String,
    cycle: Mutex<f64>,
    disabled: AtomicBool,
}

impl FakeDevice {
    pub fn new(pin: &str, cycle: f64) -> Arc<Self> {
        Arc::new(Self {
            pin: pin.to_string(),
            cycle: Mutex::new(cycle),
            disabled: AtomicBool::new(false),
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

impl OutputDevice for FakeDevice {
    fn pin(&self) -> &str {
        &self.pin
    }

    fn cycle_time(&self) -> f64 {
        *self.cycle.lock()
    }

    fn set_cycle_time(&self, seconds: f64) {
        *self.cycle.lock() = seconds;
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct FakeActuator {
    duty: Mutex<f64>,
    heater: Mutex<Option<Arc<FakeDevice>>>,
    cooler: Mutex<Option<Arc<FakeDevice>>>,
    /// (pin, cycle, delay) of every configure_cooler call
    cooler_configs: Mutex<Vec<(String, f64, f64)>>,
    wakes: AtomicUsize,
    shut_down: AtomicBool,
}

impl FakeActuator {
    pub fn with_heater(pin: &str, cycle: f64) -> Arc<Self> {
        let actuator = Self::default();
        *actuator.heater.lock() = Some(FakeDevice::new(pin, cycle));
        Arc::new(actuator)
    }

    pub fn fake_heater(&self) -> Option<Arc<FakeDevice>> {
        self.heater.lock().clone()
    }

    pub fn fake_cooler(&self) -> Option<Arc<FakeDevice>> {
        self.cooler.lock().clone()
    }

    pub fn remove_heater(&self) {
        *self.heater.lock() = None;
    }

    pub fn cooler_configs(&self) -> Vec<(String, f64, f64)> {
        self.cooler_configs.lock().clone()
    }

    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl OutputActuator for FakeActuator {
    fn set_duty(&self, duty: f64) {
        *self.duty.lock() = duty;
    }

    fn duty(&self) -> f64 {
        *self.duty.lock()
    }

    fn heater(&self) -> Option<Arc<dyn OutputDevice>> {
        self.heater.lock().clone().map(|d| d as Arc<dyn OutputDevice>)
    }

    fn cooler(&self) -> Option<Arc<dyn OutputDevice>> {
        self.cooler.lock().clone().map(|d| d as Arc<dyn OutputDevice>)
    }

    fn attach_heater(&self, pin: &str, cycle_time: f64) -> Result<()> {
        *self.heater.lock() = Some(FakeDevice::new(pin, cycle_time));
        Ok(())
    }

    fn configure_cooler(&self, pin: &str, cycle_time: f64, delay: f64) -> Result<()> {
        self.cooler_configs
            .lock()
            .push((pin.to_string(), cycle_time, delay));
        *self.cooler.lock() = Some(FakeDevice::new(pin, cycle_time));
        Ok(())
    }

    fn detach_cooler(&self) {
        *self.cooler.lock() = None;
    }

    fn status(&self) -> String {
        format!("Fake: {}%", self.duty())
    }

    fn wake(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct FakeAux {
    pin: String,
    level: Arc<Mutex<bool>>,
    closed: Arc<AtomicBool>,
}

impl FakeAux {
    pub fn level_handle(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.level)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AuxOutput for FakeAux {
    fn pin(&self) -> &str {
        &self.pin
    }

    fn level(&self) -> Result<bool> {
        Ok(*self.level.lock())
    }

    fn set_level(&mut self, high: bool) -> Result<()> {
        *self.level.lock() = high;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out fakes; keeps a handle on everything it created
#[derive(Debug, Default)]
pub struct FakeFactory {
    pub actuators: Mutex<Vec<Arc<FakeActuator>>>,
    pub aux: Mutex<Vec<FakeAux>>,
    pub fail_aux: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_actuator(&self) -> Option<Arc<FakeActuator>> {
        self.actuators.lock().last().cloned()
    }

    pub fn last_aux(&self) -> Option<FakeAux> {
        self.aux.lock().last().cloned()
    }
}

impl OutputFactory for FakeFactory {
    fn create_actuator(
        &self,
        _controller: &str,
        heat_pin: &str,
        heat_cycle: f64,
    ) -> Result<Arc<dyn OutputActuator>> {
        let actuator = FakeActuator::with_heater(heat_pin, heat_cycle);
        self.actuators.lock().push(Arc::clone(&actuator));
        Ok(actuator)
    }

    fn open_aux(&self, pin: &str) -> Result<Box<dyn AuxOutput>> {
        if self.fail_aux.load(Ordering::SeqCst) {
            return Err(BrewloopError::GpioWrite {
                path: format!("/sys/class/gpio/{}", pin).into(),
                reason: "permission denied".to_string(),
            });
        }
        let aux = FakeAux {
            pin: pin.to_string(),
            level: Arc::new(Mutex::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.aux.lock().push(aux.clone());
        Ok(Box::new(aux))
    }
}

/// Settings store that keeps every save in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub saved: Mutex<Vec<PersistedController>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> Option<PersistedController> {
        self.saved.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.saved.lock().len()
    }
}

impl SettingsStore for MemoryStore {
    fn save(&self, controller: &PersistedController) -> Result<()> {
        self.saved.lock().push(controller.clone());
        Ok(())
    }
}

/// Fresh message board
pub fn message_board() -> Arc<SharedMessageBoard> {
    Arc::new(SharedMessageBoard::new())
}
