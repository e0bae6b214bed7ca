//! Time-Proportioned GPIO Outputs
//!
//! `GpioOutputControl` turns the signed duty a controller pushes into on/off
//! switching of real pins. Each cycle a positive duty holds the heater on for
//! `duty% x heat cycle`; a negative duty holds the cooler on for
//! `|duty|% x cool cycle`. The rest of the cycle the output is off.
//!
//! # Safety Features
//! - **Compressor protection**: the cooler never changes state more often
//!   than its configured delay (minutes)
//! - **Single direction**: the opposite output is always off before one is driven
//! - **Immediate wake**: `wake()` cuts the current cycle short so new settings apply at once
//! - **Release on shutdown**: pins are driven low and unexported

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use bl_core::constants::{control, duty, timing};
use bl_core::{
    AuxOutput, GpioPin, OutputActuator, OutputDevice, OutputFactory, Result, SysfsGpio,
};

/// Longest cycle we will schedule
const MAX_CYCLE_SECS: f64 = 24.0 * 3600.0;

// ============================================================================
// Output Device
// ============================================================================

/// A heater or cooler driven through one GPIO pin
#[derive(Debug)]
pub struct GpioOutputDevice {
    id: String,
    pin: Mutex<Option<GpioPin>>,
    cycle_time: Mutex<f64>,
    on: AtomicBool,
}

impl GpioOutputDevice {
    /// Open `pin` as an output, starting low
    pub fn open(gpio: &SysfsGpio, pin: &str, cycle_time: f64) -> Result<Self> {
        let handle = gpio.open_output(pin)?;
        handle.set(false)?;

        Ok(Self {
            id: pin.to_string(),
            pin: Mutex::new(Some(handle)),
            cycle_time: Mutex::new(cycle_time),
            on: AtomicBool::new(false),
        })
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    /// Drive the pin; a disabled device ignores the request
    fn switch(&self, on: bool) {
        let guard = self.pin.lock();
        let Some(pin) = guard.as_ref() else {
            return;
        };

        match pin.set(on) {
            Ok(()) => {
                if self.on.swap(on, Ordering::SeqCst) != on {
                    debug!(pin = %self.id, on, "Output switched");
                }
            }
            Err(e) => warn!(pin = %self.id, "Failed to switch output: {}", e),
        }
    }

    /// Cycle length; an unset cycle falls back to the poll interval
    fn cycle(&self) -> Duration {
        let seconds = *self.cycle_time.lock();
        if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds.min(MAX_CYCLE_SECS))
        } else {
            timing::POLL_INTERVAL
        }
    }
}

impl OutputDevice for GpioOutputDevice {
    fn pin(&self) -> &str {
        &self.id
    }

    fn cycle_time(&self) -> f64 {
        *self.cycle_time.lock()
    }

    fn set_cycle_time(&self, seconds: f64) {
        *self.cycle_time.lock() = seconds;
    }

    fn disable(&self) {
        let pin = self.pin.lock().take();
        if let Some(mut pin) = pin {
            if let Err(e) = pin.release() {
                warn!(pin = %self.id, "Failed to release output: {}", e);
            }
            self.on.store(false, Ordering::SeqCst);
            info!(pin = %self.id, "Output disabled");
        }
    }
}

// ============================================================================
// Output Control
// ============================================================================

/// Time-proportioned heat/cool driver for one controller
#[derive(Debug)]
pub struct GpioOutputControl {
    name: String,
    gpio: SysfsGpio,
    duty: Mutex<f64>,
    heater: RwLock<Option<Arc<GpioOutputDevice>>>,
    cooler: RwLock<Option<Arc<GpioOutputDevice>>>,
    /// Minimum minutes between cooler state changes
    cool_delay: Mutex<f64>,
    cooler_changed_at: Mutex<Option<Instant>>,
    running: AtomicBool,
    wake: Notify,
}

impl GpioOutputControl {
    pub fn new(name: impl Into<String>, gpio: SysfsGpio) -> Self {
        Self {
            name: name.into(),
            gpio,
            duty: Mutex::new(duty::OFF),
            heater: RwLock::new(None),
            cooler: RwLock::new(None),
            cool_delay: Mutex::new(0.0),
            cooler_changed_at: Mutex::new(None),
            running: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drive the outputs until [`shutdown`](OutputActuator::shutdown)
    pub async fn run(self: Arc<Self>) {
        info!(controller = %self.name, "Output control starting");

        while self.is_running() {
            let duty = self.duty();
            let interrupted = if duty > duty::OFF {
                self.heat_cycle(duty).await
            } else if duty < duty::OFF {
                self.cool_cycle(-duty).await
            } else {
                self.idle_cycle().await
            };

            if interrupted {
                debug!(controller = %self.name, "Output cycle interrupted");
            }
        }

        self.switch_heater(false);
        self.force_cooler_off();
        info!(controller = %self.name, "Output control stopped");
    }

    async fn heat_cycle(&self, percent: f64) -> bool {
        // The heater waits until a delayed cooler is really off
        if !self.switch_cooler(false) {
            self.switch_heater(false);
            return self.pause(timing::POLL_INTERVAL).await;
        }

        let heater = self.heater.read().clone();
        let Some(heater) = heater else {
            return self.pause(timing::POLL_INTERVAL).await;
        };

        let (on_time, off_time) = split_cycle(heater.cycle(), percent);
        if !on_time.is_zero() {
            heater.switch(true);
            if self.pause(on_time).await {
                return true;
            }
        }
        if !off_time.is_zero() {
            heater.switch(false);
            return self.pause(off_time).await;
        }
        false
    }

    async fn cool_cycle(&self, percent: f64) -> bool {
        self.switch_heater(false);

        let cooler = self.cooler.read().clone();
        let Some(cooler) = cooler else {
            return self.pause(timing::POLL_INTERVAL).await;
        };

        let cycle = cooler.cycle();
        let (on_time, off_time) = split_cycle(cycle, percent);
        if !on_time.is_zero() {
            if !self.switch_cooler(true) {
                return self.pause(cycle).await;
            }
            if self.pause(on_time).await {
                return true;
            }
        }
        if !off_time.is_zero() {
            self.switch_cooler(false);
            return self.pause(off_time).await;
        }
        false
    }

    async fn idle_cycle(&self) -> bool {
        self.switch_heater(false);
        self.switch_cooler(false);
        self.pause(timing::POLL_INTERVAL).await
    }

    /// Sleep for `duration`; true if woken early
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.wake.notified() => true,
        }
    }

    fn switch_heater(&self, on: bool) {
        if let Some(heater) = self.heater.read().as_ref() {
            heater.switch(on);
        }
    }

    /// Switch the cooler if its delay allows; true when it is in the requested state
    fn switch_cooler(&self, on: bool) -> bool {
        let Some(cooler) = self.cooler.read().clone() else {
            return !on;
        };
        if cooler.is_on() == on {
            return true;
        }

        let mut changed_at = self.cooler_changed_at.lock();
        let now = Instant::now();
        if !delay_elapsed(*changed_at, *self.cool_delay.lock(), now) {
            debug!(controller = %self.name, on, "Cooler delay active, not switching");
            return false;
        }

        cooler.switch(on);
        *changed_at = Some(now);
        cooler.is_on() == on
    }

    fn force_cooler_off(&self) {
        if let Some(cooler) = self.cooler.read().as_ref() {
            cooler.switch(false);
        }
    }

    fn replace_device(
        &self,
        slot: &RwLock<Option<Arc<GpioOutputDevice>>>,
        pin: &str,
        cycle_time: f64,
    ) -> Result<()> {
        // The old pin may be the same GPIO; release it before reopening
        let old = slot.write().take();
        if let Some(old) = old {
            old.disable();
        }

        let device = GpioOutputDevice::open(&self.gpio, pin, cycle_time)?;
        *slot.write() = Some(Arc::new(device));
        Ok(())
    }
}

impl OutputActuator for GpioOutputControl {
    fn set_duty(&self, value: f64) {
        let value = duty::clamp(value);
        let previous = std::mem::replace(&mut *self.duty.lock(), value);
        // An idle actuator starts its first cycle as soon as there is work
        if previous == duty::OFF && value != duty::OFF {
            self.wake.notify_one();
        }
    }

    fn duty(&self) -> f64 {
        *self.duty.lock()
    }

    fn heater(&self) -> Option<Arc<dyn OutputDevice>> {
        self.heater
            .read()
            .clone()
            .map(|d| d as Arc<dyn OutputDevice>)
    }

    fn cooler(&self) -> Option<Arc<dyn OutputDevice>> {
        self.cooler
            .read()
            .clone()
            .map(|d| d as Arc<dyn OutputDevice>)
    }

    fn attach_heater(&self, pin: &str, cycle_time: f64) -> Result<()> {
        self.replace_device(&self.heater, pin, cycle_time)?;
        info!(controller = %self.name, pin = %pin, cycle_time, "Heater attached");
        Ok(())
    }

    fn configure_cooler(&self, pin: &str, cycle_time: f64, delay: f64) -> Result<()> {
        self.replace_device(&self.cooler, pin, cycle_time)?;
        *self.cool_delay.lock() = delay;
        *self.cooler_changed_at.lock() = None;
        info!(controller = %self.name, pin = %pin, cycle_time, delay, "Cooler configured");
        Ok(())
    }

    fn detach_cooler(&self) {
        let cooler = self.cooler.write().take();
        if let Some(cooler) = cooler {
            cooler.disable();
            info!(controller = %self.name, "Cooler detached");
        }
    }

    fn status(&self) -> String {
        let duty = self.duty();
        let state = if duty > duty::OFF {
            "Heating"
        } else if duty < duty::OFF {
            "Cooling"
        } else {
            "Off"
        };
        format!("{}: {:.0}%", state, duty.abs())
    }

    fn wake(&self) {
        self.wake.notify_one();
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();

        let heater = self.heater.write().take();
        let cooler = self.cooler.write().take();
        for device in heater.into_iter().chain(cooler) {
            device.disable();
        }
        info!(controller = %self.name, "Output control shut down");
    }
}

/// Split a cycle into on and off time; slivers shorter than the minimum slice are dropped
fn split_cycle(cycle: Duration, percent: f64) -> (Duration, Duration) {
    let fraction = (percent / duty::MAX).clamp(0.0, 1.0);
    let on_time = cycle.mul_f64(fraction);

    if on_time < timing::MIN_OUTPUT_SLICE {
        (Duration::ZERO, cycle)
    } else if cycle.saturating_sub(on_time) < timing::MIN_OUTPUT_SLICE {
        (cycle, Duration::ZERO)
    } else {
        (on_time, cycle.saturating_sub(on_time))
    }
}

/// Whether `delay_minutes` have passed since the last change at `last`
fn delay_elapsed(last: Option<Instant>, delay_minutes: f64, now: Instant) -> bool {
    let Some(last) = last else {
        return true;
    };
    let elapsed_minutes =
        now.saturating_duration_since(last).as_secs_f64() / control::SECONDS_PER_MINUTE;
    elapsed_minutes >= delay_minutes
}

// ============================================================================
// Factory
// ============================================================================

/// Creates sysfs-backed actuators and aux pins
///
/// Actuator tasks are spawned on `runtime`, so actuators can be created from
/// any thread.
#[derive(Debug, Clone)]
pub struct GpioOutputFactory {
    gpio: SysfsGpio,
    runtime: Handle,
}

impl GpioOutputFactory {
    pub fn new(gpio: SysfsGpio, runtime: Handle) -> Self {
        Self { gpio, runtime }
    }
}

impl OutputFactory for GpioOutputFactory {
    fn create_actuator(
        &self,
        controller: &str,
        heat_pin: &str,
        heat_cycle: f64,
    ) -> Result<Arc<dyn OutputActuator>> {
        let control = Arc::new(GpioOutputControl::new(controller, self.gpio.clone()));
        control.attach_heater(heat_pin, heat_cycle)?;
        self.runtime.spawn(Arc::clone(&control).run());
        Ok(control)
    }

    fn open_aux(&self, pin: &str) -> Result<Box<dyn AuxOutput>> {
        Ok(Box::new(self.gpio.open_output(pin)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Fake sysfs tree with the given pins already exported
    fn fake_sysfs(numbers: &[u32]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for number in numbers {
            let pin_dir = dir.path().join(format!("gpio{}", number));
            fs::create_dir(&pin_dir).unwrap();
            fs::write(pin_dir.join("direction"), "in").unwrap();
            fs::write(pin_dir.join("value"), "1").unwrap();
        }
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        dir
    }

    fn value(sysfs: &Path, number: u32) -> String {
        fs::read_to_string(sysfs.join(format!("gpio{}/value", number))).unwrap()
    }

    #[test]
    fn test_status_reports_direction() {
        let control = GpioOutputControl::new("kettle", SysfsGpio::new("/nonexistent"));

        control.set_duty(40.0);
        assert_eq!(control.status(), "Heating: 40%");
        control.set_duty(-25.0);
        assert_eq!(control.status(), "Cooling: 25%");
        control.set_duty(0.0);
        assert_eq!(control.status(), "Off: 0%");

        control.set_duty(150.0);
        assert_eq!(control.duty(), 100.0);
    }

    #[test]
    fn test_attach_heater_opens_pin_low() {
        let sysfs = fake_sysfs(&[17]);
        let control = GpioOutputControl::new("kettle", SysfsGpio::new(sysfs.path()));

        control.attach_heater("GPIO_17", 10.0).unwrap();

        let heater = control.heater().unwrap();
        assert_eq!(heater.pin(), "GPIO_17");
        assert_eq!(heater.cycle_time(), 10.0);
        assert_eq!(value(sysfs.path(), 17), "0");
    }

    #[test]
    fn test_detach_cooler_releases_pin() {
        let sysfs = fake_sysfs(&[17, 27]);
        let control = GpioOutputControl::new("fermenter", SysfsGpio::new(sysfs.path()));
        control.configure_cooler("GPIO_27", 600.0, 5.0).unwrap();
        assert!(control.cooler().is_some());

        control.detach_cooler();

        assert!(control.cooler().is_none());
        assert_eq!(fs::read_to_string(sysfs.path().join("unexport")).unwrap(), "27");
    }

    #[test]
    fn test_attach_failure_is_reported() {
        let sysfs = fake_sysfs(&[]);
        let control = GpioOutputControl::new("hlt", SysfsGpio::new(sysfs.path()));

        let err = control.attach_heater("GPIO_5", 10.0).unwrap_err();
        assert!(err.is_hardware());
        assert!(control.heater().is_none());
    }

    #[test]
    fn test_split_cycle() {
        let cycle = Duration::from_secs(10);

        assert_eq!(
            split_cycle(cycle, 40.0),
            (Duration::from_secs(4), Duration::from_secs(6))
        );
        assert_eq!(split_cycle(cycle, 100.0), (cycle, Duration::ZERO));
        // 10ms slivers are not worth switching for
        assert_eq!(split_cycle(cycle, 0.1), (Duration::ZERO, cycle));
        assert_eq!(split_cycle(cycle, 99.9), (cycle, Duration::ZERO));
    }

    #[test]
    fn test_cooler_delay() {
        let start = Instant::now();

        assert!(delay_elapsed(None, 5.0, start));
        assert!(!delay_elapsed(Some(start), 5.0, start + Duration::from_secs(60)));
        assert!(delay_elapsed(Some(start), 5.0, start + Duration::from_secs(300)));
        assert!(delay_elapsed(Some(start), 0.0, start));
    }

    #[test]
    fn test_cooler_switch_honours_delay() {
        let sysfs = fake_sysfs(&[27]);
        let control = GpioOutputControl::new("fermenter", SysfsGpio::new(sysfs.path()));
        control.configure_cooler("GPIO_27", 600.0, 5.0).unwrap();

        // First change is never delayed
        assert!(control.switch_cooler(true));
        assert_eq!(value(sysfs.path(), 27), "1");

        // Turning it back off within five minutes is refused
        assert!(!control.switch_cooler(false));
        assert_eq!(value(sysfs.path(), 27), "1");
    }

    #[tokio::test]
    async fn test_run_drives_heater_at_full_duty() {
        let sysfs = fake_sysfs(&[17]);
        let control = Arc::new(GpioOutputControl::new("kettle", SysfsGpio::new(sysfs.path())));
        control.attach_heater("GPIO_17", 1.0).unwrap();
        control.set_duty(100.0);

        let task = tokio::spawn(Arc::clone(&control).run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(value(sysfs.path(), 17), "1");

        control.shutdown();
        task.await.unwrap();
        assert!(!control.is_running());
        assert_eq!(value(sysfs.path(), 17), "0");
        assert!(control.heater().is_none());
    }

    #[tokio::test]
    async fn test_heater_waits_for_delayed_cooler() {
        let sysfs = fake_sysfs(&[17, 27]);
        let control = Arc::new(GpioOutputControl::new("fermenter", SysfsGpio::new(sysfs.path())));
        control.attach_heater("GPIO_17", 1.0).unwrap();
        control.configure_cooler("GPIO_27", 600.0, 5.0).unwrap();
        assert!(control.switch_cooler(true));

        control.set_duty(100.0);
        let task = tokio::spawn(Arc::clone(&control).run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Cooler is held on by its delay, so the heater must not be driven
        assert_eq!(value(sysfs.path(), 27), "1");
        assert_eq!(value(sysfs.path(), 17), "0");

        control.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_starts_actuator() {
        let sysfs = fake_sysfs(&[17, 22]);
        let factory = GpioOutputFactory::new(SysfsGpio::new(sysfs.path()), Handle::current());

        let actuator = factory.create_actuator("kettle", "GPIO_17", 5.0).unwrap();
        assert_eq!(actuator.heater().unwrap().pin(), "GPIO_17");

        let mut aux = factory.open_aux("GPIO_22").unwrap();
        aux.set_level(true).unwrap();
        assert!(aux.level().unwrap());

        actuator.shutdown();
        aux.close().unwrap();
    }
}
