//! Hardware interaction modules
//!
//! The controller talks to hardware only through the traits defined here:
//!
//! - [`TemperatureSource`] - a probe with a cached latest reading
//! - [`OutputActuator`] - the time-proportioned heat/cool driver, running
//!   concurrently with the control loop
//! - [`OutputDevice`] - one heater or cooler owned by the actuator
//! - [`AuxOutput`] - a plain on/off pin
//! - [`OutputFactory`] - creates actuators and aux pins from pin identifiers
//!
//! The sysfs implementations (`GpioPin`, `W1Probe`) live in this module; the
//! actuator implementation lives in the daemon.

mod gpio;
mod probe;

use std::sync::Arc;

use crate::data::TemperatureReading;
use crate::error::Result;

pub use gpio::{GpioPin, SysfsGpio};
pub use probe::{parse_w1_slave, W1Probe};

/// A temperature probe
///
/// `refresh` may block on slow hardware. Implementations only lock their
/// cached reading to store the result, so `read` never waits for a refresh.
pub trait TemperatureSource: Send + Sync {
    /// Probe name used in logs
    fn name(&self) -> &str;

    /// Latest cached reading
    fn read(&self) -> Result<TemperatureReading>;

    /// Take a fresh reading from the hardware and cache it
    fn refresh(&self) -> Result<TemperatureReading>;
}

/// A probe shared between the acquisition task and the control loops
pub type SharedProbe = Arc<dyn TemperatureSource>;

/// Wrap a probe for sharing
pub fn share_probe(probe: impl TemperatureSource + 'static) -> SharedProbe {
    Arc::new(probe)
}

/// One switched output (heater or cooler) owned by an actuator
pub trait OutputDevice: Send + Sync {
    fn pin(&self) -> &str;

    /// Seconds per duty window
    fn cycle_time(&self) -> f64;

    fn set_cycle_time(&self, seconds: f64);

    /// Drive the output off and stop using it
    fn disable(&self);
}

/// Time-proportioned heat/cool driver
///
/// The controller pushes a duty and never waits for it to be applied.
pub trait OutputActuator: Send + Sync {
    /// Signed duty: positive heats, negative cools
    fn set_duty(&self, duty: f64);

    fn duty(&self) -> f64;

    fn heater(&self) -> Option<Arc<dyn OutputDevice>>;

    fn cooler(&self) -> Option<Arc<dyn OutputDevice>>;

    /// Replace the heater
    fn attach_heater(&self, pin: &str, cycle_time: f64) -> Result<()>;

    /// Replace the cooler; `delay` is the minimum minutes between cooler state changes
    fn configure_cooler(&self, pin: &str, cycle_time: f64, delay: f64) -> Result<()>;

    fn detach_cooler(&self);

    /// Human-readable state, e.g. "Heating: 40%"
    fn status(&self) -> String;

    /// Interrupt the current duty window so new settings apply at once
    fn wake(&self);

    /// Turn everything off and release the pins
    fn shutdown(&self);
}

/// Binary auxiliary output
pub trait AuxOutput: Send {
    fn pin(&self) -> &str;

    /// Current signal level
    fn level(&self) -> Result<bool>;

    fn set_level(&mut self, high: bool) -> Result<()>;

    /// Release the pin
    fn close(&mut self) -> Result<()>;
}

/// Creates hardware outputs for a controller
pub trait OutputFactory: Send + Sync {
    /// Create and start an actuator driving `heat_pin`
    fn create_actuator(
        &self,
        controller: &str,
        heat_pin: &str,
        heat_cycle: f64,
    ) -> Result<Arc<dyn OutputActuator>>;

    /// Open an auxiliary output
    fn open_aux(&self, pin: &str) -> Result<Box<dyn AuxOutput>>;
}
