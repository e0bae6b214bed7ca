//! Brewloop Core Library
//!
//! Temperature control engine for brewing and fermentation vessels.
//!
//! # Features
//!
//! - **PID Control**: Duty-cycle calculation with anti-windup and direction gating
//! - **Hysteresis Control**: On/off thermostat with minimum dwell time
//! - **Modes**: Off, manual, automatic (PID), and hysteresis per controller
//! - **Hardware**: sysfs GPIO outputs and DS18B20 1-Wire probes
//! - **Configuration**: Persistent per-controller settings in JSON
//!
//! # Module Structure
//!
//! - `data/` - Data types, validation, persistence
//! - `engine/` - Sample window, PID, hysteresis, mode state machine
//! - `hw/` - Hardware traits and sysfs drivers
//! - `controller` - One controller: settings, engine, outputs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bl_core::{Controller, ControllerDeps, JsonSettingsStore, SharedMessageBoard};
//! # fn outputs() -> Arc<dyn bl_core::OutputFactory> { unimplemented!() }
//!
//! let deps = ControllerDeps {
//!     outputs: outputs(),
//!     store: Arc::new(JsonSettingsStore::default_location()),
//!     messages: Arc::new(SharedMessageBoard::new()),
//! };
//! let controller = Controller::new("fermenter", deps);
//! controller.set_hysteresis(64.0, 68.0, 5.0).unwrap();
//! controller.use_hysteresis();
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod controller;
pub mod error;
pub mod messages;

#[cfg(test)]
pub mod test_utils;

// Re-export primary types from data/
pub use data::{
    ChannelSettings, ChannelStatus, ControllerStatus, HysteresisStatus, HysteresisThresholds,
    Mode, TempScale, TemperatureReading,
};

// Re-export validation functions from data/
pub use data::{
    normalize_optional_pin, resolve_pin_number, validate_finite, validate_non_negative,
    validate_pin,
};

// Re-export persistence types from data/
pub use data::{ControllerStore, JsonSettingsStore, PersistedController, SettingsStore};

// Re-export error types
pub use error::{BrewloopError, Result};

// Re-export engine types
pub use engine::{
    ControlEngine, Decision, DwellTimer, HysteresisAction, HysteresisController, OutputChannels,
    OutputCommand, PidCalculator, PidGains, PidMemory, SampleWindow, TickInputs,
};

// Re-export hardware traits and drivers from hw/
pub use hw::{
    parse_w1_slave, share_probe, AuxOutput, GpioPin, OutputActuator, OutputDevice,
    OutputFactory, SharedProbe, SysfsGpio, TemperatureSource, W1Probe,
};

// Re-export controller types
pub use controller::{Channel, Controller, ControllerDeps, CoolingConfig, SettingsUpdate};

// Re-export message board
pub use messages::{MessageBoard, SharedMessageBoard};
