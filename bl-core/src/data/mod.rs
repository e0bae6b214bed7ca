//! Data types, validation, and persistence
//!
//! Contains the settings and status structures plus their on-disk form.

mod persistence;
mod types;
mod validation;

pub use persistence::{ControllerStore, JsonSettingsStore, PersistedController, SettingsStore};
#[cfg(test)]
pub use persistence::MockSettingsStore;
pub use types::{
    ChannelSettings, ChannelStatus, ControllerStatus, HysteresisStatus, HysteresisThresholds,
    Mode, TempScale, TemperatureReading,
};
pub use validation::{
    normalize_optional_pin, resolve_pin_number, validate_finite, validate_non_negative,
    validate_pin,
};
