//! Core data types for brewloop
//!
//! Defines the settings, readings, and status structures shared by the engine,
//! the persistence layer, and the daemon.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::constants::temperature;
use crate::error::{BrewloopError, Result};

/// Operating mode of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Off,
    Manual,
    Auto,
    #[serde(alias = "hysteria")]
    Hysteresis,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Manual => "manual",
            Mode::Auto => "auto",
            Mode::Hysteresis => "hysteresis",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = BrewloopError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Mode::Off),
            "manual" => Ok(Mode::Manual),
            "auto" => Ok(Mode::Auto),
            "hysteresis" | "hysteria" => Ok(Mode::Hysteresis),
            other => Err(BrewloopError::invalid_config(
                "mode",
                format!("unknown mode {:?}", other),
            )),
        }
    }
}

/// Scale the controller regulates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempScale {
    Celsius,
    #[default]
    Fahrenheit,
}

/// Settings for one output channel (heat or cool)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Seconds per duty cycle window
    #[serde(default)]
    pub cycle_time: f64,
    #[serde(default)]
    pub proportional: f64,
    #[serde(default)]
    pub integral: f64,
    #[serde(default)]
    pub derivative: f64,
    /// Minutes between output state changes (cooling compressor protection)
    #[serde(default)]
    pub delay: f64,
    /// GPIO identifier driving this channel
    #[serde(default)]
    pub gpio: Option<String>,
}

/// Thresholds for hysteresis mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HysteresisThresholds {
    pub min: f64,
    pub max: f64,
    /// Minimum dwell time in minutes
    pub min_time: f64,
}

impl HysteresisThresholds {
    /// Build thresholds, rejecting max <= 0, max <= min, or a negative dwell time
    pub fn new(min: f64, max: f64, min_time: f64) -> Result<Self> {
        let reject = |reason| BrewloopError::InvalidHysteresis {
            min,
            max,
            min_time,
            reason,
        };

        if !(min.is_finite() && max.is_finite() && min_time.is_finite()) {
            return Err(reject("values must be finite"));
        }
        if max <= 0.0 {
            return Err(reject("max must be positive"));
        }
        if max <= min {
            return Err(reject("max must exceed min"));
        }
        if min_time < 0.0 {
            return Err(reject("minimum time is negative"));
        }

        Ok(Self { min, max, min_time })
    }
}

/// One probe reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub celsius: f64,
    pub fahrenheit: f64,
    pub taken_at: Instant,
}

impl TemperatureReading {
    pub fn from_celsius(celsius: f64, taken_at: Instant) -> Self {
        Self {
            celsius,
            fahrenheit: temperature::c_to_f(celsius),
            taken_at,
        }
    }

    pub fn from_fahrenheit(fahrenheit: f64, taken_at: Instant) -> Self {
        Self {
            celsius: temperature::f_to_c(fahrenheit),
            fahrenheit,
            taken_at,
        }
    }

    pub fn in_scale(&self, scale: TempScale) -> f64 {
        match scale {
            TempScale::Celsius => self.celsius,
            TempScale::Fahrenheit => self.fahrenheit,
        }
    }
}

/// Heat/cool channel as reported in a status snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub cycle: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub gpio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
}

/// Hysteresis thresholds as reported in a status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HysteresisStatus {
    pub min: f64,
    pub max: f64,
    pub time: f64,
}

/// Point-in-time view of a controller for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub name: String,
    pub mode: Mode,
    pub duty: f64,
    /// Last PID output; only reported in auto mode
    #[serde(rename = "actualduty", skip_serializing_if = "Option::is_none")]
    pub actual_duty: Option<f64>,
    pub setpoint: f64,
    #[serde(rename = "manualcycle")]
    pub manual_cycle: f64,
    pub scale: TempScale,
    pub heat: ChannelStatus,
    pub cool: ChannelStatus,
    pub hysteresis: HysteresisStatus,
    pub temp_c: Option<f64>,
    pub temp_f: Option<f64>,
    /// Logical auxiliary output state, only present when an aux pin is open
    #[serde(rename = "auxStatus", skip_serializing_if = "Option::is_none")]
    pub aux_status: Option<bool>,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("auto".parse::<Mode>().unwrap(), Mode::Auto);
        assert_eq!(" Manual ".parse::<Mode>().unwrap(), Mode::Manual);
        assert_eq!("hysteria".parse::<Mode>().unwrap(), Mode::Hysteresis);
        assert!("boil".parse::<Mode>().unwrap_err().is_validation());
    }

    #[test]
    fn test_mode_serde_alias() {
        let mode: Mode = serde_json::from_str("\"hysteria\"").unwrap();
        assert_eq!(mode, Mode::Hysteresis);
        assert_eq!(serde_json::to_string(&Mode::Auto).unwrap(), "\"auto\"");
    }

    #[test]
    fn test_hysteresis_thresholds_validation() {
        assert!(HysteresisThresholds::new(60.0, 70.0, 1.0).is_ok());
        assert!(HysteresisThresholds::new(70.0, 65.0, 1.0).is_err());
        assert!(HysteresisThresholds::new(65.0, 65.0, 1.0).is_err());
        assert!(HysteresisThresholds::new(-10.0, 0.0, 1.0).is_err());
        assert!(HysteresisThresholds::new(60.0, 70.0, -1.0).is_err());
        assert!(HysteresisThresholds::new(60.0, 70.0, 0.0).is_ok());
    }

    #[test]
    fn test_reading_scales() {
        let reading = TemperatureReading::from_celsius(20.0, Instant::now());
        assert!((reading.in_scale(TempScale::Fahrenheit) - 68.0).abs() < 1e-9);
        assert!((reading.in_scale(TempScale::Celsius) - 20.0).abs() < 1e-9);
    }
}
