//! DS18B20 1-Wire temperature probe
//!
//! The w1-therm driver exposes each probe as `<devices>/<id>/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line must end in `YES` (CRC check passed); `t=` is the
//! temperature in millidegrees Celsius.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::constants::{paths, temperature};
use crate::data::TemperatureReading;
use crate::error::{BrewloopError, Result};
use crate::hw::TemperatureSource;

/// Parse the contents of a `w1_slave` file into degrees Celsius
pub fn parse_w1_slave(content: &str) -> std::result::Result<f64, String> {
    let mut lines = content.lines();

    let crc_line = lines.next().ok_or("empty reading")?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(format!("CRC check failed: '{}'", crc_line.trim()));
    }

    let data_line = lines.next().ok_or("missing temperature line")?;
    let raw = data_line
        .split_once("t=")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| format!("no t= field in '{}'", data_line.trim()))?;

    let millidegrees: i64 = raw
        .parse()
        .map_err(|e| format!("failed to parse '{}': {}", raw, e))?;

    Ok(millidegrees as f64 / temperature::MILLIDEGREE_DIVISOR)
}

/// A DS18B20 probe on the 1-Wire bus
#[derive(Debug)]
pub struct W1Probe {
    name: String,
    path: PathBuf,
    last: Mutex<Option<TemperatureReading>>,
}

impl W1Probe {
    /// `device` is a 1-Wire id (`28-...`) or an absolute path to a `w1_slave` file
    pub fn new(name: impl Into<String>, device: &str) -> Self {
        Self::in_devices_dir(name, device, paths::W1_DEVICES)
    }

    pub fn in_devices_dir(name: impl Into<String>, device: &str, devices: impl AsRef<Path>) -> Self {
        let path = if Path::new(device).is_absolute() {
            PathBuf::from(device)
        } else {
            devices.as_ref().join(device).join("w1_slave")
        };

        Self {
            name: name.into(),
            path,
            last: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemperatureSource for W1Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<TemperatureReading> {
        let last = *self.last.lock();
        last.ok_or_else(|| BrewloopError::SensorRead {
            path: self.path.clone(),
            reason: "No reading taken yet".to_string(),
        })
    }

    fn refresh(&self) -> Result<TemperatureReading> {
        let content = fs::read_to_string(&self.path).map_err(|e| BrewloopError::SensorRead {
            path: self.path.clone(),
            reason: format!("Failed to read: {}", e),
        })?;

        let celsius = parse_w1_slave(&content).map_err(|reason| BrewloopError::SensorRead {
            path: self.path.clone(),
            reason,
        })?;

        let reading = TemperatureReading::from_celsius(celsius, Instant::now());
        debug!(probe = %self.name, celsius, "Probe refreshed");
        *self.last.lock() = Some(reading);
        Ok(reading)
    }
}
