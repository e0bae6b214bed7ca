//! Linux sysfs GPIO access
//!
//! Pins are exported through `<base>/export`, switched to output through
//! `gpioN/direction` and driven through `gpioN/value`. The base directory is
//! `/sys/class/gpio` in production and a temporary tree in tests.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::constants::paths;
use crate::data::resolve_pin_number;
use crate::error::{BrewloopError, Result};
use crate::hw::AuxOutput;

/// Handle on a sysfs GPIO class directory
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    base: PathBuf,
}

impl SysfsGpio {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Export `pin` if needed and configure it as an output
    pub fn open_output(&self, pin: &str) -> Result<GpioPin> {
        let number = resolve_pin_number(pin)?;
        let pin_dir = self.base.join(format!("gpio{}", number));

        if !pin_dir.exists() {
            write_attr(&self.base.join("export"), &number.to_string())?;
            debug!("Exported GPIO {} ({})", number, pin);
        }

        write_attr(&pin_dir.join("direction"), "out")?;

        Ok(GpioPin {
            id: pin.to_string(),
            number,
            dir: pin_dir,
            unexport: self.base.join("unexport"),
            closed: false,
        })
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(paths::GPIO_BASE)
    }
}

/// An exported output pin
#[derive(Debug)]
pub struct GpioPin {
    id: String,
    number: u32,
    dir: PathBuf,
    unexport: PathBuf,
    closed: bool,
}

impl GpioPin {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn set(&self, high: bool) -> Result<()> {
        write_attr(&self.dir.join("value"), if high { "1" } else { "0" })
    }

    pub fn get(&self) -> Result<bool> {
        let path = self.dir.join("value");
        let content = fs::read_to_string(&path).map_err(|e| BrewloopError::GpioRead {
            path: path.clone(),
            reason: format!("Failed to read: {}", e),
        })?;

        match content.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(BrewloopError::GpioRead {
                path,
                reason: format!("Unexpected value '{}'", other),
            }),
        }
    }

    /// Drive low and unexport
    pub fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.set(false)?;
        write_attr(&self.unexport, &self.number.to_string())
    }
}

impl Drop for GpioPin {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release GPIO {}: {}", self.id, e);
        }
    }
}

impl AuxOutput for GpioPin {
    fn pin(&self) -> &str {
        &self.id
    }

    fn level(&self) -> Result<bool> {
        self.get()
    }

    fn set_level(&mut self, high: bool) -> Result<()> {
        self.set(high)
    }

    fn close(&mut self) -> Result<()> {
        self.release()
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|e| BrewloopError::GpioWrite {
        path: path.to_path_buf(),
        reason: format!("Failed to write '{}': {}", value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake sysfs tree with `gpio<n>` already exported
    fn fake_sysfs(number: u32) -> TempDir {
        let dir = TempDir::new().unwrap();
        let pin_dir = dir.path().join(format!("gpio{}", number));
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "in").unwrap();
        fs::write(pin_dir.join("value"), "0").unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        dir
    }

    #[test]
    fn test_open_sets_direction() {
        let sysfs = fake_sysfs(60);
        let gpio = SysfsGpio::new(sysfs.path());
        let pin = gpio.open_output("GPIO1_28").unwrap();

        assert_eq!(pin.number(), 60);
        let direction = fs::read_to_string(sysfs.path().join("gpio60/direction")).unwrap();
        assert_eq!(direction, "out");
        // Already present, so nothing was exported
        assert_eq!(fs::read_to_string(sysfs.path().join("export")).unwrap(), "");
    }

    #[test]
    fn test_set_and_get() {
        let sysfs = fake_sysfs(17);
        let pin = SysfsGpio::new(sysfs.path()).open_output("GPIO_17").unwrap();

        pin.set(true).unwrap();
        assert!(pin.get().unwrap());
        pin.set(false).unwrap();
        assert!(!pin.get().unwrap());
    }

    #[test]
    fn test_release_drives_low_and_unexports() {
        let sysfs = fake_sysfs(17);
        let mut pin = SysfsGpio::new(sysfs.path()).open_output("17").unwrap();
        pin.set(true).unwrap();

        pin.release().unwrap();
        assert_eq!(fs::read_to_string(sysfs.path().join("gpio17/value")).unwrap(), "0");
        assert_eq!(fs::read_to_string(sysfs.path().join("unexport")).unwrap(), "17");
    }

    #[test]
    fn test_missing_pin_is_exported_then_fails() {
        let sysfs = fake_sysfs(17);
        let err = SysfsGpio::new(sysfs.path()).open_output("GPIO_4").unwrap_err();

        assert!(err.is_hardware());
        assert_eq!(fs::read_to_string(sysfs.path().join("export")).unwrap(), "4");
    }

    #[test]
    fn test_invalid_identifier() {
        let sysfs = fake_sysfs(17);
        let err = SysfsGpio::new(sysfs.path()).open_output("P9_12").unwrap_err();
        assert!(err.is_validation());
    }
}
