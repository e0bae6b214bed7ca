//! Constants and configuration values for brewloop
//!
//! Centralizes the magic numbers, paths, and configuration defaults used by
//! the control engine and the hardware drivers.

use std::time::Duration;

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// System-wide configuration directory (used when running as root)
    pub const CONFIG_DIR: &str = "/etc/brewloop";

    /// Environment override for the configuration directory
    pub const CONFIG_DIR_ENV: &str = "BREWLOOP_CONFIG_DIR";

    /// Persisted controller settings
    pub const CONTROLLERS_FILE: &str = "controllers.json";

    /// Linux sysfs GPIO class directory
    pub const GPIO_BASE: &str = "/sys/class/gpio";

    /// 1-Wire bus device directory
    pub const W1_DEVICES: &str = "/sys/bus/w1/devices";

    /// Resolve the configuration directory
    ///
    /// Order: `BREWLOOP_CONFIG_DIR`, then `/etc/brewloop` for root, then the
    /// user's XDG config directory.
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            if !dir.trim().is_empty() {
                return PathBuf::from(dir);
            }
        }

        // SAFETY: geteuid is always safe - it just returns the effective user ID of the process.
        if unsafe { libc::geteuid() } == 0 {
            return PathBuf::from(CONFIG_DIR);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("brewloop")
    }
}

/// Duty cycle limits (signed percent: negative cools, positive heats)
pub mod duty {
    /// Full cooling
    pub const MIN: f64 = -100.0;

    /// Full heating
    pub const MAX: f64 = 100.0;

    /// Idle
    pub const OFF: f64 = 0.0;

    /// Clamp a requested duty into [-100, 100]
    ///
    /// NaN is treated as idle.
    #[inline]
    pub fn clamp(value: f64) -> f64 {
        if value.is_nan() {
            return OFF;
        }
        value.clamp(MIN, MAX)
    }
}

/// Temperature constants
pub mod temperature {
    /// 1-Wire readings are in millidegrees, divide by this to get Celsius
    pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;

    /// Convert Celsius to Fahrenheit
    #[inline]
    pub fn c_to_f(celsius: f64) -> f64 {
        celsius * 9.0 / 5.0 + 32.0
    }

    /// Convert Fahrenheit to Celsius
    #[inline]
    pub fn f_to_c(fahrenheit: f64) -> f64 {
        (fahrenheit - 32.0) * 5.0 / 9.0
    }
}

/// Control engine parameters
pub mod control {
    /// Number of readings kept in the smoothing window
    pub const SAMPLE_WINDOW_LEN: usize = 5;

    /// Anti-windup band: the scaled integral must stay strictly inside (LOW, HIGH)
    pub const INTEGRAL_BAND_LOW: f64 = 0.0;
    pub const INTEGRAL_BAND_HIGH: f64 = 100.0;

    /// Seconds per minute, used to turn dwell minutes into a cycle time
    pub const SECONDS_PER_MINUTE: f64 = 60.0;

    /// Prefix of the advisory message posted while a dwell time runs
    pub const DWELL_MESSAGE_PREFIX: &str = "Waiting for minimum";
}

/// Timing constants for the control loop and output wiring
pub mod timing {
    use super::*;

    /// Control loop poll period
    pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

    /// Interval between checks for a cooler sub-device to appear
    pub const COOLER_RETRY_INTERVAL: Duration = Duration::from_millis(100);

    /// Number of checks before cooler wiring is abandoned
    pub const COOLER_RETRY_ATTEMPTS: u32 = 10;

    /// Probe acquisition period (a DS18B20 conversion takes up to 750ms)
    pub const PROBE_REFRESH_INTERVAL: Duration = Duration::from_millis(1000);

    /// Shortest slice the output actuator will switch for
    pub const MIN_OUTPUT_SLICE: Duration = Duration::from_millis(50);
}
