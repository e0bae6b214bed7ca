//! Input validation for brewloop
//!
//! Pin identifiers come from operators and config files; they are checked here
//! before anything touches sysfs.
//!
//! Two naming schemes are accepted:
//!
//! - **Bank form** `GPIO<bank>_<n>` (BeagleBone style), sysfs number `bank * 32 + n`
//! - **Direct form** `GPIO_<n>`, `GPIO<n>` or `<n>`, sysfs number `n`

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{BrewloopError, Result};

/// GPIO lines per bank in the bank naming scheme
const PINS_PER_BANK: u32 = 32;

fn bank_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^GPIO([0-9])_([0-9]+)$").ok()).as_ref()
}

fn direct_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:GPIO)?_?([0-9]+)$").ok()).as_ref()
}

/// Validates a pin identifier and returns it unchanged
pub fn validate_pin(pin: &str) -> Result<String> {
    resolve_pin_number(pin).map(|_| pin.to_string())
}

/// Resolves a pin identifier to its sysfs GPIO number
pub fn resolve_pin_number(pin: &str) -> Result<u32> {
    let invalid = || BrewloopError::InvalidPin(pin.to_string());

    if let Some(caps) = bank_pattern().and_then(|re| re.captures(pin)) {
        let bank: u32 = caps[1].parse().map_err(|_| invalid())?;
        let line: u32 = caps[2].parse().map_err(|_| invalid())?;
        return bank
            .checked_mul(PINS_PER_BANK)
            .and_then(|base| base.checked_add(line))
            .ok_or_else(invalid);
    }

    if let Some(caps) = direct_pattern().and_then(|re| re.captures(pin)) {
        return caps[1].parse().map_err(|_| invalid());
    }

    Err(invalid())
}

/// Validates an optional pin; empty strings count as "not configured"
pub fn normalize_optional_pin(pin: Option<&str>) -> Result<Option<String>> {
    match pin.map(str::trim) {
        None | Some("") => Ok(None),
        Some(p) => validate_pin(p).map(Some),
    }
}

/// Validates that a setting is a finite number
pub fn validate_finite(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(BrewloopError::invalid_config(field, "must be a finite number"));
    }
    Ok(value)
}

/// Validates that a setting is a finite, non-negative number
pub fn validate_non_negative(field: &str, value: f64) -> Result<f64> {
    let value = validate_finite(field, value)?;
    if value < 0.0 {
        return Err(BrewloopError::invalid_config(field, "must not be negative"));
    }
    Ok(value)
}
