//! Unified error handling for brewloop
//!
//! This crate provides a single error type used across all brewloop components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using BrewloopError
pub type Result<T> = std::result::Result<T, BrewloopError>;

/// Unified error type for all brewloop operations
#[derive(thiserror::Error, Debug)]
pub enum BrewloopError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Failed to read temperature from {path}: {reason}")]
    SensorRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to read GPIO {path}: {reason}")]
    GpioRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write GPIO {path}: {reason}")]
    GpioWrite {
        path: PathBuf,
        reason: String,
    },

    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Output not configured: {0}")]
    OutputNotConfigured(String),

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Invalid GPIO identifier: {0:?}")]
    InvalidPin(String),

    #[error("Invalid hysteresis thresholds (min {min}, max {max}, time {min_time}): {reason}")]
    InvalidHysteresis {
        min: f64,
        max: f64,
        min_time: f64,
        reason: &'static str,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl BrewloopError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create an invalid configuration value error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Rejections of caller input; state is left untouched when these are returned
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPin(_) | Self::InvalidHysteresis { .. } | Self::InvalidConfig { .. }
        )
    }

    /// Failures talking to GPIO, probes, or output devices
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::SensorRead { .. }
                | Self::GpioRead { .. }
                | Self::GpioWrite { .. }
                | Self::HardwareUnavailable(_)
        )
    }
}
