//! PID duty-cycle calculator
//!
//! Converts setpoint error into a signed duty cycle in [-100, 100].
//!
//! # How It Works
//!
//! 1. **Elapsed time**: the first call only seeds the timestamp. Whenever no
//!    time has passed since the previous computation the previous output is
//!    returned unchanged.
//!
//! 2. **Anti-windup**: the error is added to the integral accumulator only if
//!    the accumulator, scaled by the integral gain, stays strictly inside
//!    (0, 100). Otherwise the accumulator keeps its value for this tick.
//!
//! 3. **Direction gating**: a cooling output is never requested without a
//!    cooler, a heating output never without a heater.
//!
//! The accumulator is bounded by the band above, so floating point error
//! cannot compound without limit over long runs.

use std::time::Instant;

use tracing::debug;

use crate::constants::{control, duty};

/// Proportional, integral and derivative gains
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidGains {
    pub proportional: f64,
    pub integral: f64,
    pub derivative: f64,
}

impl PidGains {
    pub fn new(proportional: f64, integral: f64, derivative: f64) -> Self {
        Self {
            proportional,
            integral,
            derivative,
        }
    }
}

/// Which output directions currently have hardware behind them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputChannels {
    pub heat: bool,
    pub cool: bool,
}

impl OutputChannels {
    pub fn new(heat: bool, cool: bool) -> Self {
        Self { heat, cool }
    }

    pub fn any(&self) -> bool {
        self.heat || self.cool
    }
}

/// State carried between computations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidMemory {
    pub previous_error: f64,
    pub total_error: f64,
    pub previous_time: Option<Instant>,
}

/// PID calculator with a range-bounded integral accumulator
#[derive(Debug, Clone, Default)]
pub struct PidCalculator {
    memory: PidMemory,
    last_output: f64,
}

impl PidCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the duty cycle for one tick
    ///
    /// Returns the previous output when `now` is not later than the previous
    /// computation (including the very first call).
    pub fn compute(
        &mut self,
        gains: &PidGains,
        setpoint: f64,
        measured: f64,
        outputs: OutputChannels,
        now: Instant,
    ) -> f64 {
        let previous_time = *self.memory.previous_time.get_or_insert(now);
        let dt = now.saturating_duration_since(previous_time).as_secs_f64();
        if dt == 0.0 {
            return self.last_output;
        }

        let error = setpoint - measured;

        let candidate = self.memory.total_error + error;
        let scaled = candidate * gains.integral;
        if scaled > control::INTEGRAL_BAND_LOW && scaled < control::INTEGRAL_BAND_HIGH {
            self.memory.total_error = candidate;
        }

        let mut output = gains.proportional * error
            + gains.integral * self.memory.total_error
            + gains.derivative * (error - self.memory.previous_error);

        self.memory.previous_error = error;

        if output < 0.0 && !outputs.cool {
            output = 0.0;
        } else if output > 0.0 && !outputs.heat {
            output = 0.0;
        }

        let output = duty::clamp(output);

        debug!(
            dt,
            error,
            total_error = self.memory.total_error,
            output,
            "PID computed"
        );

        self.memory.previous_time = Some(now);
        self.last_output = output;
        output
    }

    /// Output of the last computation
    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    pub fn memory(&self) -> &PidMemory {
        &self.memory
    }
}
