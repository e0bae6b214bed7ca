//! Hysteresis (on/off thermostat) controller
//!
//! Drives an output fully on or fully off between a minimum and maximum
//! threshold. Any state change is gated by a minimum dwell time measured from
//! the last activation, so a compressor or element is never short-cycled.

use std::time::Instant;

use tracing::{debug, info};

use crate::constants::{control, duty};
use crate::data::HysteresisThresholds;
use crate::engine::pid::OutputChannels;

/// What the controller wants done this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HysteresisAction {
    /// Inside the band, or nothing that could change
    Hold,
    /// A change is due but the dwell time has not elapsed
    Waiting { remaining_minutes: f64 },
    /// Drive the heater at full duty with the given cycle time (seconds)
    ActivateHeat { cycle_time: f64 },
    /// Drive the cooler at full duty with the given cycle time (seconds)
    ActivateCool { cycle_time: f64 },
    /// Turn the running output off
    Deactivate,
}

impl HysteresisAction {
    /// Duty cycle this action sets, `None` if the duty is left alone
    pub fn duty(&self) -> Option<f64> {
        match self {
            HysteresisAction::ActivateHeat { .. } => Some(duty::MAX),
            HysteresisAction::ActivateCool { .. } => Some(duty::MIN),
            HysteresisAction::Deactivate => Some(duty::OFF),
            HysteresisAction::Hold | HysteresisAction::Waiting { .. } => None,
        }
    }

    /// Whether the dwell gate was passed this tick
    pub fn changes_output(&self) -> bool {
        self.duty().is_some()
    }
}

/// Time of the last activation
///
/// Starts unset: with no activation yet the dwell time counts as elapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DwellTimer {
    last_activation: Option<Instant>,
}

impl DwellTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minutes since the last activation, `None` before the first one
    pub fn elapsed_minutes(&self, now: Instant) -> Option<f64> {
        self.last_activation.map(|started| {
            now.saturating_duration_since(started).as_secs_f64() / control::SECONDS_PER_MINUTE
        })
    }

    /// `Ok` once strictly more than `min_time` minutes have passed, else the minutes remaining
    pub fn check(&self, min_time: f64, now: Instant) -> std::result::Result<(), f64> {
        match self.elapsed_minutes(now) {
            None => Ok(()),
            Some(elapsed) if elapsed > min_time => Ok(()),
            Some(elapsed) => Err(min_time - elapsed),
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_activation = Some(now);
    }

    pub fn last_activation(&self) -> Option<Instant> {
        self.last_activation
    }
}

/// Threshold controller with dwell-time debouncing
#[derive(Debug, Clone, Default)]
pub struct HysteresisController {
    dwell: DwellTimer,
}

impl HysteresisController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one tick
    ///
    /// `current_duty` is the duty the actuator is running at right now.
    /// Activations reset the dwell timer; deactivations do not.
    pub fn evaluate(
        &mut self,
        thresholds: &HysteresisThresholds,
        temperature: f64,
        current_duty: f64,
        outputs: OutputChannels,
        now: Instant,
    ) -> HysteresisAction {
        debug!(
            temperature,
            min = thresholds.min,
            max = thresholds.max,
            "Checking temperature against hysteresis band"
        );

        let cycle_time = thresholds.min_time * control::SECONDS_PER_MINUTE;

        let wanted = if temperature < thresholds.min {
            if outputs.heat && current_duty < duty::MAX {
                HysteresisAction::ActivateHeat { cycle_time }
            } else if outputs.cool && current_duty < duty::OFF {
                HysteresisAction::Deactivate
            } else {
                HysteresisAction::Hold
            }
        } else if temperature >= thresholds.max {
            if outputs.cool && current_duty > duty::MIN {
                HysteresisAction::ActivateCool { cycle_time }
            } else if outputs.heat && current_duty > duty::OFF {
                HysteresisAction::Deactivate
            } else {
                HysteresisAction::Hold
            }
        } else {
            HysteresisAction::Hold
        };

        if wanted == HysteresisAction::Hold {
            return wanted;
        }

        if let Err(remaining_minutes) = self.dwell.check(thresholds.min_time, now) {
            debug!(remaining_minutes, "Dwell time not elapsed");
            return HysteresisAction::Waiting { remaining_minutes };
        }

        match wanted {
            HysteresisAction::ActivateHeat { .. } => {
                info!(temperature, min = thresholds.min, "Below minimum, heating at full duty");
                self.dwell.reset(now);
            }
            HysteresisAction::ActivateCool { .. } => {
                info!(temperature, max = thresholds.max, "Above maximum, cooling at full duty");
                self.dwell.reset(now);
            }
            _ => info!(temperature, "Dwell time elapsed, turning output off"),
        }

        wanted
    }

    pub fn dwell(&self) -> &DwellTimer {
        &self.dwell
    }
}
