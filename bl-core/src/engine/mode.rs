//! Mode state machine
//!
//! Picks the strategy that owns the output for one tick and turns its result
//! into an [`OutputCommand`] for the actuator.
//!
//! | mode       | duty                  | heat cycle time        |
//! |------------|-----------------------|------------------------|
//! | off        | 0                     | configured heat cycle  |
//! | manual     | operator duty         | manual cycle           |
//! | auto       | PID on the average    | configured heat cycle  |
//! | hysteresis | set by the thresholds | dwell minutes × 60     |

use std::time::Instant;

use crate::constants::duty;
use crate::data::{HysteresisThresholds, Mode};
use crate::engine::hysteresis::{HysteresisAction, HysteresisController};
use crate::engine::pid::{OutputChannels, PidCalculator, PidGains};
use crate::engine::samples::SampleWindow;

/// Settings and live values one tick is computed from
#[derive(Debug, Clone, Copy)]
pub struct TickInputs {
    pub mode: Mode,
    pub setpoint: f64,
    pub manual_duty: f64,
    pub manual_cycle: f64,
    pub heat_cycle: f64,
    pub gains: PidGains,
    pub thresholds: HysteresisThresholds,
    pub outputs: OutputChannels,
    /// Duty the actuator is running at now
    pub current_duty: f64,
    /// This tick's reading in the controller's scale
    pub temperature: f64,
    pub now: Instant,
}

/// Changes to push to the output actuator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputCommand {
    pub duty: Option<f64>,
    pub heat_cycle: Option<f64>,
    pub cool_cycle: Option<f64>,
    /// Interrupt the actuator's current cycle so the change applies at once
    pub wake: bool,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Neither a heat nor a cool output exists
    NoOutputs,
    /// No usable reading; the previous duty stays in force
    SensorStale,
    /// Off, manual, or auto produced a command
    Drive {
        command: OutputCommand,
        /// PID output, only set in auto mode
        calculated: Option<f64>,
    },
    /// The hysteresis controller ran
    Hysteresis {
        action: HysteresisAction,
        command: OutputCommand,
    },
}

impl Decision {
    pub fn command(&self) -> Option<&OutputCommand> {
        match self {
            Decision::Drive { command, .. } | Decision::Hysteresis { command, .. } => Some(command),
            Decision::NoOutputs | Decision::SensorStale => None,
        }
    }
}

/// Per-controller control state: smoothing window, PID memory, dwell timer
#[derive(Debug, Clone, Default)]
pub struct ControlEngine {
    window: SampleWindow,
    pid: PidCalculator,
    hysteresis: HysteresisController,
}

impl ControlEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one tick
    ///
    /// The reading always enters the sample window (unless it is not a
    /// number); the strategy only runs when at least one output exists.
    pub fn step(&mut self, inputs: &TickInputs) -> Decision {
        if inputs.temperature.is_finite() {
            self.window.record(inputs.temperature);
        }

        if !inputs.outputs.any() {
            return Decision::NoOutputs;
        }

        match inputs.mode {
            Mode::Off => Decision::Drive {
                command: OutputCommand {
                    duty: Some(duty::OFF),
                    heat_cycle: Some(inputs.heat_cycle),
                    ..Default::default()
                },
                calculated: None,
            },
            Mode::Manual => Decision::Drive {
                command: OutputCommand {
                    duty: Some(duty::clamp(inputs.manual_duty)),
                    heat_cycle: Some(inputs.manual_cycle),
                    ..Default::default()
                },
                calculated: None,
            },
            Mode::Auto => {
                let Some(average) = self.window.average() else {
                    return Decision::SensorStale;
                };
                let output = self.pid.compute(
                    &inputs.gains,
                    inputs.setpoint,
                    average,
                    inputs.outputs,
                    inputs.now,
                );
                Decision::Drive {
                    command: OutputCommand {
                        duty: Some(output),
                        heat_cycle: Some(inputs.heat_cycle),
                        ..Default::default()
                    },
                    calculated: Some(output),
                }
            }
            Mode::Hysteresis => {
                if !inputs.temperature.is_finite() {
                    return Decision::SensorStale;
                }
                let action = self.hysteresis.evaluate(
                    &inputs.thresholds,
                    inputs.temperature,
                    inputs.current_duty,
                    inputs.outputs,
                    inputs.now,
                );
                let command = match action {
                    HysteresisAction::ActivateHeat { cycle_time } => OutputCommand {
                        duty: action.duty(),
                        heat_cycle: Some(cycle_time),
                        cool_cycle: None,
                        wake: true,
                    },
                    HysteresisAction::ActivateCool { cycle_time } => OutputCommand {
                        duty: action.duty(),
                        heat_cycle: None,
                        cool_cycle: Some(cycle_time),
                        wake: true,
                    },
                    HysteresisAction::Deactivate => OutputCommand {
                        duty: action.duty(),
                        wake: true,
                        ..Default::default()
                    },
                    HysteresisAction::Hold | HysteresisAction::Waiting { .. } => {
                        OutputCommand::default()
                    }
                };
                Decision::Hysteresis { action, command }
            }
        }
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }
}
