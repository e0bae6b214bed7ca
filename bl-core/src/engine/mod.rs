//! Control engine modules
//!
//! Contains the sample window, the PID calculator, the hysteresis controller,
//! and the mode state machine that chooses between them.

mod hysteresis;
mod mode;
mod pid;
mod samples;

pub use hysteresis::{DwellTimer, HysteresisAction, HysteresisController};
pub use mode::{ControlEngine, Decision, OutputCommand, TickInputs};
pub use pid::{OutputChannels, PidCalculator, PidGains, PidMemory};
pub use samples::SampleWindow;
