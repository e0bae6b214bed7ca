//! Error types, re-exported from `bl-error`

pub use bl_error::{BrewloopError, Result};
