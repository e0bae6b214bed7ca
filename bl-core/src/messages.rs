//! Operator-facing advisory messages
//!
//! A single current message (e.g. the hysteresis dwell countdown) that a
//! presentation layer can show. Separate from logging.

use parking_lot::RwLock;
use tracing::info;

/// Sink for advisory messages
#[cfg_attr(test, mockall::automock)]
pub trait MessageBoard: Send + Sync {
    fn set_message(&self, message: String);

    fn message(&self) -> String;

    /// Clear the current message if it starts with `prefix`
    fn clear_prefixed(&self, prefix: &str) {
        if self.message().starts_with(prefix) {
            self.set_message(String::new());
        }
    }
}

/// In-memory message board shared by every controller in the process
#[derive(Debug, Default)]
pub struct SharedMessageBoard {
    current: RwLock<String>,
}

impl SharedMessageBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBoard for SharedMessageBoard {
    fn set_message(&self, message: String) {
        let mut current = self.current.write();
        if *current != message {
            if !message.is_empty() {
                info!("{}", message);
            }
            *current = message;
        }
    }

    fn message(&self) -> String {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear_prefixed() {
        let board = SharedMessageBoard::new();
        board.set_message("Waiting for minimum time".to_string());
        board.clear_prefixed("Other");
        assert_eq!(board.message(), "Waiting for minimum time");

        board.clear_prefixed("Waiting");
        assert!(board.message().is_empty());
    }
}
