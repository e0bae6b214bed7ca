//! Recent-history window of probe readings
//!
//! Smooths sensor noise by averaging the last few readings before they reach
//! the PID calculator.

use std::collections::VecDeque;

use crate::constants::control::SAMPLE_WINDOW_LEN;

/// Bounded FIFO of readings, oldest first
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLE_WINDOW_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest once the window is over capacity
    pub fn record(&mut self, value: f64) {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the held readings, `None` when empty
    ///
    /// `None` means "no data": callers skip the tick's control computation.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let total: f64 = self.samples.iter().sum();
        Some(total / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Held readings, oldest first
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_no_average() {
        let window = SampleWindow::new();
        assert!(window.is_empty());
        assert_eq!(window.average(), None);
    }

    #[test]
    fn test_average() {
        let mut window = SampleWindow::new();
        window.record(64.0);
        window.record(66.0);
        assert_eq!(window.average(), Some(65.0));
    }

    #[test]
    fn test_eviction_keeps_last_five_in_order() {
        let mut window = SampleWindow::new();
        for v in 1..=7 {
            window.record(v as f64);
        }
        assert_eq!(window.len(), 5);
        assert_eq!(window.samples().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(window.average(), Some(5.0));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut window = SampleWindow::with_capacity(0);
        window.record(1.0);
        window.record(2.0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.average(), Some(2.0));
    }
}
