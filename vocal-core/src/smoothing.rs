//! Caller-side smoothing of resolved frequencies to calm vibrato jitter on displays.

use std::collections::VecDeque;

/// Moving average over the last `window` resolved frequencies.
///
/// A missing pitch clears the history so a new note does not inherit the old one.
#[derive(Debug, Clone)]
pub struct PitchSmoother {
    window: usize,
    history: VecDeque<f32>,
}

impl PitchSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    /// Adds this tick's frequency and returns the current average.
    pub fn push(&mut self, frequency: Option<f32>) -> Option<f32> {
        let Some(frequency) = frequency else {
            self.history.clear();
            return None;
        };
        self.history.push_back(frequency);
        if self.history.len() > self.window {
            self.history.pop_front();
        }
        self.average()
    }

    pub fn average(&self) -> Option<f32> {
        if self.history.is_empty() {
            return None;
        }
        Some(self.history.iter().sum::<f32>() / self.history.len() as f32)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
