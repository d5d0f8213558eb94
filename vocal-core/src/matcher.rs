//! # Match Tracker
//!
//! Decides whether a voice is holding a target pitch and for how long.
//!
//! A reading is in tolerance when `|f - target| <= target * tolerance_ratio`.
//! Time is only credited while the most recent `required_stable_readings` readings
//! are all in tolerance; one bad or missing reading breaks the run. Credited time
//! never goes down within an attempt, so progress can pause but not rewind.
//! The tracker resets itself when the target changes.

use crate::config::ToleranceConfig;
use crate::error::ConfigResult;
use crate::tuning::cents_between;
use crate::ResolvedPitch;
use log::debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Readings kept beyond the stable-run requirement.
const READING_MARGIN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPhase {
    /// No stable run in progress.
    Idle,
    /// Inside a stable run; time is being credited.
    Accumulating,
    /// The hold is complete. Terminal until reset.
    Matched,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    timestamp: Duration,
    within_tolerance: bool,
    frequency: Option<f32>,
}

/// Result of one tracker update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchUpdate {
    pub matched: bool,
    pub accumulated_ms: f64,
    /// `accumulated_ms / required_matched_ms`, capped at 1.
    pub progress: f32,
    pub phase: MatchPhase,
    pub within_tolerance: bool,
    /// Distance of this tick's pitch from the target, when there was one.
    pub cents_from_target: Option<f32>,
}

/// Per-attempt hold state. Owned by a single exercise; not shared across threads.
#[derive(Debug, Clone)]
pub struct MatchTracker {
    config: ToleranceConfig,
    readings: VecDeque<Reading>,
    accumulated: Duration,
    last_match: Option<Duration>,
    target_hz: Option<f32>,
    phase: MatchPhase,
}

impl MatchTracker {
    pub fn new(config: ToleranceConfig) -> ConfigResult<Self> {
        config.validate()?;
        let capacity = config.required_stable_readings + READING_MARGIN;
        Ok(Self {
            config,
            readings: VecDeque::with_capacity(capacity),
            accumulated: Duration::ZERO,
            last_match: None,
            target_hz: None,
            phase: MatchPhase::Idle,
        })
    }

    pub fn config(&self) -> &ToleranceConfig {
        &self.config
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn target_hz(&self) -> Option<f32> {
        self.target_hz
    }

    pub fn accumulated_ms(&self) -> f64 {
        self.accumulated.as_nanos() as f64 / 1_000_000.0
    }

    pub fn is_matched(&self) -> bool {
        self.phase == MatchPhase::Matched
    }

    /// Drops all readings and credited time.
    pub fn reset(&mut self) {
        self.readings.clear();
        self.accumulated = Duration::ZERO;
        self.last_match = None;
        self.target_hz = None;
        self.phase = MatchPhase::Idle;
    }

    /// Feeds one detection tick.
    ///
    /// The tolerance settings are the ones given to [`MatchTracker::new`]; they stay
    /// fixed for the tracker's lifetime rather than being passed on every tick.
    ///
    /// # Arguments
    /// * `resolved` - This tick's pitch, `None` when nothing was detected
    /// * `target_hz` - The frequency to match; a new value starts a new attempt
    /// * `now` - Monotonic time of the tick
    pub fn update(
        &mut self,
        resolved: Option<&ResolvedPitch>,
        target_hz: f32,
        now: Duration,
    ) -> MatchUpdate {
        if self.target_hz != Some(target_hz) {
            if self.target_hz.is_some() {
                debug!("target changed to {target_hz:.2} Hz, starting over");
            }
            self.reset();
            self.target_hz = Some(target_hz);
        }

        let frequency = resolved.map(|pitch| pitch.frequency);
        let cents_from_target = frequency.and_then(|hz| cents_between(target_hz, hz));

        if self.phase == MatchPhase::Matched {
            return self.snapshot(false, cents_from_target);
        }

        let within_tolerance = target_hz > 0.0
            && frequency.is_some_and(|hz| {
                (hz - target_hz).abs() <= target_hz * self.config.tolerance_ratio
            });
        self.push(Reading {
            timestamp: now,
            within_tolerance,
            frequency,
        });

        if self.is_stable() {
            match self.last_match {
                None => debug!("stable run started at {now:?}"),
                Some(previous) => self.accumulated += now.saturating_sub(previous),
            }
            self.last_match = Some(now);
            self.phase = MatchPhase::Accumulating;
        } else {
            self.last_match = None;
            self.phase = MatchPhase::Idle;
        }

        if self.accumulated_ms() >= self.config.required_matched_ms as f64 {
            debug!("hold complete after {:.0} ms", self.accumulated_ms());
            self.phase = MatchPhase::Matched;
        }

        self.snapshot(within_tolerance, cents_from_target)
    }

    fn push(&mut self, reading: Reading) {
        self.readings.push_back(reading);
        while self.readings.len() > self.config.required_stable_readings + READING_MARGIN {
            self.readings.pop_front();
        }
    }

    /// The newest `required_stable_readings` readings are all in tolerance.
    fn is_stable(&self) -> bool {
        let required = self.config.required_stable_readings;
        self.readings.len() >= required
            && self.readings.iter().rev().take(required).all(|r| r.within_tolerance)
    }

    fn snapshot(&self, within_tolerance: bool, cents_from_target: Option<f32>) -> MatchUpdate {
        let accumulated_ms = self.accumulated_ms();
        MatchUpdate {
            matched: self.phase == MatchPhase::Matched,
            accumulated_ms,
            progress: (accumulated_ms / self.config.required_matched_ms as f64).min(1.0) as f32,
            phase: self.phase,
            within_tolerance,
            cents_from_target,
        }
    }

    /// Frequencies of the readings currently held, oldest first.
    pub fn recent_frequencies(&self) -> impl Iterator<Item = Option<f32>> + '_ {
        self.readings.iter().map(|r| r.frequency)
    }

    /// Timestamp of the newest reading.
    pub fn last_reading_at(&self) -> Option<Duration> {
        self.readings.back().map(|r| r.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PitchMethod;

    const TICK_MS: u64 = 50;

    fn pitch(frequency: f32) -> ResolvedPitch {
        ResolvedPitch {
            frequency,
            note: "A4".to_string(),
            cents: 0.0,
            method: PitchMethod::Hybrid,
            fft_frequency: Some(frequency),
            fft_confidence: Some(40.0),
        }
    }

    fn tracker(required_stable_readings: usize, required_matched_ms: f32) -> MatchTracker {
        MatchTracker::new(ToleranceConfig {
            tolerance_ratio: 0.02,
            required_stable_readings,
            required_matched_ms,
        })
        .unwrap()
    }

    fn at(tick: u64) -> Duration {
        Duration::from_millis(tick * TICK_MS)
    }

    #[test]
    fn tolerance_is_a_fraction_of_the_target() {
        let mut tracker = tracker(1, 1000.0);
        assert!(tracker.update(Some(&pitch(448.7)), 440.0, at(1)).within_tolerance);
        assert!(!tracker.update(Some(&pitch(449.0)), 440.0, at(2)).within_tolerance);
        assert!(tracker.update(Some(&pitch(431.3)), 440.0, at(3)).within_tolerance);
    }

    #[test]
    fn credit_starts_only_after_a_full_run() {
        let mut tracker = tracker(3, 1000.0);
        let pattern = [441.0, 441.0, 470.0, 441.0, 441.0, 441.0, 441.0];
        let accumulated: Vec<f64> = pattern
            .iter()
            .enumerate()
            .map(|(i, &hz)| {
                tracker
                    .update(Some(&pitch(hz)), 440.0, at(i as u64 + 1))
                    .accumulated_ms
            })
            .collect();
        assert_eq!(accumulated, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 50.0]);
        assert_eq!(tracker.phase(), MatchPhase::Accumulating);
    }

    #[test]
    fn progress_ratchets_across_a_gap() {
        let mut tracker = tracker(3, 5000.0);
        let mut tick = 0;
        let mut last = 0.0;
        let mut feed = |tracker: &mut MatchTracker, hz: f32, count: usize| {
            for _ in 0..count {
                tick += 1;
                let update = tracker.update(Some(&pitch(hz)), 440.0, at(tick));
                assert!(update.accumulated_ms >= last);
                last = update.accumulated_ms;
            }
            last
        };

        assert_eq!(feed(&mut tracker, 441.0, 5), 100.0);
        assert_eq!(feed(&mut tracker, 500.0, 3), 100.0);
        assert_eq!(tracker.phase(), MatchPhase::Idle);
        assert_eq!(feed(&mut tracker, 439.0, 5), 200.0);
    }

    #[test]
    fn missing_pitch_breaks_the_run() {
        let mut tracker = tracker(2, 1000.0);
        tracker.update(Some(&pitch(440.0)), 440.0, at(1));
        tracker.update(Some(&pitch(440.0)), 440.0, at(2));
        assert_eq!(tracker.update(Some(&pitch(440.0)), 440.0, at(3)).accumulated_ms, 50.0);

        let silent = tracker.update(None, 440.0, at(4));
        assert_eq!(silent.phase, MatchPhase::Idle);
        assert_eq!(silent.cents_from_target, None);
        assert_eq!(silent.accumulated_ms, 50.0);

        // Needs two fresh readings again before crediting.
        assert_eq!(tracker.update(Some(&pitch(440.0)), 440.0, at(5)).phase, MatchPhase::Idle);
        assert_eq!(tracker.update(Some(&pitch(440.0)), 440.0, at(6)).accumulated_ms, 50.0);
        assert_eq!(tracker.update(Some(&pitch(440.0)), 440.0, at(7)).accumulated_ms, 100.0);
    }

    #[test]
    fn matched_is_terminal_until_the_target_changes() {
        let mut tracker = tracker(1, 100.0);
        tracker.update(Some(&pitch(440.0)), 440.0, at(1));
        tracker.update(Some(&pitch(440.0)), 440.0, at(2));
        let done = tracker.update(Some(&pitch(440.0)), 440.0, at(3));
        assert!(done.matched);
        assert_eq!(done.progress, 1.0);

        let after = tracker.update(None, 440.0, at(4));
        assert!(after.matched);
        assert_eq!(after.accumulated_ms, 100.0);

        let fresh = tracker.update(Some(&pitch(660.0)), 660.0, at(5));
        assert!(!fresh.matched);
        assert_eq!(fresh.accumulated_ms, 0.0);
        assert_eq!(tracker.target_hz(), Some(660.0));
    }

    #[test]
    fn reading_history_is_bounded() {
        let mut tracker = tracker(3, 1000.0);
        for tick in 1..=20 {
            tracker.update(Some(&pitch(440.0 + tick as f32)), 440.0, at(tick));
        }
        assert_eq!(tracker.recent_frequencies().count(), 3 + READING_MARGIN);
        assert_eq!(tracker.last_reading_at(), Some(at(20)));
    }

    #[test]
    fn cents_are_measured_against_the_target() {
        let mut tracker = tracker(3, 1000.0);
        let update = tracker.update(Some(&pitch(466.16)), 440.0, at(1));
        let cents = update.cents_from_target.unwrap();
        assert!((cents - 100.0).abs() < 0.1, "{cents}");
    }

    #[test]
    fn tolerance_is_fixed_at_construction() {
        let wide = ToleranceConfig {
            tolerance_ratio: 0.05,
            required_stable_readings: 1,
            required_matched_ms: 1000.0,
        };
        let mut tracker = MatchTracker::new(wide.clone()).unwrap();
        assert_eq!(tracker.config(), &wide);
        assert!(tracker.update(Some(&pitch(460.0)), 440.0, at(1)).within_tolerance);
        assert!(!tracker.update(Some(&pitch(463.0)), 440.0, at(2)).within_tolerance);
    }
}
