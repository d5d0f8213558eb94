//! # Exercises
//!
//! Hold exercises built on the match tracker, and a registry that maps exercise
//! ids to constructors so front ends can pick one by name.

use crate::config::ToleranceConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::matcher::{MatchTracker, MatchUpdate};
use crate::tuning::{frequency_to_note, interval_frequency};
use crate::ResolvedPitch;
use log::info;
use std::collections::BTreeMap;
use std::time::Duration;

/// What an exercise is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseParams {
    /// Target pitch, or the root for interval exercises.
    pub target_hz: f32,
    /// Interval above the root in half steps; ignored by single-note exercises.
    pub semitones: i32,
    pub tolerance: ToleranceConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExerciseStatus {
    /// Not started, or stopped.
    Stopped,
    Listening(MatchUpdate),
    Completed(MatchUpdate),
}

pub trait Exercise {
    fn id(&self) -> &'static str;

    /// One-line description for prompts, e.g. `"Hold A4 (440.0 Hz)"`.
    fn describe(&self) -> String;

    /// Frequency the voice has to match.
    fn target_hz(&self) -> f32;

    /// Begins a fresh attempt.
    fn start(&mut self);

    /// Ends the attempt and discards its progress.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Feeds one detection tick.
    fn on_pitch(&mut self, pitch: Option<&ResolvedPitch>, now: Duration) -> ExerciseStatus;
}

fn describe_target(target_hz: f32) -> String {
    match frequency_to_note(target_hz) {
        Some(note) => format!("{note} ({target_hz:.1} Hz)"),
        None => format!("{target_hz:.1} Hz"),
    }
}

fn check_target(target_hz: f32) -> ConfigResult<()> {
    if target_hz.is_finite() && target_hz > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name: "target_hz",
            value: target_hz,
        })
    }
}

/// Hold one pitch within tolerance for the required time.
#[derive(Debug, Clone)]
pub struct PitchHold {
    target_hz: f32,
    tracker: MatchTracker,
    running: bool,
}

impl PitchHold {
    pub const ID: &'static str = "pitch-hold";

    pub fn new(target_hz: f32, tolerance: ToleranceConfig) -> ConfigResult<Self> {
        check_target(target_hz)?;
        Ok(Self {
            target_hz,
            tracker: MatchTracker::new(tolerance)?,
            running: false,
        })
    }

    pub fn tracker(&self) -> &MatchTracker {
        &self.tracker
    }
}

impl Exercise for PitchHold {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn describe(&self) -> String {
        format!("Hold {}", describe_target(self.target_hz))
    }

    fn target_hz(&self) -> f32 {
        self.target_hz
    }

    fn start(&mut self) {
        self.tracker.reset();
        self.running = true;
        info!("{} started", self.describe());
    }

    fn stop(&mut self) {
        self.tracker.reset();
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn on_pitch(&mut self, pitch: Option<&ResolvedPitch>, now: Duration) -> ExerciseStatus {
        if !self.running {
            return ExerciseStatus::Stopped;
        }
        let update = self.tracker.update(pitch, self.target_hz, now);
        if update.matched {
            self.running = false;
            info!("{} completed", self.describe());
            ExerciseStatus::Completed(update)
        } else {
            ExerciseStatus::Listening(update)
        }
    }
}

/// Hold the note a given interval above a root.
#[derive(Debug, Clone)]
pub struct IntervalHold {
    root_hz: f32,
    semitones: i32,
    hold: PitchHold,
}

impl IntervalHold {
    pub const ID: &'static str = "interval-hold";

    pub fn new(root_hz: f32, semitones: i32, tolerance: ToleranceConfig) -> ConfigResult<Self> {
        check_target(root_hz)?;
        let hold = PitchHold::new(interval_frequency(root_hz, semitones), tolerance)?;
        Ok(Self {
            root_hz,
            semitones,
            hold,
        })
    }

    pub fn root_hz(&self) -> f32 {
        self.root_hz
    }

    pub fn semitones(&self) -> i32 {
        self.semitones
    }
}

impl Exercise for IntervalHold {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn describe(&self) -> String {
        format!(
            "Sing {:+} half steps from {}: {}",
            self.semitones,
            describe_target(self.root_hz),
            describe_target(self.hold.target_hz())
        )
    }

    fn target_hz(&self) -> f32 {
        self.hold.target_hz()
    }

    fn start(&mut self) {
        self.hold.start();
    }

    fn stop(&mut self) {
        self.hold.stop();
    }

    fn is_running(&self) -> bool {
        self.hold.is_running()
    }

    fn on_pitch(&mut self, pitch: Option<&ResolvedPitch>, now: Duration) -> ExerciseStatus {
        self.hold.on_pitch(pitch, now)
    }
}

pub type ExerciseFactory = fn(&ExerciseParams) -> ConfigResult<Box<dyn Exercise>>;

fn build_pitch_hold(params: &ExerciseParams) -> ConfigResult<Box<dyn Exercise>> {
    let exercise = PitchHold::new(params.target_hz, params.tolerance.clone())?;
    Ok(Box::new(exercise))
}

fn build_interval_hold(params: &ExerciseParams) -> ConfigResult<Box<dyn Exercise>> {
    let exercise = IntervalHold::new(params.target_hz, params.semitones, params.tolerance.clone())?;
    Ok(Box::new(exercise))
}

/// Exercise constructors keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ExerciseRegistry {
    factories: BTreeMap<&'static str, ExerciseFactory>,
}

impl ExerciseRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `pitch-hold` and `interval-hold`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(PitchHold::ID, build_pitch_hold);
        registry.register(IntervalHold::ID, build_interval_hold);
        registry
    }

    pub fn register(&mut self, id: &'static str, factory: ExerciseFactory) {
        self.factories.insert(id, factory);
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn create(&self, id: &str, params: &ExerciseParams) -> ConfigResult<Box<dyn Exercise>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ConfigError::UnknownExercise(id.to_string()))?;
        factory(params)
    }
}
