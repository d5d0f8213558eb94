// vocal-core/src/lib.rs

//! The core logic for the vocal ear trainer.
//! This crate is responsible for pitch estimation and for deciding whether a
//! singer is holding a target pitch. It is completely headless and contains no
//! UI code.
//!
//! Data flows leaf-first:
//! `audio` -> (`spectral`, `periodicity`/`yin`) -> `resolver` -> `matcher`,
//! with `tuning` providing note names and cents throughout. `session` wraps the
//! per-tick pipeline and `exercise` builds hold exercises on top of it.

pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod exercise;
pub mod fft;
pub mod matcher;
pub mod periodicity;
pub mod resolver;
pub mod session;
pub mod smoothing;
pub mod spectral;
pub mod tuning;
pub mod yin;

pub use audio::{AudioSession, BufferSource, SampleBuffer};
pub use config::{DetectorConfig, PeriodicityMethod, ToleranceConfig, TrainerConfig};
pub use error::{ConfigError, ConfigResult};
pub use matcher::{MatchPhase, MatchTracker, MatchUpdate};
pub use session::PitchSession;

use serde::{Deserialize, Serialize};

/// Which estimator(s) a resolved pitch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PitchMethod {
    /// Spectral and periodicity candidates agreed.
    Hybrid,
    /// Only the spectral peak was trusted.
    FftOnly,
    /// Only the periodicity candidate was trusted.
    AutocorrFallback,
}

/// The pitch heard during one detection tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPitch {
    /// The detected fundamental in Hz.
    pub frequency: f32,
    /// The name of the nearest note, e.g. `"C#4"`.
    pub note: String,
    /// Deviation from the nearest note in cents (display only, not target-relative).
    pub cents: f32,
    pub method: PitchMethod,
    /// The spectral peak this tick, whether or not it was used.
    pub fft_frequency: Option<f32>,
    /// Height of that peak above the noise floor in dB.
    pub fft_confidence: Option<f32>,
}
