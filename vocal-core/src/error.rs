//! # Error Module
//!
//! Configuration-time failures. Per-tick estimation never fails: estimators report
//! absence through rejection reasons and the resolver through `None`.

use thiserror::Error;

/// Errors raised while building or loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid search range: {min_hz} Hz .. {max_hz} Hz")]
    InvalidSearchRange { min_hz: f32, max_hz: f32 },
    #[error("invalid value for `{name}`: {value}")]
    InvalidThreshold { name: &'static str, value: f32 },
    #[error("tolerance ratio must be in (0, 1), got {0}")]
    InvalidTolerance(f32),
    #[error("required stable readings must be at least 1")]
    ZeroStableReadings,
    #[error("required matched time must be positive, got {0} ms")]
    InvalidMatchedTime(f32),
    #[error("buffer length must be a non-zero power of two, got {0}")]
    InvalidBufferLength(usize),
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("search range tops out at {max_hz} Hz but the Nyquist limit is {nyquist_hz} Hz")]
    AboveNyquist { max_hz: f32, nyquist_hz: f32 },
    #[error("no exercise registered as `{0}`")]
    UnknownExercise(String),
    #[error("config file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
