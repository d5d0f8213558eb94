//! # Diagnostics Module
//!
//! Per-tick introspection for debug tooling. Sinks only observe; nothing they
//! do feeds back into resolution.

use crate::periodicity::AutocorrelationCandidate;
use crate::resolver::ResolveRule;
use crate::spectral::SpectralCandidate;
use crate::PitchMethod;
use crate::config::DetectorConfig;
use serde::Serialize;
use std::fmt;

/// Why an estimator or the resolver produced nothing this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionReason {
    /// Buffer RMS below the minimum volume.
    NoSignal,
    /// Spectral peak not far enough above the floor.
    BelowNoiseFloor,
    /// Peak or period outside the vocal search range.
    OutOfRange,
    /// No usable lag peak in the periodicity function.
    NoPeriodicity,
    /// A lag peak was found but it is not clear enough.
    LowClarity,
    /// The estimators disagree and neither has an edge.
    Ambiguous,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectionReason::NoSignal => "below minimum volume",
            RejectionReason::BelowNoiseFloor => "below noise floor",
            RejectionReason::OutOfRange => "outside search range",
            RejectionReason::NoPeriodicity => "no periodicity",
            RejectionReason::LowClarity => "periodicity not clear",
            RejectionReason::Ambiguous => "estimators disagree",
        };
        f.write_str(text)
    }
}

/// The thresholds in force when an event was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thresholds {
    pub search_range_hz: [f32; 2],
    pub noise_floor_db: f32,
    pub min_confidence_db: f32,
    pub clarity_threshold: f32,
    pub min_clarity: f32,
    pub min_volume_rms: f32,
    pub agreement_cents: f32,
}

impl From<&DetectorConfig> for Thresholds {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            search_range_hz: [config.min_frequency_hz, config.max_frequency_hz],
            noise_floor_db: config.noise_floor_db,
            min_confidence_db: config.min_confidence_db,
            clarity_threshold: config.clarity_threshold,
            min_clarity: config.min_clarity,
            min_volume_rms: config.min_volume_rms,
            agreement_cents: config.agreement_cents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    Resolved,
    Rejected,
}

/// Snapshot of one detection tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    #[serde(rename = "type")]
    pub kind: DiagnosticKind,
    pub tick: u64,
    pub rule: ResolveRule,
    pub method: Option<PitchMethod>,
    pub rejection_reason: Option<RejectionReason>,
    pub resolved_frequency: Option<f32>,
    pub thresholds: Thresholds,
    pub spectral: SpectralCandidate,
    pub periodicity: AutocorrelationCandidate,
}

/// Receives one event per tick.
pub trait DiagnosticSink {
    fn record(&mut self, event: &DiagnosticEvent);
}

impl<F> DiagnosticSink for F
where
    F: FnMut(&DiagnosticEvent),
{
    fn record(&mut self, event: &DiagnosticEvent) {
        self(event)
    }
}

/// Writes every event as a JSON line through the `log` facade at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&mut self, event: &DiagnosticEvent) {
        match serde_json::to_string(event) {
            Ok(line) => log::trace!(target: "vocal_core::diagnostics", "{line}"),
            Err(e) => log::warn!("could not serialize diagnostic event: {e}"),
        }
    }
}
