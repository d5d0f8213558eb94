//! # Pitch Session
//!
//! The per-tick detection pipeline as a synchronous pull loop: hand it a buffer,
//! get back this tick's pitch. Owns both estimators, the resolver, the previous
//! result used for continuity and an optional diagnostics sink.

use crate::audio::{BufferSource, SampleBuffer};
use crate::config::DetectorConfig;
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink, Thresholds};
use crate::error::ConfigResult;
use crate::periodicity::{PeriodicityEstimator, build_estimator};
use crate::resolver::HybridPitchResolver;
use crate::spectral::SpectralEstimator;
use crate::ResolvedPitch;
use log::debug;
use std::time::Duration;

pub struct PitchSession {
    config: DetectorConfig,
    spectral: SpectralEstimator,
    periodicity: Box<dyn PeriodicityEstimator>,
    resolver: HybridPitchResolver,
    previous: Option<ResolvedPitch>,
    diagnostics: Option<Box<dyn DiagnosticSink>>,
    ticks: u64,
}

impl std::fmt::Debug for PitchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchSession")
            .field("periodicity", &self.periodicity.name())
            .field("previous", &self.previous)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl PitchSession {
    pub fn new(config: DetectorConfig) -> ConfigResult<Self> {
        let spectral = SpectralEstimator::new(&config)?;
        let periodicity = build_estimator(&config)?;
        let resolver = HybridPitchResolver::new(&config)?;
        debug!("pitch session using {} periodicity", periodicity.name());
        Ok(Self {
            config,
            spectral,
            periodicity,
            resolver,
            previous: None,
            diagnostics: None,
            ticks: 0,
        })
    }

    /// Sends a [`DiagnosticEvent`] to `sink` after every tick.
    pub fn with_diagnostics(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.diagnostics = Some(Box::new(sink));
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// The pitch resolved on the most recent tick.
    pub fn previous(&self) -> Option<&ResolvedPitch> {
        self.previous.as_ref()
    }

    /// Runs one estimation pass over `buffer`.
    pub fn tick(&mut self, buffer: &SampleBuffer) -> Option<ResolvedPitch> {
        self.ticks += 1;
        let spectral = self.spectral.estimate(buffer);
        let periodicity = self.periodicity.estimate(buffer);
        let resolution = self
            .resolver
            .resolve_detailed(&spectral, &periodicity, self.previous.as_ref());

        if let Some(sink) = self.diagnostics.as_mut() {
            let event = DiagnosticEvent {
                kind: if resolution.pitch.is_some() {
                    DiagnosticKind::Resolved
                } else {
                    DiagnosticKind::Rejected
                },
                tick: self.ticks,
                rule: resolution.rule,
                method: resolution.pitch.as_ref().map(|p| p.method),
                rejection_reason: resolution.rejection_reason,
                resolved_frequency: resolution.pitch.as_ref().map(|p| p.frequency),
                thresholds: Thresholds::from(&self.config),
                spectral,
                periodicity,
            };
            sink.record(&event);
        }

        self.previous = resolution.pitch.clone();
        resolution.pitch
    }

    /// Pulls the next buffer from `source` and runs a tick on it.
    ///
    /// Returns `None` when the source produced nothing before `timeout`.
    pub fn poll(
        &mut self,
        source: &mut dyn BufferSource,
        timeout: Duration,
    ) -> Option<Option<ResolvedPitch>> {
        let buffer = source.next_buffer(timeout)?;
        Some(self.tick(&buffer))
    }

    /// Forgets the previous pitch so nothing carries over into the next attempt.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
