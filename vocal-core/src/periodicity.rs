//! # Periodicity Estimation
//!
//! Time-domain pitch candidates. [`NsdfEstimator`] is the reference implementation
//! (normalized square difference with key-maxima peak picking); [`crate::yin::YinEstimator`]
//! is an interchangeable alternative behind the same [`PeriodicityEstimator`] trait.

use crate::audio::{SampleBuffer, rms};
use crate::config::{DetectorConfig, PeriodicityMethod};
use crate::diagnostics::RejectionReason;
use crate::error::ConfigResult;
use crate::fft::{SpectrumAnalyzer, remove_dc_offset};
use crate::spectral::parabolic_peak;
use crate::yin::YinEstimator;
use log::trace;
use serde::Serialize;

/// Best-period candidate of one buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutocorrelationCandidate {
    /// Fundamental estimate in Hz; `None` when no usable periodicity was found.
    pub frequency: Option<f32>,
    /// RMS of the analysed buffer.
    pub rms: f32,
    /// Height of the chosen lag peak (1.0 = perfectly periodic).
    pub clarity: f32,
    pub rejection_reason: Option<RejectionReason>,
}

impl AutocorrelationCandidate {
    pub(crate) fn rejected(reason: RejectionReason, rms: f32, clarity: f32) -> Self {
        Self {
            frequency: None,
            rms,
            clarity,
            rejection_reason: Some(reason),
        }
    }

    pub(crate) fn found(frequency: f32, rms: f32, clarity: f32) -> Self {
        Self {
            frequency: Some(frequency),
            rms,
            clarity,
            rejection_reason: None,
        }
    }
}

/// A time-domain fundamental estimator.
pub trait PeriodicityEstimator {
    fn estimate(&mut self, buffer: &SampleBuffer) -> AutocorrelationCandidate;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;
}

/// Builds the estimator selected by `config.periodicity`.
pub fn build_estimator(config: &DetectorConfig) -> ConfigResult<Box<dyn PeriodicityEstimator>> {
    Ok(match config.periodicity {
        PeriodicityMethod::Nsdf => Box::new(NsdfEstimator::new(config)?),
        PeriodicityMethod::Yin => Box::new(YinEstimator::new(config)?),
    })
}

/// Lag range `(min_lag, max_lag)` covering the search range for a buffer.
pub(crate) fn lag_range(
    sample_rate: u32,
    min_frequency_hz: f32,
    max_frequency_hz: f32,
    limit: usize,
) -> (usize, usize) {
    let sample_rate = sample_rate as f32;
    let min_lag = ((sample_rate / max_frequency_hz).floor() as usize).max(2);
    let max_lag = ((sample_rate / min_frequency_hz).ceil() as usize + 1).min(limit);
    (min_lag, max_lag)
}

/// McLeod-style normalized square difference estimator.
#[derive(Debug)]
pub struct NsdfEstimator {
    analyzer: SpectrumAnalyzer,
    min_frequency_hz: f32,
    max_frequency_hz: f32,
    clarity_threshold: f32,
    min_clarity: f32,
    min_volume_rms: f32,
}

impl NsdfEstimator {
    pub fn new(config: &DetectorConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            analyzer: SpectrumAnalyzer::new(),
            min_frequency_hz: config.min_frequency_hz,
            max_frequency_hz: config.max_frequency_hz,
            clarity_threshold: config.clarity_threshold,
            min_clarity: config.min_clarity,
            min_volume_rms: config.min_volume_rms,
        })
    }
}

impl PeriodicityEstimator for NsdfEstimator {
    fn estimate(&mut self, buffer: &SampleBuffer) -> AutocorrelationCandidate {
        let level = rms(buffer.samples());
        if level < self.min_volume_rms {
            return AutocorrelationCandidate::rejected(RejectionReason::NoSignal, level, 0.0);
        }

        let mut signal = buffer.samples().to_vec();
        remove_dc_offset(&mut signal);

        let (min_lag, max_lag) = lag_range(
            buffer.sample_rate(),
            self.min_frequency_hz,
            self.max_frequency_hz,
            signal.len() / 2,
        );
        if min_lag + 1 >= max_lag {
            return AutocorrelationCandidate::rejected(RejectionReason::OutOfRange, level, 0.0);
        }

        let correlation = self.analyzer.autocorrelation(&signal, max_lag);
        let nsdf = normalized_square_difference(&signal, &correlation);
        let maxima = key_maxima(&nsdf, min_lag);

        let Some(highest) = maxima.iter().map(|&lag| nsdf[lag]).max_by(f32::total_cmp) else {
            return AutocorrelationCandidate::rejected(RejectionReason::NoPeriodicity, level, 0.0);
        };

        // The first peak close to the best one is the fundamental, later ones are
        // sub-harmonics of it.
        let cutoff = self.clarity_threshold * highest;
        let Some(&lag) = maxima.iter().find(|&&lag| nsdf[lag] >= cutoff) else {
            return AutocorrelationCandidate::rejected(RejectionReason::NoPeriodicity, level, 0.0);
        };

        let (shift, clarity) = parabolic_peak(nsdf[lag - 1], nsdf[lag], nsdf[lag + 1]);
        if clarity < self.min_clarity {
            return AutocorrelationCandidate::rejected(RejectionReason::LowClarity, level, clarity);
        }

        let frequency = buffer.sample_rate() as f32 / (lag as f32 + shift);
        trace!("nsdf lag {lag} (+{shift:.3}) -> {frequency:.2} Hz, clarity {clarity:.3}");

        if !(self.min_frequency_hz..=self.max_frequency_hz).contains(&frequency) {
            return AutocorrelationCandidate::rejected(RejectionReason::OutOfRange, level, clarity);
        }
        AutocorrelationCandidate::found(frequency, level, clarity)
    }

    fn name(&self) -> &'static str {
        "nsdf"
    }
}

/// `n(tau) = 2 r(tau) / m(tau)` where `m(tau)` is the energy of both overlapping parts.
fn normalized_square_difference(signal: &[f32], correlation: &[f32]) -> Vec<f32> {
    let n = signal.len();
    let mut energy: f32 = 2.0 * signal.iter().map(|&s| s * s).sum::<f32>();
    let mut nsdf = Vec::with_capacity(correlation.len());

    for (tau, &r) in correlation.iter().enumerate() {
        if tau > 0 {
            energy -= signal[tau - 1] * signal[tau - 1] + signal[n - tau] * signal[n - tau];
        }
        nsdf.push(if energy > 1e-9 { 2.0 * r / energy } else { 0.0 });
    }
    nsdf
}

/// Lags of the highest point in each positive lobe of `nsdf`.
///
/// The lobe around lag zero is skipped, lobes still rising at the end of the range
/// are dropped, and only maxima at or beyond `min_lag` are returned.
fn key_maxima(nsdf: &[f32], min_lag: usize) -> Vec<usize> {
    let mut maxima = Vec::new();
    let mut lag = 1;
    while lag < nsdf.len() && nsdf[lag] > 0.0 {
        lag += 1;
    }

    let mut current: Option<usize> = None;
    for tau in lag..nsdf.len() {
        if nsdf[tau] > 0.0 {
            current = match current {
                Some(best) if nsdf[best] >= nsdf[tau] => Some(best),
                _ => Some(tau),
            };
        } else if let Some(best) = current.take() {
            maxima.push(best);
        }
    }
    if let Some(best) = current {
        if best + 1 < nsdf.len() {
            maxima.push(best);
        }
    }

    maxima.retain(|&tau| tau >= min_lag && tau + 1 < nsdf.len());
    maxima
}
