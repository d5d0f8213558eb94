//! # Spectral Estimator
//!
//! Finds the dominant spectral peak inside the vocal search range and reports how
//! far it stands above the noise floor.
//!
//! ## Steps
//! 1. Silence gate on the buffer RMS
//! 2. DC removal, Hann window, forward FFT, amplitude in dBFS
//! 3. Loudest bin inside the search range
//! 4. Parabolic interpolation over the bin and its two neighbours
//! 5. Confidence = interpolated peak level minus the floor, where the floor is the
//!    configured `noise_floor_db` raised to the band median when the band is noisy

use crate::audio::{SampleBuffer, rms};
use crate::config::DetectorConfig;
use crate::diagnostics::RejectionReason;
use crate::error::ConfigResult;
use crate::fft::SpectrumAnalyzer;
use log::trace;
use serde::Serialize;

/// Best spectral peak of one buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralCandidate {
    /// Interpolated peak frequency; `None` when the buffer was silent or the range empty.
    pub frequency: Option<f32>,
    /// Peak height above the floor in dB.
    pub confidence_db: f32,
    pub passed_threshold: bool,
    pub threshold_db: f32,
    /// Interpolated peak level in dBFS.
    pub peak_db: f32,
    /// Floor the confidence was measured against, in dBFS.
    pub floor_db: f32,
    /// Level one octave below the peak, in dB above the floor.
    pub sub_octave_db: Option<f32>,
    pub rejection_reason: Option<RejectionReason>,
}

impl SpectralCandidate {
    fn rejected(reason: RejectionReason, threshold_db: f32, floor_db: f32) -> Self {
        Self {
            frequency: None,
            confidence_db: 0.0,
            passed_threshold: false,
            threshold_db,
            peak_db: f32::NEG_INFINITY,
            floor_db,
            sub_octave_db: None,
            rejection_reason: Some(reason),
        }
    }

    /// Frequency of a candidate that passed its threshold.
    pub fn accepted_frequency(&self) -> Option<f32> {
        self.frequency.filter(|_| self.passed_threshold)
    }
}

/// FFT peak picker over a restricted frequency range.
#[derive(Debug)]
pub struct SpectralEstimator {
    analyzer: SpectrumAnalyzer,
    min_frequency_hz: f32,
    max_frequency_hz: f32,
    noise_floor_db: f32,
    threshold_db: f32,
    min_volume_rms: f32,
}

impl SpectralEstimator {
    pub fn new(config: &DetectorConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            analyzer: SpectrumAnalyzer::new(),
            min_frequency_hz: config.min_frequency_hz,
            max_frequency_hz: config.max_frequency_hz,
            noise_floor_db: config.noise_floor_db,
            threshold_db: config.min_confidence_db,
            min_volume_rms: config.min_volume_rms,
        })
    }

    pub fn estimate(&mut self, buffer: &SampleBuffer) -> SpectralCandidate {
        if rms(buffer.samples()) < self.min_volume_rms {
            return SpectralCandidate::rejected(
                RejectionReason::NoSignal,
                self.threshold_db,
                self.noise_floor_db,
            );
        }

        let spectrum = self.analyzer.spectrum_db(buffer.samples());
        let bin_hz = buffer.sample_rate() as f32 / buffer.len() as f32;

        // Keep one bin of headroom on both sides for the interpolation.
        let low_bin = ((self.min_frequency_hz / bin_hz).ceil() as usize).max(1);
        let high_bin = ((self.max_frequency_hz / bin_hz).floor() as usize)
            .min(spectrum.len().saturating_sub(2));
        if low_bin >= high_bin {
            return SpectralCandidate::rejected(
                RejectionReason::OutOfRange,
                self.threshold_db,
                self.noise_floor_db,
            );
        }

        let band = &spectrum[low_bin..=high_bin];
        let floor_db = median(band).max(self.noise_floor_db);

        let (offset, _) = band
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap_or((0, &f32::NEG_INFINITY));
        let peak_bin = low_bin + offset;

        let (shift, peak_db) =
            parabolic_peak(spectrum[peak_bin - 1], spectrum[peak_bin], spectrum[peak_bin + 1]);
        let frequency = (peak_bin as f32 + shift) * bin_hz;
        let confidence_db = peak_db - floor_db;

        let sub_octave_db =
            level_near(&spectrum, frequency / 2.0, bin_hz).map(|level| level - floor_db);

        let in_range = (self.min_frequency_hz..=self.max_frequency_hz).contains(&frequency);
        let passed_threshold = in_range && confidence_db >= self.threshold_db;
        let rejection_reason = if !in_range {
            Some(RejectionReason::OutOfRange)
        } else if !passed_threshold {
            Some(RejectionReason::BelowNoiseFloor)
        } else {
            None
        };

        trace!(
            "spectral peak {frequency:.2} Hz at {peak_db:.1} dBFS, \
             floor {floor_db:.1} dBFS, confidence {confidence_db:.1} dB"
        );

        SpectralCandidate {
            frequency: Some(frequency),
            confidence_db,
            passed_threshold,
            threshold_db: self.threshold_db,
            peak_db,
            floor_db,
            sub_octave_db,
            rejection_reason,
        }
    }
}

/// Fits a parabola through three samples around a maximum.
///
/// Returns the offset of the vertex from the middle sample, in samples, and the
/// value at the vertex.
pub(crate) fn parabolic_peak(left: f32, centre: f32, right: f32) -> (f32, f32) {
    let denominator = left - 2.0 * centre + right;
    if !denominator.is_finite() || denominator.abs() < 1e-12 {
        return (0.0, centre);
    }
    let shift = (0.5 * (left - right) / denominator).clamp(-0.5, 0.5);
    let value = centre - 0.25 * (left - right) * shift;
    (shift, value)
}

/// Loudest level within one bin of `frequency`, if that lands inside the spectrum.
fn level_near(spectrum: &[f32], frequency: f32, bin_hz: f32) -> Option<f32> {
    let centre = (frequency / bin_hz).round() as usize;
    if centre < 1 || centre + 1 >= spectrum.len() {
        return None;
    }
    spectrum[centre - 1..=centre + 1]
        .iter()
        .copied()
        .max_by(f32::total_cmp)
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NEG_INFINITY;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted[sorted.len() / 2]
}
