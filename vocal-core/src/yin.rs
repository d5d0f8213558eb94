//! # YIN Estimator
//!
//! The cumulative-mean-normalized difference method, as an alternative to the
//! NSDF estimator behind the same [`PeriodicityEstimator`] contract.
//!
//! ## Features
//! - Amplitude gating to filter out silence
//! - Lag search limited to the vocal range
//! - First dip under the absolute threshold, followed down to its minimum, to
//!   avoid octave errors
//! - Parabolic interpolation for sub-sample accuracy

use crate::audio::{SampleBuffer, rms};
use crate::config::DetectorConfig;
use crate::diagnostics::RejectionReason;
use crate::error::ConfigResult;
use crate::periodicity::{AutocorrelationCandidate, PeriodicityEstimator, lag_range};
use crate::spectral::parabolic_peak;
use log::trace;

#[derive(Debug, Clone)]
pub struct YinEstimator {
    min_frequency_hz: f32,
    max_frequency_hz: f32,
    threshold: f32,
    min_clarity: f32,
    min_volume_rms: f32,
    yin_buffer: Vec<f32>,
}

impl YinEstimator {
    pub fn new(config: &DetectorConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            min_frequency_hz: config.min_frequency_hz,
            max_frequency_hz: config.max_frequency_hz,
            threshold: config.yin_threshold,
            min_clarity: config.min_clarity,
            min_volume_rms: config.min_volume_rms,
            yin_buffer: Vec::new(),
        })
    }
}

impl PeriodicityEstimator for YinEstimator {
    fn estimate(&mut self, buffer: &SampleBuffer) -> AutocorrelationCandidate {
        let signal = buffer.samples();
        let level = rms(signal);
        if level < self.min_volume_rms {
            return AutocorrelationCandidate::rejected(RejectionReason::NoSignal, level, 0.0);
        }

        let window = signal.len() / 2;
        if window < 2 {
            return AutocorrelationCandidate::rejected(RejectionReason::OutOfRange, level, 0.0);
        }
        let (min_lag, max_lag) = lag_range(
            buffer.sample_rate(),
            self.min_frequency_hz,
            self.max_frequency_hz,
            window - 1,
        );
        if min_lag + 1 >= max_lag {
            return AutocorrelationCandidate::rejected(RejectionReason::OutOfRange, level, 0.0);
        }

        // --- Difference function ---
        let yin_buffer = &mut self.yin_buffer;
        yin_buffer.clear();
        yin_buffer.resize(max_lag + 1, 0.0);
        for tau in 1..=max_lag {
            let mut diff = 0.0;
            for i in 0..window {
                let delta = signal[i] - signal[i + tau];
                diff += delta * delta;
            }
            yin_buffer[tau] = diff;
        }

        // --- Cumulative mean normalized difference ---
        let mut running_sum = 0.0;
        yin_buffer[0] = 1.0;
        for tau in 1..=max_lag {
            running_sum += yin_buffer[tau];
            if running_sum > 0.0 {
                yin_buffer[tau] *= tau as f32 / running_sum;
            } else {
                yin_buffer[tau] = 1.0;
            }
        }

        // --- First dip under the threshold, then down to its local minimum ---
        let Some(mut period) = (min_lag..max_lag).find(|&tau| yin_buffer[tau] < self.threshold)
        else {
            let best = yin_buffer[min_lag..max_lag]
                .iter()
                .copied()
                .fold(f32::INFINITY, f32::min);
            return AutocorrelationCandidate::rejected(
                RejectionReason::NoPeriodicity,
                level,
                (1.0 - best).max(0.0),
            );
        };
        while period + 1 < max_lag && yin_buffer[period + 1] < yin_buffer[period] {
            period += 1;
        }

        // The difference function has a dip, so interpolate its negation as a peak.
        let (shift, dip) = parabolic_peak(
            -yin_buffer[period - 1],
            -yin_buffer[period],
            -yin_buffer[period + 1],
        );
        let clarity = (1.0 + dip).clamp(0.0, 1.0);
        if clarity < self.min_clarity {
            return AutocorrelationCandidate::rejected(RejectionReason::LowClarity, level, clarity);
        }

        let frequency = buffer.sample_rate() as f32 / (period as f32 + shift);
        trace!("yin lag {period} (+{shift:.3}) -> {frequency:.2} Hz, clarity {clarity:.3}");

        if frequency.is_finite()
            && (self.min_frequency_hz..=self.max_frequency_hz).contains(&frequency)
        {
            AutocorrelationCandidate::found(frequency, level, clarity)
        } else {
            AutocorrelationCandidate::rejected(RejectionReason::OutOfRange, level, clarity)
        }
    }

    fn name(&self) -> &'static str {
        "yin"
    }
}
