//! # Fast Fourier Transform (FFT) Module
//!
//! FFT plumbing shared by the spectral and periodicity estimators: DC removal,
//! Hann windowing, amplitude spectra in dBFS and FFT-accelerated autocorrelation.
//! Plans are cached by the planner so repeated ticks of the same length reuse them.

use rustfft::{FftPlanner, num_complex::Complex};

/// Amplitude assigned to empty bins before converting to decibels.
const MIN_AMPLITUDE: f32 = 1e-10;

/// Removes the DC offset from a signal by making its average value zero.
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window in place and returns the window's coherent gain (sum of weights).
pub fn apply_hann_window(buffer: &mut [f32]) -> f32 {
    let n = buffer.len();
    if n < 2 {
        return n as f32;
    }
    let n_minus_1 = (n - 1) as f32;
    let mut gain = 0.0;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
        gain += multiplier;
    }
    gain
}

/// Converts a linear amplitude (1.0 = full scale) to dBFS.
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.max(MIN_AMPLITUDE).log10()
}

/// Owns an FFT planner so transforms of a given size are planned once.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer").finish_non_exhaustive()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Single-sided amplitude spectrum of a DC-free, Hann-windowed copy of `signal`.
    ///
    /// Bin `k` covers `k * sample_rate / signal.len()` Hz. Amplitudes are normalized
    /// by the window gain, so a full-scale sine peaks near 1.0.
    pub fn amplitudes(&mut self, signal: &[f32]) -> Vec<f32> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }

        let mut processed_signal = signal.to_vec();
        remove_dc_offset(&mut processed_signal);
        let gain = apply_hann_window(&mut processed_signal).max(f32::EPSILON);

        let fft = self.planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex<f32>> = processed_signal
            .into_iter()
            .map(|sample| Complex { re: sample, im: 0.0 })
            .collect();
        fft.process(&mut buffer);

        buffer
            .iter()
            .take(n / 2)
            .map(|c| 2.0 * c.norm() / gain)
            .collect()
    }

    /// Same as [`SpectrumAnalyzer::amplitudes`], in dBFS.
    pub fn spectrum_db(&mut self, signal: &[f32]) -> Vec<f32> {
        self.amplitudes(signal)
            .into_iter()
            .map(amplitude_to_db)
            .collect()
    }

    /// Linear autocorrelation `r[tau] = sum_i x[i] * x[i + tau]` for `tau` in `0..=max_lag`.
    ///
    /// Computed through a zero-padded power spectrum so it costs two FFTs instead of
    /// `O(n * max_lag)` multiplications.
    pub fn autocorrelation(&mut self, signal: &[f32], max_lag: usize) -> Vec<f32> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let max_lag = max_lag.min(n - 1);
        let padded = (2 * n).next_power_of_two();

        let mut buffer: Vec<Complex<f32>> = signal
            .iter()
            .map(|&sample| Complex { re: sample, im: 0.0 })
            .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }))
            .take(padded)
            .collect();

        self.planner.plan_fft_forward(padded).process(&mut buffer);
        for bin in buffer.iter_mut() {
            *bin = Complex {
                re: bin.norm_sqr(),
                im: 0.0,
            };
        }
        self.planner.plan_fft_inverse(padded).process(&mut buffer);

        let scale = 1.0 / padded as f32;
        buffer
            .iter()
            .take(max_lag + 1)
            .map(|c| c.re * scale)
            .collect()
    }
}
