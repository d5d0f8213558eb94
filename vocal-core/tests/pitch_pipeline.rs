use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use vocal_core::periodicity::build_estimator;
use vocal_core::resolver::HybridPitchResolver;
use vocal_core::spectral::SpectralEstimator;
use vocal_core::{DetectorConfig, PeriodicityMethod, PitchMethod, PitchSession, SampleBuffer};

const SAMPLE_RATE: u32 = 44_100;
const BUFFER_LEN: usize = 2048;

/// Sum of sines given as `(frequency, amplitude)` pairs.
fn chord(partials: &[(f32, f32)]) -> SampleBuffer {
    let samples = (0..BUFFER_LEN)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            partials
                .iter()
                .map(|&(freq, amplitude)| amplitude * (2.0 * PI * freq * t).sin())
                .sum()
        })
        .collect();
    SampleBuffer::new(samples, SAMPLE_RATE).unwrap()
}

fn sine(freq: f32, amplitude: f32) -> SampleBuffer {
    chord(&[(freq, amplitude)])
}

/// Seeded white noise in [-amplitude, amplitude].
fn noise(amplitude: f32, seed: u64) -> SampleBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..BUFFER_LEN)
        .map(|_| rng.gen_range(-amplitude..=amplitude))
        .collect();
    SampleBuffer::new(samples, SAMPLE_RATE).unwrap()
}

#[test]
fn silence_never_resolves() {
    let config = DetectorConfig::default();
    let mut spectral = SpectralEstimator::new(&config).unwrap();
    let mut periodicity = build_estimator(&config).unwrap();
    let resolver = HybridPitchResolver::new(&config).unwrap();
    let silence = SampleBuffer::new(vec![0.0; BUFFER_LEN], SAMPLE_RATE).unwrap();

    let spectral_candidate = spectral.estimate(&silence);
    let periodic_candidate = periodicity.estimate(&silence);
    assert!(spectral_candidate.frequency.is_none());
    assert!(periodic_candidate.frequency.is_none());
    assert!(resolver.resolve(&spectral_candidate, &periodic_candidate, None).is_none());

    let mut session = PitchSession::new(config).unwrap();
    for _ in 0..5 {
        assert!(session.tick(&silence).is_none());
    }
}

#[test]
fn pure_tone_resolves_to_its_own_octave() {
    let mut session = PitchSession::new(DetectorConfig::default()).unwrap();
    let pitch = session.tick(&sine(220.0, 0.5)).unwrap();
    assert!((pitch.frequency - 220.0).abs() <= 10.0, "{}", pitch.frequency);
    assert_eq!(pitch.note, "A3");
    assert_eq!(pitch.method, PitchMethod::Hybrid);
    assert!(pitch.fft_confidence.unwrap() > 20.0);
}

#[test_log::test]
fn strong_second_harmonic_still_reports_the_fundamental() {
    let mut session = PitchSession::new(DetectorConfig::default()).unwrap();
    let voice = chord(&[(220.0, 0.3), (440.0, 0.5), (660.0, 0.2)]);
    let pitch = session.tick(&voice).unwrap();
    assert!((pitch.frequency - 220.0).abs() <= 10.0, "{}", pitch.frequency);
    assert_eq!(pitch.fft_frequency.map(|f| (f - 440.0).abs() < 10.0), Some(true));
}

#[test]
fn white_noise_is_rejected() {
    let mut session = PitchSession::new(DetectorConfig::default()).unwrap();
    for seed in 1..=5 {
        assert_eq!(session.tick(&noise(0.3, seed)), None, "seed {seed}");
    }
}

#[test]
fn quiet_input_is_gated() {
    let mut session = PitchSession::new(DetectorConfig::default()).unwrap();
    assert!(session.tick(&sine(330.0, 0.005)).is_none());
    assert!(session.tick(&sine(330.0, 0.2)).is_some());
}

#[test]
fn yin_session_tracks_a_scale() {
    let config = DetectorConfig {
        periodicity: PeriodicityMethod::Yin,
        ..DetectorConfig::default()
    };
    let mut session = PitchSession::new(config).unwrap();
    for (freq, name) in [(261.63, "C4"), (293.66, "D4"), (329.63, "E4"), (392.0, "G4")] {
        let pitch = session.tick(&sine(freq, 0.4)).unwrap();
        assert_eq!(pitch.note, name);
        assert!(pitch.cents.abs() < 35.0, "{name}: {} cents", pitch.cents);
    }
}

#[test]
fn tiny_buffers_never_panic() {
    for periodicity in [PeriodicityMethod::Nsdf, PeriodicityMethod::Yin] {
        let config = DetectorConfig {
            periodicity,
            ..DetectorConfig::default()
        };
        let mut session = PitchSession::new(config).unwrap();
        for len in [1, 2, 4, 8, 16] {
            let buffer = SampleBuffer::new(vec![0.5; len], SAMPLE_RATE).unwrap();
            assert_eq!(session.tick(&buffer), None, "{periodicity:?}, length {len}");
        }
    }
}
