//! # Hybrid Pitch Resolver
//!
//! Fuses the spectral and periodicity candidates into one pitch.
//!
//! Periodicity methods tend to jump an octave down onto a sub-harmonic; FFT peak
//! picking tends to lock onto a strong harmonic when the fundamental is weak. The
//! resolver cross-checks the two:
//!
//! | candidates                      | result                                         |
//! |---------------------------------|------------------------------------------------|
//! | both agree within the window    | spectral value, `Hybrid`                       |
//! | one side has a decisive edge    | that side's value, octave included             |
//! | octave apart, both decisive     | periodicity an octave lower: half the spectral |
//! |                                 | value if the spectrum shows a fundamental      |
//! |                                 | there, else spectral; periodicity an octave    |
//! |                                 | higher: spectral                               |
//! | any other disagreement          | the one continuing the previous pitch,         |
//! |                                 | else nothing                                   |
//! | only one candidate              | that candidate (`FftOnly` / `AutocorrFallback`)|
//! | none                            | nothing                                        |

use crate::config::DetectorConfig;
use crate::diagnostics::RejectionReason;
use crate::error::ConfigResult;
use crate::periodicity::AutocorrelationCandidate;
use crate::spectral::SpectralCandidate;
use crate::tuning::{cents_between, nearest_note};
use crate::{PitchMethod, ResolvedPitch};
use log::debug;
use serde::Serialize;

/// Which branch of the resolution policy produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveRule {
    Agreement,
    /// Both decisive an octave apart and the spectrum shows the lower octave:
    /// the spectral peak was the second harmonic, reported one octave down.
    SubOctaveFundamental,
    /// Both decisive with periodicity an octave below, but no spectral energy
    /// there: periodicity fell onto a sub-harmonic, spectral kept.
    SubHarmonicRejected,
    /// Both decisive with periodicity an octave above: the spectral peak is real
    /// energy at the lower pitch, spectral kept.
    SpectralLowerOctave,
    SpectralEdge,
    PeriodicityEdge,
    Continuity,
    SpectralOnly,
    PeriodicityOnly,
    NoCandidate,
    Ambiguous,
}

/// Full outcome of one resolution, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub pitch: Option<ResolvedPitch>,
    pub rule: ResolveRule,
    pub rejection_reason: Option<RejectionReason>,
}

/// Frequency chosen by the policy before it is turned into a [`ResolvedPitch`].
struct Choice {
    frequency: f32,
    method: PitchMethod,
    rule: ResolveRule,
}

#[derive(Debug, Clone)]
pub struct HybridPitchResolver {
    min_frequency_hz: f32,
    max_frequency_hz: f32,
    agreement_cents: f32,
    octave_tolerance_cents: f32,
    decisive_margin_db: f32,
    decisive_clarity: f32,
    sub_octave_deficit_db: f32,
}

impl HybridPitchResolver {
    pub fn new(config: &DetectorConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            min_frequency_hz: config.min_frequency_hz,
            max_frequency_hz: config.max_frequency_hz,
            agreement_cents: config.agreement_cents,
            octave_tolerance_cents: config.octave_tolerance_cents,
            decisive_margin_db: config.decisive_margin_db,
            decisive_clarity: config.decisive_clarity,
            sub_octave_deficit_db: config.sub_octave_deficit_db,
        })
    }

    /// Resolves one tick to a pitch, or `None` when there is no trustworthy pitch.
    pub fn resolve(
        &self,
        spectral: &SpectralCandidate,
        periodicity: &AutocorrelationCandidate,
        previous: Option<&ResolvedPitch>,
    ) -> Option<ResolvedPitch> {
        self.resolve_detailed(spectral, periodicity, previous).pitch
    }

    /// Same as [`HybridPitchResolver::resolve`], also reporting the rule that fired.
    pub fn resolve_detailed(
        &self,
        spectral: &SpectralCandidate,
        periodicity: &AutocorrelationCandidate,
        previous: Option<&ResolvedPitch>,
    ) -> Resolution {
        let spectral_hz = spectral.accepted_frequency();
        let periodic_hz = periodicity.frequency;

        let choice = match (spectral_hz, periodic_hz) {
            (None, None) => {
                let reason = match (spectral.rejection_reason, periodicity.rejection_reason) {
                    (Some(RejectionReason::NoSignal), _) | (_, Some(RejectionReason::NoSignal)) => {
                        RejectionReason::NoSignal
                    }
                    (_, Some(reason)) => reason,
                    (Some(reason), None) => reason,
                    (None, None) => RejectionReason::NoPeriodicity,
                };
                return self.reject(ResolveRule::NoCandidate, reason);
            }
            (Some(frequency), None) => Choice {
                frequency,
                method: PitchMethod::FftOnly,
                rule: ResolveRule::SpectralOnly,
            },
            (None, Some(frequency)) => Choice {
                frequency,
                method: PitchMethod::AutocorrFallback,
                rule: ResolveRule::PeriodicityOnly,
            },
            (Some(spectral_hz), Some(periodic_hz)) => {
                match self.fuse(spectral, spectral_hz, periodicity, periodic_hz, previous) {
                    Some(choice) => choice,
                    None => return self.reject(ResolveRule::Ambiguous, RejectionReason::Ambiguous),
                }
            }
        };

        if !(self.min_frequency_hz..=self.max_frequency_hz).contains(&choice.frequency) {
            return self.reject(choice.rule, RejectionReason::OutOfRange);
        }
        let Some((note, cents)) = nearest_note(choice.frequency) else {
            return self.reject(choice.rule, RejectionReason::OutOfRange);
        };

        debug!(
            "resolved {:.2} Hz ({note} {cents:+.1}c) via {:?} / {:?}",
            choice.frequency, choice.method, choice.rule
        );

        Resolution {
            pitch: Some(ResolvedPitch {
                frequency: choice.frequency,
                note: note.to_string(),
                cents,
                method: choice.method,
                fft_frequency: spectral.frequency,
                fft_confidence: spectral.frequency.map(|_| spectral.confidence_db),
            }),
            rule: choice.rule,
            rejection_reason: None,
        }
    }

    /// Both estimators produced a candidate.
    fn fuse(
        &self,
        spectral: &SpectralCandidate,
        spectral_hz: f32,
        periodicity: &AutocorrelationCandidate,
        periodic_hz: f32,
        previous: Option<&ResolvedPitch>,
    ) -> Option<Choice> {
        let cents = cents_between(spectral_hz, periodic_hz)?;
        let spectral_only = Choice {
            frequency: spectral_hz,
            method: PitchMethod::FftOnly,
            rule: ResolveRule::SpectralEdge,
        };
        let periodic_only = Choice {
            frequency: periodic_hz,
            method: PitchMethod::AutocorrFallback,
            rule: ResolveRule::PeriodicityEdge,
        };

        if cents.abs() <= self.agreement_cents {
            return Some(Choice {
                frequency: spectral_hz,
                method: PitchMethod::Hybrid,
                rule: ResolveRule::Agreement,
            });
        }

        let spectral_edge =
            spectral.confidence_db >= spectral.threshold_db + self.decisive_margin_db;
        let periodic_edge = periodicity.clarity >= self.decisive_clarity;
        let octave_below = (cents + 1200.0).abs() <= self.octave_tolerance_cents;
        let octave_above = (cents - 1200.0).abs() <= self.octave_tolerance_cents;

        match (spectral_edge, periodic_edge) {
            (true, false) => return Some(spectral_only),
            (false, true) => return Some(periodic_only),
            (true, true) if octave_below => {
                return Some(if self.has_sub_octave_fundamental(spectral) {
                    Choice {
                        frequency: spectral_hz / 2.0,
                        method: PitchMethod::Hybrid,
                        rule: ResolveRule::SubOctaveFundamental,
                    }
                } else {
                    Choice {
                        rule: ResolveRule::SubHarmonicRejected,
                        ..spectral_only
                    }
                });
            }
            (true, true) if octave_above => {
                return Some(Choice {
                    rule: ResolveRule::SpectralLowerOctave,
                    ..spectral_only
                });
            }
            _ => {}
        }

        let previous_hz = previous.map(|p| p.frequency)?;
        let continues = |hz: f32| {
            cents_between(previous_hz, hz).is_some_and(|c| c.abs() <= self.agreement_cents)
        };
        match (continues(spectral_hz), continues(periodic_hz)) {
            (true, false) => Some(Choice {
                rule: ResolveRule::Continuity,
                ..spectral_only
            }),
            (false, true) => Some(Choice {
                rule: ResolveRule::Continuity,
                ..periodic_only
            }),
            _ => None,
        }
    }

    fn has_sub_octave_fundamental(&self, spectral: &SpectralCandidate) -> bool {
        spectral.sub_octave_db.is_some_and(|level| {
            level >= spectral.threshold_db
                && spectral.confidence_db - level <= self.sub_octave_deficit_db
        })
    }

    fn reject(&self, rule: ResolveRule, reason: RejectionReason) -> Resolution {
        debug!("no pitch: {reason} ({rule:?})");
        Resolution {
            pitch: None,
            rule,
            rejection_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectral(frequency: f32, confidence_db: f32) -> SpectralCandidate {
        SpectralCandidate {
            frequency: Some(frequency),
            confidence_db,
            passed_threshold: confidence_db >= 20.0,
            threshold_db: 20.0,
            peak_db: confidence_db - 90.0,
            floor_db: -90.0,
            sub_octave_db: None,
            rejection_reason: (confidence_db < 20.0).then_some(RejectionReason::BelowNoiseFloor),
        }
    }

    fn periodic(frequency: f32, clarity: f32) -> AutocorrelationCandidate {
        AutocorrelationCandidate::found(frequency, 0.2, clarity)
    }

    fn no_periodicity() -> AutocorrelationCandidate {
        AutocorrelationCandidate::rejected(RejectionReason::NoPeriodicity, 0.2, 0.0)
    }

    fn resolver() -> HybridPitchResolver {
        HybridPitchResolver::new(&DetectorConfig::default()).unwrap()
    }

    fn resolve(spectral: SpectralCandidate, periodic: AutocorrelationCandidate) -> Resolution {
        resolver().resolve_detailed(&spectral, &periodic, None)
    }

    fn assert_ambiguous(resolution: &Resolution) {
        assert_eq!(resolution.pitch, None);
        assert_eq!(resolution.rule, ResolveRule::Ambiguous);
        assert_eq!(resolution.rejection_reason, Some(RejectionReason::Ambiguous));
    }

    #[test]
    fn agreement_reports_the_spectral_value() {
        let resolution = resolve(spectral(440.5, 50.0), periodic(441.5, 0.97));
        let pitch = resolution.pitch.unwrap();
        assert_eq!(resolution.rule, ResolveRule::Agreement);
        assert_eq!(pitch.method, PitchMethod::Hybrid);
        assert_eq!(pitch.frequency, 440.5);
        assert_eq!(pitch.note, "A4");
        assert_eq!(pitch.fft_frequency, Some(440.5));
        assert_eq!(pitch.fft_confidence, Some(50.0));
    }

    #[test]
    fn single_candidates_fall_back() {
        let fft = resolver()
            .resolve(&spectral(330.0, 40.0), &no_periodicity(), None)
            .unwrap();
        assert_eq!(fft.method, PitchMethod::FftOnly);

        let breathy = resolver()
            .resolve(&spectral(330.0, 10.0), &periodic(262.0, 0.8), None)
            .unwrap();
        assert_eq!(breathy.method, PitchMethod::AutocorrFallback);
        assert_eq!(breathy.frequency, 262.0);
        assert_eq!(breathy.note, "C4");
        assert_eq!(breathy.fft_frequency, Some(330.0));
    }

    #[test]
    fn nothing_in_nothing_out() {
        let silent = SpectralCandidate {
            frequency: None,
            rejection_reason: Some(RejectionReason::NoSignal),
            ..spectral(0.0, 0.0)
        };
        let quiet = AutocorrelationCandidate::rejected(RejectionReason::NoSignal, 0.0, 0.0);
        let resolution = resolver().resolve_detailed(&silent, &quiet, None);
        assert_eq!(resolution.pitch, None);
        assert_eq!(resolution.rule, ResolveRule::NoCandidate);
        assert_eq!(resolution.rejection_reason, Some(RejectionReason::NoSignal));
    }

    #[test]
    fn weak_fundamental_under_a_strong_harmonic_wins() {
        let harmonic = SpectralCandidate {
            sub_octave_db: Some(35.0),
            ..spectral(300.0, 55.0)
        };
        let resolution = resolve(harmonic, periodic(150.2, 0.97));
        let pitch = resolution.pitch.unwrap();
        assert_eq!(resolution.rule, ResolveRule::SubOctaveFundamental);
        assert_eq!(pitch.method, PitchMethod::Hybrid);
        assert_eq!(pitch.frequency, 150.0);
    }

    #[test]
    fn sub_harmonic_periodicity_is_rejected_without_spectral_support() {
        let clean = SpectralCandidate {
            sub_octave_db: Some(-5.0),
            ..spectral(220.0, 70.0)
        };
        let resolution = resolve(clean, periodic(110.0, 0.96));
        let pitch = resolution.pitch.unwrap();
        assert_eq!(resolution.rule, ResolveRule::SubHarmonicRejected);
        assert_eq!(pitch.method, PitchMethod::FftOnly);
        assert_eq!(pitch.frequency, 220.0);
    }

    #[test]
    fn octave_above_goes_to_the_confident_side() {
        let resolution = resolve(spectral(220.0, 25.0), periodic(440.0, 0.98));
        assert_eq!(resolution.rule, ResolveRule::PeriodicityEdge);
        assert_eq!(resolution.pitch.unwrap().frequency, 440.0);

        let resolution = resolve(spectral(220.0, 60.0), periodic(440.0, 0.9));
        assert_eq!(resolution.rule, ResolveRule::SpectralEdge);
        assert_eq!(resolution.pitch.unwrap().frequency, 220.0);

        let resolution = resolve(spectral(220.0, 60.0), periodic(440.0, 0.98));
        assert_eq!(resolution.rule, ResolveRule::SpectralLowerOctave);
        assert_eq!(resolution.pitch.unwrap().frequency, 220.0);
    }

    #[test]
    fn octave_below_goes_to_the_confident_side() {
        let resolution = resolve(spectral(220.0, 21.0), periodic(110.0, 0.99));
        assert_eq!(resolution.rule, ResolveRule::PeriodicityEdge);
        let pitch = resolution.pitch.unwrap();
        assert_eq!(pitch.method, PitchMethod::AutocorrFallback);
        assert_eq!(pitch.frequency, 110.0);

        // Sub-octave energy does not outvote a spectral edge.
        let harmonic = SpectralCandidate {
            sub_octave_db: Some(35.0),
            ..spectral(300.0, 55.0)
        };
        let resolution = resolve(harmonic, periodic(150.2, 0.9));
        assert_eq!(resolution.rule, ResolveRule::SpectralEdge);
        assert_eq!(resolution.pitch.unwrap().frequency, 300.0);
    }

    #[test]
    fn octave_apart_without_an_edge_is_ambiguous() {
        assert_ambiguous(&resolve(spectral(220.0, 25.0), periodic(440.0, 0.9)));
        assert_ambiguous(&resolve(spectral(440.0, 25.0), periodic(220.0, 0.9)));

        let supported = SpectralCandidate {
            sub_octave_db: Some(22.0),
            ..spectral(440.0, 25.0)
        };
        assert_ambiguous(&resolve(supported, periodic(220.0, 0.9)));
    }

    #[test]
    fn disagreement_without_an_edge_is_ambiguous() {
        assert_ambiguous(&resolve(spectral(300.0, 25.0), periodic(410.0, 0.9)));
    }

    #[test]
    fn previous_pitch_breaks_ties() {
        let previous = resolver().resolve(&spectral(409.0, 50.0), &periodic(409.5, 0.97), None);
        let resolution = resolver().resolve_detailed(
            &spectral(300.0, 25.0),
            &periodic(410.0, 0.9),
            previous.as_ref(),
        );
        assert_eq!(resolution.rule, ResolveRule::Continuity);
        let pitch = resolution.pitch.unwrap();
        assert_eq!(pitch.method, PitchMethod::AutocorrFallback);
        assert_eq!(pitch.frequency, 410.0);

        // Continuity also settles an octave disagreement.
        let previous = resolver().resolve(&spectral(219.0, 50.0), &periodic(219.5, 0.97), None);
        let resolution = resolver().resolve_detailed(
            &spectral(440.0, 25.0),
            &periodic(220.0, 0.9),
            previous.as_ref(),
        );
        assert_eq!(resolution.rule, ResolveRule::Continuity);
        assert_eq!(resolution.pitch.unwrap().frequency, 220.0);
    }

    #[test]
    fn out_of_range_choice_is_dropped() {
        let resolution = resolve(spectral(30.0, 40.0), no_periodicity());
        assert_eq!(resolution.pitch, None);
        assert_eq!(resolution.rejection_reason, Some(RejectionReason::OutOfRange));
    }
}
