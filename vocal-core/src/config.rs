//! # Configuration Module
//!
//! Every tunable of the detection pipeline and the match tracker. All structs
//! deserialize with defaults for missing fields so a partial JSON file is enough,
//! and every struct validates eagerly: bad values fail at configuration time,
//! never during a tick.

use crate::audio::BUFFER_SIZE;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Which periodicity estimator runs next to the spectral estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodicityMethod {
    /// Normalized square difference with key-maxima peak picking.
    #[default]
    Nsdf,
    /// Cumulative-mean-normalized difference (YIN).
    Yin,
}

/// Tunables for the spectral and periodicity estimators and the hybrid resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Lower edge of the vocal search range in Hz.
    pub min_frequency_hz: f32,
    /// Upper edge of the vocal search range in Hz.
    pub max_frequency_hz: f32,
    /// Lowest spectral floor in dBFS; the measured band median can only raise it.
    pub noise_floor_db: f32,
    /// Minimum peak height above the floor, in dB, for the spectral candidate to pass.
    pub min_confidence_db: f32,
    /// Fraction of the highest key maximum a lag peak needs to be picked (0, 1].
    pub clarity_threshold: f32,
    /// Absolute clarity below which a periodicity candidate is discarded.
    pub min_clarity: f32,
    /// RMS below which a buffer counts as silence.
    pub min_volume_rms: f32,
    /// Window, in cents, inside which both estimators are said to agree.
    pub agreement_cents: f32,
    /// Window, in cents, around an exact octave for the octave rule to apply.
    pub octave_tolerance_cents: f32,
    /// Extra dB over `min_confidence_db` that gives the spectral candidate a clear edge.
    pub decisive_margin_db: f32,
    /// Clarity that gives the periodicity candidate a clear edge.
    pub decisive_clarity: f32,
    /// How far, in dB, the level one octave below the spectral peak may sit under the
    /// peak and still count as a weak fundamental.
    pub sub_octave_deficit_db: f32,
    pub periodicity: PeriodicityMethod,
    /// Absolute dip threshold used by the YIN estimator.
    pub yin_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_frequency_hz: 50.0,
            max_frequency_hz: 2000.0,
            noise_floor_db: -90.0,
            min_confidence_db: 20.0,
            clarity_threshold: 0.9,
            min_clarity: 0.6,
            min_volume_rms: 0.01,
            agreement_cents: 35.0,
            octave_tolerance_cents: 50.0,
            decisive_margin_db: 15.0,
            decisive_clarity: 0.95,
            sub_octave_deficit_db: 30.0,
            periodicity: PeriodicityMethod::Nsdf,
            yin_threshold: 0.15,
        }
    }
}

impl DetectorConfig {
    /// Sets the silence gate from a level in dBFS instead of a linear RMS.
    pub fn with_min_volume_db(mut self, decibels: f32) -> Self {
        self.min_volume_rms = 10.0_f32.powf(decibels / 20.0);
        self
    }

    pub fn min_volume_db(&self) -> f32 {
        20.0 * self.min_volume_rms.log10()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let (min_hz, max_hz) = (self.min_frequency_hz, self.max_frequency_hz);
        if !(min_hz.is_finite() && max_hz.is_finite() && min_hz > 0.0 && min_hz < max_hz) {
            return Err(ConfigError::InvalidSearchRange { min_hz, max_hz });
        }
        check_finite("noise_floor_db", self.noise_floor_db)?;
        check_positive("min_confidence_db", self.min_confidence_db)?;
        check_unit_interval("clarity_threshold", self.clarity_threshold)?;
        check_unit_interval("min_clarity", self.min_clarity)?;
        check_positive("min_volume_rms", self.min_volume_rms)?;
        check_positive("agreement_cents", self.agreement_cents)?;
        check_positive("octave_tolerance_cents", self.octave_tolerance_cents)?;
        if self.octave_tolerance_cents >= 600.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "octave_tolerance_cents",
                value: self.octave_tolerance_cents,
            });
        }
        check_positive("decisive_margin_db", self.decisive_margin_db)?;
        check_unit_interval("decisive_clarity", self.decisive_clarity)?;
        check_positive("sub_octave_deficit_db", self.sub_octave_deficit_db)?;
        check_unit_interval("yin_threshold", self.yin_threshold)?;
        Ok(())
    }

    /// Checks the search range against the Nyquist limit of a capture rate.
    pub fn validate_for_sample_rate(&self, sample_rate: u32) -> ConfigResult<()> {
        self.validate()?;
        if sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        let nyquist_hz = sample_rate as f32 / 2.0;
        if self.max_frequency_hz >= nyquist_hz {
            return Err(ConfigError::AboveNyquist {
                max_hz: self.max_frequency_hz,
                nyquist_hz,
            });
        }
        Ok(())
    }
}

/// How close and for how long a voice has to stay on target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Allowed deviation as a fraction of the target frequency.
    pub tolerance_ratio: f32,
    /// Consecutive in-tolerance readings needed before time is credited.
    pub required_stable_readings: usize,
    /// Credited time needed to complete a hold.
    pub required_matched_ms: f32,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            tolerance_ratio: 0.02,
            required_stable_readings: 3,
            required_matched_ms: 2000.0,
        }
    }
}

impl ToleranceConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.tolerance_ratio.is_finite()
            && self.tolerance_ratio > 0.0
            && self.tolerance_ratio < 1.0)
        {
            return Err(ConfigError::InvalidTolerance(self.tolerance_ratio));
        }
        if self.required_stable_readings == 0 {
            return Err(ConfigError::ZeroStableReadings);
        }
        if !(self.required_matched_ms.is_finite() && self.required_matched_ms > 0.0) {
            return Err(ConfigError::InvalidMatchedTime(self.required_matched_ms));
        }
        Ok(())
    }
}

/// Top-level settings for a training session, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub detector: DetectorConfig,
    pub tolerance: ToleranceConfig,
    /// Samples per analysis frame; must be a power of two.
    pub buffer_size: usize,
    /// Interval between detection ticks.
    pub tick_interval_ms: u64,
    /// Input device name; `None` picks the host default.
    pub input_device: Option<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            tolerance: ToleranceConfig::default(),
            buffer_size: BUFFER_SIZE,
            tick_interval_ms: 50,
            input_device: None,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.detector.validate()?;
        self.tolerance.validate()?;
        if self.buffer_size == 0 || !self.buffer_size.is_power_of_two() {
            return Err(ConfigError::InvalidBufferLength(self.buffer_size));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidThreshold {
                name: "tick_interval_ms",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: TrainerConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}

fn check_finite(name: &'static str, value: f32) -> ConfigResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { name, value })
    }
}

fn check_positive(name: &'static str, value: f32) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { name, value })
    }
}

fn check_unit_interval(name: &'static str, value: f32) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainerConfig::default().validate().unwrap();
        DetectorConfig::default().validate_for_sample_rate(44_100).unwrap();
    }

    #[test]
    fn rejects_bad_detector_values() {
        let inverted = DetectorConfig {
            min_frequency_hz: 900.0,
            max_frequency_hz: 100.0,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidSearchRange { .. })
        ));

        let clarity = DetectorConfig {
            clarity_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            clarity.validate(),
            Err(ConfigError::InvalidThreshold { name: "clarity_threshold", .. })
        ));

        let too_high = DetectorConfig::default().validate_for_sample_rate(3000);
        assert!(matches!(too_high, Err(ConfigError::AboveNyquist { .. })));
    }

    #[test]
    fn rejects_bad_tolerance_values() {
        let negative = ToleranceConfig {
            tolerance_ratio: -0.02,
            ..Default::default()
        };
        assert!(matches!(negative.validate(), Err(ConfigError::InvalidTolerance(_))));

        let zero_readings = ToleranceConfig {
            required_stable_readings: 0,
            ..Default::default()
        };
        assert!(matches!(zero_readings.validate(), Err(ConfigError::ZeroStableReadings)));

        let no_hold = ToleranceConfig {
            required_matched_ms: 0.0,
            ..Default::default()
        };
        assert!(matches!(no_hold.validate(), Err(ConfigError::InvalidMatchedTime(_))));
    }

    #[test]
    fn volume_can_be_given_in_decibels() {
        let config = DetectorConfig::default().with_min_volume_db(-40.0);
        assert!((config.min_volume_rms - 0.01).abs() < 1e-6);
        assert!((config.min_volume_db() + 40.0).abs() < 1e-3);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{
            "tolerance": { "tolerance_ratio": 0.05 },
            "detector": { "periodicity": "yin" }
        }"#;
        let config: TrainerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tolerance.tolerance_ratio, 0.05);
        assert_eq!(config.tolerance.required_stable_readings, 3);
        assert_eq!(config.detector.periodicity, PeriodicityMethod::Yin);
        assert_eq!(config.buffer_size, 2048);
        config.validate().unwrap();
    }

    #[test]
    fn save_then_load_from_disk() {
        let path = std::env::temp_dir()
            .join(format!("vocal-core-config-{}.json", std::process::id()));
        let config = TrainerConfig {
            buffer_size: 4096,
            input_device: Some("USB Mic".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = TrainerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);

        let bad = TrainerConfig {
            buffer_size: 1000,
            ..Default::default()
        };
        bad.save(&path).unwrap();
        let result = TrainerConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::InvalidBufferLength(1000))));
    }
}
