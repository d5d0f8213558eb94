//! # Musical Tuning Module
//!
//! Pure conversions between frequencies, equal-tempered note names and cent
//! deviations, referenced to A4 = 440 Hz.
//!
//! ## Conventions
//! - Notes are counted in half steps from A4.
//! - Names cycle from A (`A, A#, B, C, ...`), sharps only on output.
//! - The octave number changes at C: `octave = floor((half_steps + 9) / 12) + 4`.
//! - Non-positive or non-finite frequencies are rejected with `None`.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reference pitch for A4 in Hz.
pub const A4_HZ: f32 = 440.0;

const NOTE_NAMES: [&str; 12] = [
    "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
];

/// Pitch class spellings accepted by the parser, mapped to semitones above C.
#[rustfmt::skip]
static PITCH_CLASSES: Lazy<BTreeMap<&'static str, i32>> = Lazy::new(|| {
    [
        ("C", 0), ("B#", 0),
        ("C#", 1), ("Db", 1),
        ("D", 2),
        ("D#", 3), ("Eb", 3),
        ("E", 4), ("Fb", 4),
        ("F", 5), ("E#", 5),
        ("F#", 6), ("Gb", 6),
        ("G", 7),
        ("G#", 8), ("Ab", 8),
        ("A", 9),
        ("A#", 10), ("Bb", 10),
        ("B", 11), ("Cb", 11),
    ]
    .into_iter()
    .collect()
});

/// An equal-tempered note, stored as its distance in half steps from A4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Note {
    half_steps: i32,
}

impl Note {
    pub const A4: Note = Note { half_steps: 0 };

    pub fn from_half_steps(half_steps: i32) -> Self {
        Self { half_steps }
    }

    pub fn from_midi(midi: i32) -> Self {
        Self { half_steps: midi - 69 }
    }

    pub fn half_steps(&self) -> i32 {
        self.half_steps
    }

    pub fn midi(&self) -> i32 {
        self.half_steps + 69
    }

    /// Chromatic name without the octave, e.g. `"C#"`.
    pub fn name(&self) -> &'static str {
        NOTE_NAMES[self.half_steps.rem_euclid(12) as usize]
    }

    pub fn octave(&self) -> i32 {
        (self.half_steps + 9).div_euclid(12) + 4
    }

    /// Equal-tempered frequency of this note in Hz.
    pub fn frequency(&self) -> f32 {
        A4_HZ * 2.0_f32.powf(self.half_steps as f32 / 12.0)
    }

    pub fn transpose(self, semitones: i32) -> Self {
        Self { half_steps: self.half_steps + semitones }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.octave())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognised note name `{0}`")]
pub struct ParseNoteError(pub String);

impl FromStr for Note {
    type Err = ParseNoteError;

    /// Parses names such as `"A4"`, `"C#3"`, `"Bb2"` or `"G-1"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit() || c == '-')
            .ok_or_else(|| ParseNoteError(s.to_string()))?;
        let (class, octave) = s.split_at(split);

        let mut class_chars = class.chars();
        let normalized: String = match class_chars.next() {
            Some(letter) => letter
                .to_uppercase()
                .chain(class_chars)
                .collect(),
            None => return Err(ParseNoteError(s.to_string())),
        };

        let pitch_class = *PITCH_CLASSES
            .get(normalized.as_str())
            .ok_or_else(|| ParseNoteError(s.to_string()))?;
        let octave: i32 = octave.parse().map_err(|_| ParseNoteError(s.to_string()))?;

        // B# and Cb cross the octave boundary relative to their written octave.
        let octave_shift = match normalized.as_str() {
            "B#" => 1,
            "Cb" => -1,
            _ => 0,
        };

        let half_steps = octave
            .checked_add(1 + octave_shift)
            .and_then(|octave| octave.checked_mul(12))
            .and_then(|midi| midi.checked_add(pitch_class - 69))
            .ok_or_else(|| ParseNoteError(s.to_string()))?;
        Ok(Note::from_half_steps(half_steps))
    }
}

fn is_valid_frequency(freq: f32) -> bool {
    freq.is_finite() && freq > 0.0
}

/// Rounds a frequency to the nearest equal-tempered note.
pub fn frequency_to_note(freq: f32) -> Option<Note> {
    if !is_valid_frequency(freq) {
        return None;
    }
    let half_steps = 12.0 * (freq / A4_HZ).log2();
    Some(Note::from_half_steps(half_steps.round() as i32))
}

/// Canonical frequency of a note in Hz.
pub fn note_to_frequency(note: Note) -> f32 {
    note.frequency()
}

/// Signed distance in cents from `from_hz` to `to_hz`.
///
/// Positive when `to_hz` is sharp relative to `from_hz`.
pub fn cents_between(from_hz: f32, to_hz: f32) -> Option<f32> {
    if !is_valid_frequency(from_hz) || !is_valid_frequency(to_hz) {
        return None;
    }
    Some(1200.0 * (to_hz / from_hz).log2())
}

/// Finds the nearest note and how far `freq` deviates from it in cents.
pub fn nearest_note(freq: f32) -> Option<(Note, f32)> {
    let note = frequency_to_note(freq)?;
    let cents = cents_between(note.frequency(), freq)?;
    Some((note, cents))
}

/// Frequency `semitones` equal-tempered half steps away from `root_hz`.
pub fn interval_frequency(root_hz: f32, semitones: i32) -> f32 {
    root_hz * 2.0_f32.powf(semitones as f32 / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_octaves_change_at_c() {
        assert_eq!(Note::A4.to_string(), "A4");
        assert_eq!(Note::from_half_steps(2).to_string(), "B4");
        assert_eq!(Note::from_half_steps(3).to_string(), "C5");
        assert_eq!(Note::from_half_steps(-9).to_string(), "C4");
        assert_eq!(Note::from_half_steps(-10).to_string(), "B3");
        assert_eq!(Note::from_half_steps(-48).to_string(), "A0");
    }

    #[test]
    fn parses_sharps_flats_and_negative_octaves() {
        assert_eq!("A4".parse::<Note>().unwrap(), Note::A4);
        assert_eq!("c4".parse::<Note>().unwrap().midi(), 60);
        assert_eq!("C#4".parse::<Note>().unwrap(), "Db4".parse::<Note>().unwrap());
        assert_eq!("Bb3".parse::<Note>().unwrap().to_string(), "A#3");
        assert_eq!("B#3".parse::<Note>().unwrap().to_string(), "C4");
        assert_eq!("Cb4".parse::<Note>().unwrap().to_string(), "B3");
        assert_eq!("C-1".parse::<Note>().unwrap().midi(), 0);
        assert!("H2".parse::<Note>().is_err());
        assert!("A".parse::<Note>().is_err());
        assert!("".parse::<Note>().is_err());
    }

    #[test]
    fn absurd_octaves_are_parse_errors() {
        assert!("C2147483647".parse::<Note>().is_err());
        assert!("B#2147483647".parse::<Note>().is_err());
        assert!("C-2147483648".parse::<Note>().is_err());
        assert_eq!("G9".parse::<Note>().unwrap().midi(), 127);
    }

    #[test]
    fn round_trip_stays_within_half_a_semitone() {
        let mut freq = 80.0_f32;
        while freq <= 2000.0 {
            let note = frequency_to_note(freq).unwrap();
            let cents = cents_between(note_to_frequency(note), freq).unwrap();
            assert!(cents.abs() <= 50.01, "{freq} Hz -> {note} is {cents} cents away");
            freq *= 1.0037;
        }
    }

    #[test]
    fn cents_sign_follows_direction() {
        let up = cents_between(440.0, 466.16).unwrap();
        let down = cents_between(466.16, 440.0).unwrap();
        assert!((up - 100.0).abs() < 0.1, "{up}");
        assert!((down + 100.0).abs() < 0.1, "{down}");
        assert_eq!(cents_between(440.0, 880.0).map(f32::round), Some(1200.0));
    }

    #[test]
    fn rejects_non_positive_frequencies() {
        assert_eq!(frequency_to_note(0.0), None);
        assert_eq!(frequency_to_note(-220.0), None);
        assert_eq!(frequency_to_note(f32::NAN), None);
        assert_eq!(cents_between(0.0, 440.0), None);
        assert_eq!(cents_between(440.0, -1.0), None);
        assert_eq!(nearest_note(0.0), None);
    }

    #[test]
    fn nearest_note_reports_deviation() {
        let (note, cents) = nearest_note(445.0).unwrap();
        assert_eq!(note, Note::A4);
        assert!((cents - 19.56).abs() < 0.05, "{cents}");
        assert!((interval_frequency(440.0, 7) - 659.255).abs() < 0.01);
        assert!((interval_frequency(440.0, -12) - 220.0).abs() < 1e-3);
    }
}
