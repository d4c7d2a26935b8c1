//! # Pitch Class Module
//!
//! Equal-temperament helpers shared by the transform, matcher and key
//! estimator: pitch class naming, frequency to MIDI conversion, and the
//! `PitchClassWeights` accumulator.
//!
//! Pitch classes are encoded 0 (C) through 11 (B), matching `midi % 12`.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of pitch classes in an octave.
pub const PITCH_CLASSES: usize = 12;

/// Sharp spellings, indexed by pitch class.
pub const PITCH_CLASS_NAMES: [&str; PITCH_CLASSES] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Name to pitch class lookup, accepting both sharp and flat spellings.
static NAME_MAP: Lazy<BTreeMap<&'static str, u8>> = Lazy::new(|| {
    const FLATS: [(&str, u8); 5] = [("Db", 1), ("Eb", 3), ("Gb", 6), ("Ab", 8), ("Bb", 10)];
    PITCH_CLASS_NAMES
        .iter()
        .enumerate()
        .map(|(pc, &name)| (name, pc as u8))
        .chain(FLATS)
        .collect()
});

/// Returns the sharp spelling of a pitch class (wraps values above 11).
pub fn pitch_class_name(pitch_class: u8) -> &'static str {
    PITCH_CLASS_NAMES[(pitch_class as usize) % PITCH_CLASSES]
}

/// Parses a note name such as "C#", "Bb" or "A" into a pitch class.
pub fn parse_pitch_class(name: &str) -> Option<u8> {
    NAME_MAP.get(name).copied()
}

/// Serializes a pitch class as its name ("C", "F#"); accepts flats when reading.
pub mod pitch_class_serde {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(pitch_class: &u8, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(super::pitch_class_name(*pitch_class))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
        let name = String::deserialize(deserializer)?;
        super::parse_pitch_class(&name)
            .ok_or_else(|| D::Error::custom(format!("unknown pitch class name {name:?}")))
    }
}

/// Converts a frequency to a fractional MIDI note number (A4 = 440 Hz = 69).
pub fn frequency_to_midi(freq: f32) -> f32 {
    69.0 + 12.0 * (freq / 440.0).log2()
}

/// Pitch class of the equal-tempered note nearest to `freq`.
pub fn pitch_class_of_frequency(freq: f32) -> u8 {
    (frequency_to_midi(freq).round() as i32).rem_euclid(PITCH_CLASSES as i32) as u8
}

/// Non-negative weight per pitch class, aggregated over a chromagram or a
/// time window of observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchClassWeights([f32; PITCH_CLASSES]);

impl PitchClassWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to a pitch class. Negative or non-finite weights are ignored.
    pub fn add(&mut self, pitch_class: u8, weight: f32) {
        if weight.is_finite() && weight > 0.0 {
            self.0[(pitch_class as usize) % PITCH_CLASSES] += weight;
        }
    }

    pub fn get(&self, pitch_class: u8) -> f32 {
        self.0[(pitch_class as usize) % PITCH_CLASSES]
    }

    pub fn as_array(&self) -> &[f32; PITCH_CLASSES] {
        &self.0
    }

    pub fn total(&self) -> f32 {
        self.0.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w <= 0.0)
    }

    /// Pitch classes with a positive weight, in ascending pitch-class order.
    pub fn present(&self) -> impl Iterator<Item = (u8, f32)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w > 0.0)
            .map(|(pc, &w)| (pc as u8, w))
    }
}

impl FromIterator<(u8, f32)> for PitchClassWeights {
    fn from_iter<I: IntoIterator<Item = (u8, f32)>>(iter: I) -> Self {
        let mut weights = Self::new();
        for (pc, w) in iter {
            weights.add(pc, w);
        }
        weights
    }
}
