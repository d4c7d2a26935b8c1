//! # Chord Template Library
//!
//! Static table of chord qualities, from triads through sevenths, each
//! described by its semitone offsets from the root.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::pitch::{PITCH_CLASSES, pitch_class_name};

/// Chord quality recognized by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Suspended2,
    Suspended4,
    Major6,
    Minor6,
    Dominant7,
    Major7,
    Minor7,
    MinorMajor7,
    Diminished7,
    HalfDiminished7,
}

impl ChordQuality {
    /// Common functional harmony: triads, suspensions, the major sixth and
    /// the three everyday sevenths.
    pub fn is_functional(self) -> bool {
        use ChordQuality::*;
        matches!(
            self,
            Major | Minor | Diminished | Augmented | Suspended2 | Suspended4 | Major6 | Dominant7
                | Major7 | Minor7
        )
    }
}

/// One chord quality and its interval formula.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordTemplate {
    pub quality: ChordQuality,
    /// Appended to the root name to form the chord label
    pub suffix: &'static str,
    /// Semitone offsets from the root, root first
    pub intervals: &'static [u8],
    /// Bit i set when offset i is in `intervals`
    pub mask: u16,
}

impl ChordTemplate {
    fn new(quality: ChordQuality, suffix: &'static str, intervals: &'static [u8]) -> Self {
        let mask = intervals.iter().fold(0u16, |mask, &i| mask | 1 << i);
        Self {
            quality,
            suffix,
            intervals,
            mask,
        }
    }

    /// Number of tones in the chord.
    pub fn size(&self) -> usize {
        self.intervals.len()
    }

    /// Pitch classes of this chord rooted on `root`.
    pub fn pitch_classes(&self, root: u8) -> impl Iterator<Item = u8> + '_ {
        self.intervals
            .iter()
            .map(move |&i| (root + i) % PITCH_CLASSES as u8)
    }

    /// `mask` transposed to `root`: bit `pc` set when pitch class `pc` is in the chord.
    pub fn rotated_mask(&self, root: u8) -> u16 {
        let n = PITCH_CLASSES as u32;
        let r = root as u32 % n;
        let full = (1u16 << n) - 1;
        ((self.mask << r) | (self.mask >> (n - r))) & full
    }

    /// Display label, e.g. "C major", "A minor", "G7".
    pub fn label(&self, root: u8) -> String {
        format!("{}{}", pitch_class_name(root), self.suffix)
    }
}

/// The template table, built once.
static TEMPLATES: Lazy<Vec<ChordTemplate>> = Lazy::new(|| {
    use ChordQuality::*;
    vec![
        // Triads
        ChordTemplate::new(Major, " major", &[0, 4, 7]),
        ChordTemplate::new(Minor, " minor", &[0, 3, 7]),
        ChordTemplate::new(Diminished, "dim", &[0, 3, 6]),
        ChordTemplate::new(Augmented, "aug", &[0, 4, 8]),
        ChordTemplate::new(Suspended2, "sus2", &[0, 2, 7]),
        ChordTemplate::new(Suspended4, "sus4", &[0, 5, 7]),
        // Sixths
        ChordTemplate::new(Major6, "6", &[0, 4, 7, 9]),
        ChordTemplate::new(Minor6, "m6", &[0, 3, 7, 9]),
        // Sevenths
        ChordTemplate::new(Dominant7, "7", &[0, 4, 7, 10]),
        ChordTemplate::new(Major7, "maj7", &[0, 4, 7, 11]),
        ChordTemplate::new(Minor7, "m7", &[0, 3, 7, 10]),
        ChordTemplate::new(MinorMajor7, "m(maj7)", &[0, 3, 7, 11]),
        ChordTemplate::new(Diminished7, "dim7", &[0, 3, 6, 9]),
        ChordTemplate::new(HalfDiminished7, "m7b5", &[0, 3, 6, 10]),
    ]
});

/// Read-only access to the chord template table.
pub struct ChordTemplateLibrary;

impl ChordTemplateLibrary {
    pub fn all() -> &'static [ChordTemplate] {
        &TEMPLATES
    }

    pub fn get(quality: ChordQuality) -> Option<&'static ChordTemplate> {
        TEMPLATES.iter().find(|t| t.quality == quality)
    }

    /// The major triad, used as the matcher's fallback.
    pub fn major_triad() -> &'static ChordTemplate {
        &TEMPLATES[0]
    }
}
