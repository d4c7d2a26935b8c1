//! # Key Estimation Module
//!
//! Krumhansl-Schmuckler key finding over the final chord segments.
//!
//! Each segment contributes its duration to every pitch class it contains;
//! the resulting distribution (normalized by total duration) is scored
//! against the major and minor profiles rotated to each of the 12 tonics.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::note::NoteEvent;
use crate::pitch::{PITCH_CLASSES, pitch_class_name};
use crate::segment::ChordSegment;

/// Krumhansl-Kessler major key profile.
pub const MAJOR_PROFILE: [f32; PITCH_CLASSES] =
    [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor key profile.
pub const MINOR_PROFILE: [f32; PITCH_CLASSES] =
    [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

/// Scores closer than this fraction of the best score are treated as ties.
const SCORE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn profile(self) -> &'static [f32; PITCH_CLASSES] {
        match self {
            Mode::Major => &MAJOR_PROFILE,
            Mode::Minor => &MINOR_PROFILE,
        }
    }

    /// Semitone offsets of the major or natural minor scale.
    pub fn scale(self) -> &'static [u8] {
        match self {
            Mode::Major => &[0, 2, 4, 5, 7, 9, 11],
            Mode::Minor => &[0, 2, 3, 5, 7, 8, 10],
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        })
    }
}

/// A resolved key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Tonic pitch class (0 = C); named ("C", "F#") on the wire
    #[serde(rename = "key", with = "crate::pitch::pitch_class_serde")]
    pub tonic: u8,
    pub mode: Mode,
    /// Winning profile dot product (unbounded)
    pub score: f32,
    /// Pearson correlation with the winning profile, clamped to [0, 1]
    pub confidence: f32,
}

impl Key {
    pub fn name(&self) -> String {
        format!("{} {}", pitch_class_name(self.tonic), self.mode)
    }

    /// Whether `pitch_class` belongs to this key's scale.
    pub fn contains(&self, pitch_class: u8) -> bool {
        let offset = (pitch_class as usize + PITCH_CLASSES - self.tonic as usize) % PITCH_CLASSES;
        self.mode.scale().contains(&(offset as u8))
    }
}

/// Result of key estimation; `Unknown` when there is nothing to analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum KeyEstimate {
    Unknown,
    Estimated(Key),
}

impl KeyEstimate {
    pub fn key(&self) -> Option<&Key> {
        match self {
            KeyEstimate::Estimated(key) => Some(key),
            KeyEstimate::Unknown => None,
        }
    }
}

impl fmt::Display for KeyEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEstimate::Unknown => f.write_str("Unknown"),
            KeyEstimate::Estimated(key) => f.write_str(&key.name()),
        }
    }
}

/// Correlates duration-weighted pitch-class content against key profiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyEstimator;

impl KeyEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Estimates the key of a segment sequence.
    ///
    /// Ties go to major, then to the lower tonic.
    pub fn estimate(&self, segments: &[ChordSegment]) -> KeyEstimate {
        match pitch_class_distribution(segments) {
            Some(distribution) => self.estimate_distribution(&distribution),
            None => KeyEstimate::Unknown,
        }
    }

    /// Estimates the key of raw note events, each weighted by duration x confidence.
    pub fn estimate_notes(&self, notes: &[NoteEvent]) -> KeyEstimate {
        match note_distribution(notes) {
            Some(distribution) => self.estimate_distribution(&distribution),
            None => KeyEstimate::Unknown,
        }
    }

    /// Scores a normalized pitch-class distribution against all 24 keys.
    pub fn estimate_distribution(&self, distribution: &[f32; PITCH_CLASSES]) -> KeyEstimate {
        let mut best: Option<(u8, Mode, f32)> = None;
        for mode in [Mode::Major, Mode::Minor] {
            for tonic in 0..PITCH_CLASSES as u8 {
                let score = dot(&rotate(distribution, tonic), mode.profile());
                let better = match best {
                    None => true,
                    Some((_, _, best_score)) => {
                        score > best_score + SCORE_EPSILON * best_score.abs().max(1.0)
                    }
                };
                if better {
                    best = Some((tonic, mode, score));
                }
            }
        }

        let Some((tonic, mode, score)) = best else {
            return KeyEstimate::Unknown;
        };
        let confidence = pearson(&rotate(distribution, tonic), mode.profile()).clamp(0.0, 1.0);
        let key = Key {
            tonic,
            mode,
            score,
            confidence,
        };
        debug!(key = %key.name(), score, confidence, "estimated key");
        KeyEstimate::Estimated(key)
    }
}

/// Per pitch class, total seconds of segments containing it, divided by the
/// total segment duration. `None` when no segment contributes.
pub fn pitch_class_distribution(segments: &[ChordSegment]) -> Option<[f32; PITCH_CLASSES]> {
    let mut histogram = [0.0_f64; PITCH_CLASSES];
    let mut total = 0.0_f64;
    for segment in segments {
        let duration = segment.duration();
        if !(duration > 0.0) {
            continue;
        }
        total += duration;
        for &pc in &segment.pitch_classes {
            histogram[(pc as usize) % PITCH_CLASSES] += duration;
        }
    }
    if total <= 0.0 || histogram.iter().all(|&h| h == 0.0) {
        return None;
    }
    Some(histogram.map(|h| (h / total) as f32))
}

/// Per pitch class, summed duration x confidence of the notes, normalized to
/// sum to one. `None` when nothing carries weight.
pub fn note_distribution(notes: &[NoteEvent]) -> Option<[f32; PITCH_CLASSES]> {
    let mut histogram = [0.0_f64; PITCH_CLASSES];
    for note in notes {
        let weight = note.duration() * note.confidence as f64;
        if weight > 0.0 {
            histogram[note.pitch_class() as usize] += weight;
        }
    }
    let total: f64 = histogram.iter().sum();
    if !(total > 0.0) {
        return None;
    }
    Some(histogram.map(|h| (h / total) as f32))
}

/// `rotated[i] = values[(i + tonic) % 12]`, so index 0 is the candidate tonic.
fn rotate(values: &[f32; PITCH_CLASSES], tonic: u8) -> [f32; PITCH_CLASSES] {
    std::array::from_fn(|i| values[(i + tonic as usize) % PITCH_CLASSES])
}

fn dot(a: &[f32; PITCH_CLASSES], b: &[f32; PITCH_CLASSES]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn pearson(x: &[f32; PITCH_CLASSES], y: &[f32; PITCH_CLASSES]) -> f32 {
    let n = PITCH_CLASSES as f32;
    let x_mean = x.iter().sum::<f32>() / n;
    let y_mean = y.iter().sum::<f32>() / n;

    let (mut num, mut x_sq, mut y_sq) = (0.0, 0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        let (xd, yd) = (xi - x_mean, yi - y_mean);
        num += xd * yd;
        x_sq += xd * xd;
        y_sq += yd * yd;
    }

    let denom = (x_sq * y_sq).sqrt();
    if denom < 1e-10 { 0.0 } else { num / denom }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seg(start: f64, end: f64, name: &str, pcs: &[u8]) -> ChordSegment {
        ChordSegment::new(start, end, name, 0.9, pcs.iter().copied())
    }

    #[test]
    fn empty_sequence_is_unknown() {
        let estimate = KeyEstimator::new().estimate(&[]);
        assert_eq!(estimate, KeyEstimate::Unknown);
        assert_eq!(estimate.to_string(), "Unknown");
    }

    #[test]
    fn c_major_triads_give_c_major() {
        let segments = vec![
            seg(0.0, 2.0, "C major", &[0, 4, 7]),
            seg(2.0, 3.5, "C major", &[0, 4, 7]),
        ];
        let key = KeyEstimator::new().estimate(&segments);
        let key = key.key().unwrap();
        assert_eq!(key.tonic, 0);
        assert_eq!(key.mode, Mode::Major);
        assert_eq!(key.name(), "C major");
        assert!(key.confidence > 0.0 && key.confidence <= 1.0);
    }

    #[test]
    fn a_minor_progression() {
        // Am - Dm - E - Am
        let segments = vec![
            seg(0.0, 4.0, "A minor", &[9, 0, 4]),
            seg(4.0, 6.0, "D minor", &[2, 5, 9]),
            seg(6.0, 8.0, "E major", &[4, 8, 11]),
            seg(8.0, 12.0, "A minor", &[9, 0, 4]),
        ];
        let key = KeyEstimator::new().estimate(&segments);
        assert_eq!(key.to_string(), "A minor");
    }

    #[test]
    fn g_major_progression() {
        // G - C - D - G
        let segments = vec![
            seg(0.0, 4.0, "G major", &[7, 11, 2]),
            seg(4.0, 6.0, "C major", &[0, 4, 7]),
            seg(6.0, 8.0, "D major", &[2, 6, 9]),
            seg(8.0, 12.0, "G major", &[7, 11, 2]),
        ];
        let key = KeyEstimator::new().estimate(&segments);
        assert_eq!(key.to_string(), "G major");
    }

    #[test]
    fn uniform_content_resolves_to_tonic_c() {
        let segments = vec![seg(0.0, 1.0, "x", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11])];
        let key = KeyEstimator::new().estimate(&segments);
        let key = key.key().unwrap();
        // Every rotation scores the profile's sum; the minor profile's is larger.
        assert_eq!((key.tonic, key.mode), (0, Mode::Minor));
    }

    #[test]
    fn tritone_symmetric_content_prefers_the_lower_tonic() {
        // D and G# repeat every six semitones, so D and G# tonics score the same.
        let segments = vec![seg(0.0, 2.0, "x", &[2, 8])];
        let key = KeyEstimator::new().estimate(&segments);
        let key = key.key().unwrap();
        assert_eq!((key.tonic, key.mode), (2, Mode::Major));
    }

    #[test]
    fn major_wins_a_tie_with_minor() {
        // C major and C minor both score 6.35 + 2.52 = 6.33 + 2.54 here.
        let segments = vec![seg(0.0, 2.0, "x", &[0, 6])];
        let distribution = pitch_class_distribution(&segments).unwrap();
        let major = dot(&rotate(&distribution, 0), &MAJOR_PROFILE);
        let minor = dot(&rotate(&distribution, 0), &MINOR_PROFILE);
        assert!((major - minor).abs() < 1e-5);

        let key = KeyEstimator::new().estimate(&segments);
        assert_eq!(key.to_string(), "C major");
    }

    #[test]
    fn segments_without_pitch_classes_are_unknown() {
        let segments = vec![seg(0.0, 2.0, "N", &[])];
        assert_eq!(KeyEstimator::new().estimate(&segments), KeyEstimate::Unknown);
    }

    #[test]
    fn distribution_is_duration_weighted() {
        let segments = vec![seg(0.0, 3.0, "x", &[0]), seg(3.0, 4.0, "y", &[7])];
        let dist = pitch_class_distribution(&segments).unwrap();
        assert!((dist[0] - 0.75).abs() < 1e-6);
        assert!((dist[7] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn notes_estimate_like_segments() {
        let notes: Vec<NoteEvent> = [60, 64, 67, 65, 62, 71]
            .iter()
            .enumerate()
            .map(|(i, &pitch)| NoteEvent {
                onset: i as f64 * 0.5,
                offset: i as f64 * 0.5 + if pitch % 12 == 0 { 3.0 } else { 1.0 },
                pitch,
                confidence: 0.8,
            })
            .collect();
        let key = KeyEstimator::new().estimate_notes(&notes);
        assert_eq!(key.to_string(), "C major");
        assert_eq!(KeyEstimator::new().estimate_notes(&[]), KeyEstimate::Unknown);
    }

    #[test]
    fn scale_membership() {
        let a_minor = Key {
            tonic: 9,
            mode: Mode::Minor,
            score: 0.0,
            confidence: 1.0,
        };
        let in_key: Vec<u8> = (0..12).filter(|&pc| a_minor.contains(pc)).collect();
        assert_eq!(in_key, vec![0, 2, 4, 5, 7, 9, 11]);
        assert!(!a_minor.contains(8));
    }

    #[test]
    fn key_serializes_with_its_name() {
        let estimate = KeyEstimate::Estimated(Key {
            tonic: 6,
            mode: Mode::Major,
            score: 2.0,
            confidence: 0.5,
        });
        let json = serde_json::to_value(&estimate).unwrap();
        assert_eq!(json["status"], "estimated");
        assert_eq!(json["key"], "F#");
        assert_eq!(json["mode"], "major");
        let back: KeyEstimate = serde_json::from_value(json).unwrap();
        assert_eq!(back, estimate);
    }

    #[test]
    fn rotation_aligns_tonic_to_index_zero() {
        let mut values = [0.0; PITCH_CLASSES];
        values[9] = 1.0;
        assert_eq!(rotate(&values, 9)[0], 1.0);
    }
}
