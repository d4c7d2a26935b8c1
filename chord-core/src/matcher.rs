//! # Chord Matcher
//!
//! Turns a weighted pitch-class set into a chord label and a confidence.
//!
//! Every significant pitch class is tried as a root against every template,
//! so chords voiced without the root in the bass are still recognized.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::MatcherConfig;
use crate::error::Result;
use crate::pitch::{PITCH_CLASSES, PitchClassWeights};
use crate::templates::{ChordQuality, ChordTemplate, ChordTemplateLibrary};

/// Label used when no chord could be formed.
pub const NO_CHORD: &str = "N";

/// Scores closer than this fraction of the total significant weight are ties.
const SCORE_EPSILON: f32 = 1e-6;

/// Result of matching one set of weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordMatch {
    /// "C major", "A minor", "G7", ... or `NO_CHORD`
    pub name: String,
    pub root: Option<u8>,
    pub quality: Option<ChordQuality>,
    /// In [0, 1]; 0 for no chord
    pub confidence: f32,
    /// The significant pitch classes the decision was based on, ascending
    pub pitch_classes: Vec<u8>,
}

impl ChordMatch {
    pub fn none() -> Self {
        Self {
            name: NO_CHORD.to_string(),
            root: None,
            quality: None,
            confidence: 0.0,
            pitch_classes: Vec::new(),
        }
    }

    pub fn is_chord(&self) -> bool {
        self.root.is_some()
    }
}

struct Candidate {
    root: u8,
    template: &'static ChordTemplate,
    score: f32,
}

impl Candidate {
    /// Higher score first, then fewer tones, then the lower root.
    fn beats(&self, other: &Candidate, epsilon: f32) -> bool {
        if (self.score - other.score).abs() > epsilon {
            return self.score > other.score;
        }
        match self.template.size().cmp(&other.template.size()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.root < other.root,
        }
    }
}

/// Template matcher with overridable thresholds.
#[derive(Debug, Clone, Default)]
pub struct ChordMatcher {
    config: MatcherConfig,
}

impl ChordMatcher {
    pub fn new(config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Finds the best (root, template) pair for `weights`.
    ///
    /// 1. Keep at most `max_considered_tones` strongest pitch classes
    /// 2. Drop those below `significance_ratio` of the strongest kept one
    /// 3. Fewer than two left: no chord
    /// 4. Score every significant root against every template: present
    ///    weight minus a penalty per absent template tone
    /// 5. Below `min_match_ratio`: major triad on the lowest significant
    ///    pitch class with capped confidence
    pub fn match_weights(&self, weights: &PitchClassWeights) -> ChordMatch {
        let significant = self.significant(weights);
        if significant.len() < 2 {
            return ChordMatch::none();
        }

        let mut sig_weights = [0.0_f32; PITCH_CLASSES];
        for &(pc, w) in &significant {
            sig_weights[pc as usize] = w;
        }
        let total: f32 = significant.iter().map(|&(_, w)| w).sum();
        let penalty = self.config.absent_tone_penalty * total / significant.len() as f32;

        // Summed in ascending pitch-class order, so two templates covering the
        // same set score bit-identically whatever their root.
        let score = |root: u8, template: &'static ChordTemplate| -> Candidate {
            let mask = template.rotated_mask(root);
            let (present, absent) = sig_weights
                .iter()
                .enumerate()
                .filter(|&(pc, _)| mask & (1 << pc) != 0)
                .fold((0.0_f32, 0usize), |(present, absent), (_, &w)| {
                    if w > 0.0 {
                        (present + w, absent)
                    } else {
                        (present, absent + 1)
                    }
                });
            Candidate {
                root,
                template,
                score: present - penalty * absent as f32,
            }
        };
        let epsilon = SCORE_EPSILON * total;

        let mut roots: Vec<u8> = significant.iter().map(|&(pc, _)| pc).collect();
        roots.sort_unstable();

        let best = roots
            .iter()
            .flat_map(|&root| {
                ChordTemplateLibrary::all()
                    .iter()
                    .map(move |template| (root, template))
            })
            .map(|(root, template)| score(root, template))
            .fold(None::<Candidate>, |best, candidate| match best {
                Some(best) if !candidate.beats(&best, epsilon) => Some(best),
                _ => Some(candidate),
            });

        let ratio = |candidate: &Candidate| (candidate.score / total).clamp(0.0, 1.0);

        let (chosen, confidence) = match best {
            Some(best) if best.score / total >= self.config.min_match_ratio => {
                let confidence = ratio(&best);
                (best, confidence)
            }
            _ => {
                let fallback = score(roots[0], ChordTemplateLibrary::major_triad());
                let confidence = ratio(&fallback).min(self.config.fallback_confidence_cap);
                (fallback, confidence)
            }
        };

        ChordMatch {
            name: chosen.template.label(chosen.root),
            root: Some(chosen.root),
            quality: Some(chosen.template.quality),
            confidence,
            pitch_classes: roots,
        }
    }

    /// Strongest pitch classes surviving the tone limit and significance threshold.
    fn significant(&self, weights: &PitchClassWeights) -> Vec<(u8, f32)> {
        let mut ranked: Vec<(u8, f32)> = weights.present().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(self.config.max_considered_tones);

        let Some(&(_, max)) = ranked.first() else {
            return ranked;
        };
        let threshold = max * self.config.significance_ratio;
        ranked.retain(|&(_, w)| w >= threshold);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn weights(pairs: &[(u8, f32)]) -> PitchClassWeights {
        pairs.iter().copied().collect()
    }

    #[test]
    fn c_major_triad() {
        let result = ChordMatcher::default().match_weights(&weights(&[(0, 1.0), (4, 0.9), (7, 0.85)]));
        assert_eq!(result.name, "C major");
        assert_eq!(result.root, Some(0));
        assert_eq!(result.quality, Some(ChordQuality::Major));
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn a_minor_without_root_in_the_lead() {
        let result = ChordMatcher::default().match_weights(&weights(&[(9, 1.0), (0, 0.9), (4, 0.85)]));
        assert_eq!(result.name, "A minor");
        assert_eq!(result.root, Some(9));
        assert_eq!(result.quality, Some(ChordQuality::Minor));
    }

    #[test]
    fn g_dominant_seventh() {
        let result = ChordMatcher::default()
            .match_weights(&weights(&[(7, 1.0), (11, 0.8), (2, 0.8), (5, 0.7)]));
        assert_eq!(result.name, "G7");
        assert_eq!(result.pitch_classes, vec![2, 5, 7, 11]);
    }

    #[test]
    fn single_tone_is_no_chord() {
        let result = ChordMatcher::default().match_weights(&weights(&[(0, 1.0)]));
        assert_eq!(result, ChordMatch::none());
        assert!(!result.is_chord());
    }

    #[test]
    fn weak_tones_are_not_significant() {
        // Only C survives the 20% threshold
        let result = ChordMatcher::default().match_weights(&weights(&[(0, 1.0), (4, 0.1), (7, 0.15)]));
        assert_eq!(result.name, NO_CHORD);
    }

    #[test]
    fn empty_weights_are_no_chord() {
        assert_eq!(
            ChordMatcher::default().match_weights(&PitchClassWeights::new()),
            ChordMatch::none()
        );
    }

    #[test]
    fn ties_prefer_the_simpler_chord() {
        // C + G alone: major, minor, sus2 and sus4 all score the same; the
        // first triad on the lowest root wins over any four-note chord.
        let result = ChordMatcher::default().match_weights(&weights(&[(0, 1.0), (7, 1.0)]));
        assert_eq!(result.root, Some(0));
        assert_eq!(result.quality.map(|q| ChordTemplateLibrary::get(q).unwrap().size()), Some(3));
    }

    #[test]
    fn same_pitch_set_under_two_roots_prefers_the_lower_root() {
        // C6 and Am7 name the same four pitch classes; C wins every time.
        let matcher = ChordMatcher::default();
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            2.0 + 4.0 * (state >> 40) as f32 / (1u64 << 24) as f32
        };
        for _ in 0..2000 {
            let input = weights(&[(0, next()), (4, next()), (7, next()), (9, next())]);
            let result = matcher.match_weights(&input);
            assert_eq!(result.name, "C6", "weights {:?}", input.as_array());
        }
        let exact = matcher.match_weights(&weights(&[(0, 4.002), (4, 5.40772), (7, 4.5332403), (9, 2.8106399)]));
        assert_eq!(exact.name, "C6");
    }

    #[test]
    fn poor_matches_fall_back_to_capped_major_triad() {
        // A semitone cluster fits no template well
        let result = ChordMatcher::default()
            .match_weights(&weights(&[(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0), (5, 1.0), (6, 1.0)]));
        assert_eq!(result.name, "C# major");
        assert_eq!(result.quality, Some(ChordQuality::Major));
        assert!(result.confidence <= 0.5);
    }

    #[test]
    fn only_six_tones_are_considered() {
        let all: Vec<(u8, f32)> = (0..12).map(|pc| (pc, 1.0 - pc as f32 * 0.01)).collect();
        let result = ChordMatcher::default().match_weights(&weights(&all));
        assert_eq!(result.pitch_classes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn matching_is_idempotent() {
        let matcher = ChordMatcher::default();
        let input = weights(&[(2, 0.7), (5, 0.9), (9, 1.0), (0, 0.3)]);
        assert_eq!(matcher.match_weights(&input), matcher.match_weights(&input));
    }

    #[test]
    fn confidence_is_bounded() {
        let matcher = ChordMatcher::default();
        for pcs in [&[(0, 1.0), (4, 1.0), (7, 1.0), (11, 0.5)][..], &[(3, 0.2), (8, 1.0)][..]] {
            let result = matcher.match_weights(&weights(pcs));
            assert!((0.0..=1.0).contains(&result.confidence));
        }
    }
}
