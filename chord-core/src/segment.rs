//! # Segment Assembler
//!
//! Turns a time-ordered stream of pitch-class observations into contiguous,
//! de-duplicated chord segments.
//!
//! Fixed-length windows advance by `window_size - overlap` across the observed
//! time range. Each window's qualifying observations are summed into
//! `PitchClassWeights` (confidence x seconds inside the window) and matched.
//! Neighboring segments with the same chord are then merged, overlaps between
//! different chords are split at their midpoint, and segments that end up too
//! short are dropped.
//!
//! `assemble` keeps no state between calls, so re-running an analysis on the
//! same input yields the same segments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::{AssemblerConfig, MatcherConfig};
use crate::error::Result;
use crate::matcher::ChordMatcher;
use crate::note::{NoteEvent, PitchObservation, validate_notes};
use crate::pitch::PitchClassWeights;
use crate::templates::ChordQuality;

/// Seconds added past the last onset when it ends before its own offset would suggest.
const TAIL_PADDING_SEC: f64 = 1.0;

/// A span of time carrying one chord label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordSegment {
    #[serde(rename = "onset")]
    pub start: f64,
    #[serde(rename = "offset")]
    pub end: f64,
    #[serde(rename = "chord")]
    pub name: String,
    /// Mean confidence of the windows merged into this segment
    pub confidence: f32,
    /// Union of the significant pitch classes of those windows
    pub pitch_classes: BTreeSet<u8>,
    /// Number of analysis windows merged into this segment
    #[serde(default = "one_window", skip_serializing)]
    pub windows: usize,
    /// Root and quality of the matched chord, when known
    #[serde(default, skip_serializing)]
    pub root: Option<u8>,
    #[serde(default, skip_serializing)]
    pub quality: Option<ChordQuality>,
}

fn one_window() -> usize {
    1
}

impl ChordSegment {
    pub fn new(
        start: f64,
        end: f64,
        name: impl Into<String>,
        confidence: f32,
        pitch_classes: impl IntoIterator<Item = u8>,
    ) -> Self {
        Self {
            start,
            end,
            name: name.into(),
            confidence,
            pitch_classes: pitch_classes.into_iter().collect(),
            windows: 1,
            root: None,
            quality: None,
        }
    }

    pub fn with_chord(mut self, root: u8, quality: ChordQuality) -> Self {
        self.root = Some(root);
        self.quality = Some(quality);
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether `next` should be folded into this segment.
    pub fn can_merge(&self, next: &ChordSegment, max_gap: f64) -> bool {
        self.name == next.name && next.start - self.end <= max_gap
    }

    /// Folds a later segment of the same chord into this one.
    ///
    /// The span covers both, pitch classes are united, and confidence is
    /// the mean over all merged windows, so merge order does not matter.
    pub fn absorb(&mut self, next: ChordSegment) {
        let total = (self.windows + next.windows) as f32;
        self.confidence = (self.confidence * self.windows as f32
            + next.confidence * next.windows as f32)
            / total;
        self.windows += next.windows;
        self.start = self.start.min(next.start);
        self.end = self.end.max(next.end);
        self.pitch_classes.extend(next.pitch_classes);
    }
}

/// Merges same-name neighbors whose gap is at most `max_gap` seconds.
///
/// Segments must be in start-time order.
pub fn merge_segments(segments: Vec<ChordSegment>, max_gap: f64) -> Vec<ChordSegment> {
    let mut merged: Vec<ChordSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(prev) if prev.can_merge(&segment, max_gap) => prev.absorb(segment),
            _ => merged.push(segment),
        }
    }
    merged
}

/// Windowed chord segmentation.
#[derive(Debug, Clone, Default)]
pub struct SegmentAssembler {
    config: AssemblerConfig,
    matcher: ChordMatcher,
}

impl SegmentAssembler {
    pub fn new(config: AssemblerConfig, matcher: MatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            matcher: ChordMatcher::new(matcher)?,
        })
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Validates note events and assembles them as observations.
    pub fn assemble_notes(&self, notes: &[NoteEvent]) -> Result<Vec<ChordSegment>> {
        validate_notes(notes)?;
        let observations: Vec<PitchObservation> = notes.iter().map(PitchObservation::from).collect();
        Ok(self.assemble(&observations))
    }

    /// Produces merged chord segments from observations.
    ///
    /// Observations are ordered by onset internally; callers feeding frames
    /// from a worker pool do not need to re-sort them first.
    pub fn assemble(&self, observations: &[PitchObservation]) -> Vec<ChordSegment> {
        if observations.is_empty() {
            return Vec::new();
        }

        let mut sorted = observations.to_vec();
        sorted.sort_by(|a, b| a.onset.total_cmp(&b.onset));

        let raw = self.window_segments(&sorted);
        let raw_count = raw.len();
        let merged = merge_segments(raw, self.config.max_merge_gap_sec);
        let merged_count = merged.len();
        let segments: Vec<ChordSegment> = split_overlaps(merged)
            .into_iter()
            .filter(|s| s.duration() >= self.config.min_segment_duration_sec)
            .collect();

        info!(
            observations = observations.len(),
            windows = raw_count,
            merged = merged_count,
            segments = segments.len(),
            "assembled chord segments"
        );
        segments
    }

    /// One candidate segment per window that has enough qualifying observations.
    fn window_segments(&self, sorted: &[PitchObservation]) -> Vec<ChordSegment> {
        let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
            return Vec::new();
        };
        let range_start = first.onset;
        let range_end = sorted
            .iter()
            .map(|o| o.offset)
            .fold(last.onset + TAIL_PADDING_SEC, f64::max);

        let step = self.config.window_step();
        let mut segments = Vec::new();
        let mut index = 0usize;
        // Observations that started before the current window's end and have
        // not yet ended before its start. Window bounds only move forward.
        let mut active: Vec<&PitchObservation> = Vec::new();
        let mut next = 0usize;
        loop {
            // Multiplying avoids drift from repeated addition.
            let start = range_start + index as f64 * step;
            if start >= range_end {
                break;
            }
            let end = start + self.config.window_size_sec;
            index += 1;

            while let Some(obs) = sorted.get(next).filter(|o| o.onset < end) {
                active.push(obs);
                next += 1;
            }
            active.retain(|o| o.offset > start);

            let mut weights = PitchClassWeights::new();
            let mut qualifying = 0usize;
            for obs in &active {
                if obs.confidence >= self.config.min_observation_confidence {
                    weights.add(
                        obs.pitch_class,
                        obs.confidence * obs.overlap(start, end) as f32,
                    );
                    qualifying += 1;
                }
            }

            if qualifying < self.config.min_observations_per_window {
                debug!(start, end, qualifying, "skipping sparse window");
                continue;
            }

            let chord = self.matcher.match_weights(&weights);
            if !chord.is_chord() {
                debug!(start, end, "no chord in window");
                continue;
            }
            debug!(start, end, chord = %chord.name, confidence = chord.confidence, "window matched");
            let mut segment =
                ChordSegment::new(start, end, chord.name, chord.confidence, chord.pitch_classes);
            segment.root = chord.root;
            segment.quality = chord.quality;
            segments.push(segment);
        }
        segments
    }
}

/// Moves the boundary between overlapping neighbors to the middle of their overlap.
fn split_overlaps(mut segments: Vec<ChordSegment>) -> Vec<ChordSegment> {
    for i in 1..segments.len() {
        let (head, tail) = segments.split_at_mut(i);
        let prev = &mut head[i - 1];
        let next = &mut tail[0];
        if next.start < prev.end {
            let boundary = ((next.start + prev.end) / 2.0)
                .max(prev.start)
                .min(next.end);
            prev.end = boundary;
            next.start = boundary;
        }
    }
    segments.retain(|s| s.end > s.start);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn obs(onset: f64, offset: f64, pitch_class: u8, confidence: f32) -> PitchObservation {
        PitchObservation {
            onset,
            offset,
            pitch_class,
            confidence,
        }
    }

    fn triad(onset: f64, offset: f64, pcs: [u8; 3]) -> Vec<PitchObservation> {
        pcs.iter().map(|&pc| obs(onset, offset, pc, 0.9)).collect()
    }

    #[test]
    fn empty_input_gives_no_segments() {
        let assembler = SegmentAssembler::default();
        assert!(assembler.assemble(&[]).is_empty());
        assert!(assembler.assemble_notes(&[]).unwrap().is_empty());
    }

    #[test]
    fn sustained_triad_becomes_one_segment() {
        let assembler = SegmentAssembler::default();
        let segments = assembler.assemble(&triad(0.0, 4.0, [0, 4, 7]));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].name, "C major");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].pitch_classes, BTreeSet::from([0, 4, 7]));
        assert!(segments[0].windows > 1);
    }

    #[test]
    fn chord_change_splits_at_overlap_midpoint() {
        let assembler = SegmentAssembler::default();
        let mut observations = triad(0.0, 4.0, [0, 4, 7]);
        observations.extend(triad(4.0, 8.0, [9, 0, 4]));
        let segments = assembler.assemble(&observations);

        let names: Vec<&str> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"C major"));
        assert_eq!(names.last(), Some(&"A minor"));
        assert!(segments.windows(2).all(|w| w[0].end <= w[1].start));
        assert!(segments.iter().all(|s| s.end > s.start));
    }

    #[test]
    fn low_confidence_observations_do_not_count() {
        let assembler = SegmentAssembler::default();
        let observations = vec![
            obs(0.0, 2.0, 0, 0.9),
            obs(0.0, 2.0, 4, 0.3),
            obs(0.0, 2.0, 7, 0.3),
        ];
        assert!(assembler.assemble(&observations).is_empty());
    }

    #[test]
    fn unsorted_input_matches_sorted_input() {
        let assembler = SegmentAssembler::default();
        let mut observations = triad(0.0, 3.0, [7, 11, 2]);
        observations.extend(triad(3.0, 6.0, [0, 4, 7]));
        let sorted = assembler.assemble(&observations);
        observations.reverse();
        assert_eq!(assembler.assemble(&observations), sorted);
    }

    #[test]
    fn long_early_notes_reach_late_windows() {
        let assembler = SegmentAssembler::default();
        // A held C from the start, E and G only near the end, plus
        // short-lived F/A pairs that expire long before it.
        let mut observations = vec![obs(0.0, 8.0, 0, 0.9)];
        for i in 0..20 {
            let t = i as f64 * 0.25;
            observations.push(obs(t, t + 0.1, 5, 0.9));
            observations.push(obs(t, t + 0.1, 9, 0.9));
        }
        observations.extend([obs(6.0, 8.0, 4, 0.9), obs(6.0, 8.0, 7, 0.9)]);

        let segments = assembler.assemble(&observations);
        let last = segments.last().unwrap();
        assert_eq!(last.name, "C major");
        // The final window starts at 7 s and ends at 9 s.
        assert_eq!(last.end, 9.0);
        assert_eq!(last.pitch_classes, BTreeSet::from([0, 4, 7]));
    }

    #[test]
    fn assembly_is_repeatable() {
        let assembler = SegmentAssembler::default();
        let observations = triad(0.0, 5.0, [2, 5, 9]);
        assert_eq!(assembler.assemble(&observations), assembler.assemble(&observations));
    }

    #[test]
    fn adjacent_g7_segments_merge_across_small_gap() {
        let a = ChordSegment::new(0.0, 2.0, "G7", 0.8, [7, 11, 2, 5]);
        let b = ChordSegment::new(2.3, 4.0, "G7", 0.6, [7, 11, 5]);
        let merged = merge_segments(vec![a, b], AssemblerConfig::default().max_merge_gap_sec);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 0.0);
        assert_eq!(merged[0].end, 4.0);
        assert!((merged[0].confidence - 0.7).abs() < 1e-6);
        assert_eq!(merged[0].pitch_classes, BTreeSet::from([2, 5, 7, 11]));
    }

    #[test]
    fn wide_gaps_and_different_chords_do_not_merge() {
        let max_gap = AssemblerConfig::default().max_merge_gap_sec;
        let far = merge_segments(
            vec![
                ChordSegment::new(0.0, 2.0, "G7", 0.8, [7]),
                ChordSegment::new(2.6, 4.0, "G7", 0.8, [7]),
            ],
            max_gap,
        );
        assert_eq!(far.len(), 2);
        let different = merge_segments(
            vec![
                ChordSegment::new(0.0, 2.0, "G7", 0.8, [7]),
                ChordSegment::new(2.0, 4.0, "C major", 0.8, [0]),
            ],
            max_gap,
        );
        assert_eq!(different.len(), 2);
    }

    #[test]
    fn sequential_merging_matches_combined_merge() {
        let segs = [
            ChordSegment::new(0.0, 2.0, "D minor", 0.9, [2, 5]),
            ChordSegment::new(1.0, 3.0, "D minor", 0.5, [2, 9]),
            ChordSegment::new(2.0, 4.0, "D minor", 0.4, [5, 9]),
        ];

        let mut left = segs[0].clone();
        left.absorb(segs[1].clone());
        left.absorb(segs[2].clone());

        let mut tail = segs[1].clone();
        tail.absorb(segs[2].clone());
        let mut right = segs[0].clone();
        right.absorb(tail);

        let combined = merge_segments(segs.to_vec(), 0.5);
        assert_eq!(combined.len(), 1);
        for merged in [&left, &right] {
            assert_eq!(merged.start, combined[0].start);
            assert_eq!(merged.end, combined[0].end);
            assert_eq!(merged.pitch_classes, combined[0].pitch_classes);
            assert!((merged.confidence - combined[0].confidence).abs() < 1e-6);
        }
        assert!((combined[0].confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn short_segments_are_dropped() {
        let config = AssemblerConfig {
            min_segment_duration_sec: 5.0,
            ..AssemblerConfig::default()
        };
        let assembler = SegmentAssembler::new(config, MatcherConfig::default()).unwrap();
        assert!(assembler.assemble(&triad(0.0, 1.0, [0, 4, 7])).is_empty());
    }

    #[test]
    fn invalid_notes_are_rejected() {
        let assembler = SegmentAssembler::default();
        let notes = [NoteEvent {
            onset: 1.0,
            offset: 1.0,
            pitch: 60,
            confidence: 0.5,
        }];
        assert!(assembler.assemble_notes(&notes).is_err());
    }
}
