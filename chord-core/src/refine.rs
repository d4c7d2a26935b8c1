//! # Refinement Stages
//!
//! Optional clean-up passes around segment assembly, each switched on by its
//! own config and off by default.
//!
//! ## Features
//! - `KeyFilter`: drops weak out-of-key notes once the key of a note list is clear
//! - `HarmonyFilter`: prunes short or weak chords whose root lies outside the key
//! - `ChordSmoother`: majority vote over a sampled chord timeline to remove
//!   one-off chord flukes

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{HarmonyFilterConfig, KeyFilterConfig, SmootherConfig};
use crate::error::Result;
use crate::key::{Key, KeyEstimate};
use crate::note::NoteEvent;
use crate::segment::ChordSegment;

/// Drops out-of-key notes whose confidence is low.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    config: KeyFilterConfig,
}

impl KeyFilter {
    pub fn new(config: KeyFilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Keeps every note when the key is unknown or below `min_key_confidence`.
    pub fn apply(&self, notes: Vec<NoteEvent>, key: &KeyEstimate) -> Vec<NoteEvent> {
        let Some(key) = key.key().filter(|k| k.confidence >= self.config.min_key_confidence)
        else {
            debug!("key too uncertain for note filtering");
            return notes;
        };

        let before = notes.len();
        let kept: Vec<NoteEvent> = notes
            .into_iter()
            .filter(|n| {
                key.contains(n.pitch_class()) || n.confidence >= self.config.min_out_of_key_confidence
            })
            .collect();
        if kept.len() < before {
            info!(key = %key.name(), dropped = before - kept.len(), "dropped weak out-of-key notes");
        }
        kept
    }
}

/// Key-aware pruning of assembled segments.
///
/// - Functional chords on an in-key root are always kept
/// - Out-of-key roots need both `min_out_of_key_confidence` and
///   `min_out_of_key_duration_sec`
/// - Other in-key chords stay when confident, long, or repeated elsewhere
#[derive(Debug, Clone, Default)]
pub struct HarmonyFilter {
    config: HarmonyFilterConfig,
}

impl HarmonyFilter {
    pub fn new(config: HarmonyFilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn apply(&self, segments: Vec<ChordSegment>, key: &KeyEstimate) -> Vec<ChordSegment> {
        let key = key.key().filter(|k| k.confidence >= self.config.min_key_confidence);

        let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
        for segment in &segments {
            *occurrences.entry(segment.name.as_str()).or_default() += 1;
        }
        let keep: Vec<bool> = segments
            .iter()
            .map(|s| self.keeps(s, key, occurrences.get(s.name.as_str()).copied().unwrap_or(0)))
            .collect();

        let before = segments.len();
        let kept: Vec<ChordSegment> = segments
            .into_iter()
            .zip(keep)
            .filter_map(|(segment, keep)| keep.then_some(segment))
            .collect();
        if kept.len() < before {
            info!(removed = before - kept.len(), "harmony filter removed chords");
        }
        kept
    }

    fn keeps(&self, segment: &ChordSegment, key: Option<&Key>, occurrences: usize) -> bool {
        let root_in_key = match (key, segment.root) {
            (Some(key), Some(root)) => key.contains(root),
            _ => true,
        };
        let functional = segment.quality.is_none_or(|q| q.is_functional());
        let duration = segment.duration();

        if !root_in_key {
            segment.confidence >= self.config.min_out_of_key_confidence
                && duration >= self.config.min_out_of_key_duration_sec
        } else {
            functional
                || segment.confidence >= self.config.min_in_key_confidence
                || duration >= self.config.min_in_key_duration_sec
                || occurrences >= 2
        }
    }
}

/// Majority-vote smoothing over a sampled chord timeline.
#[derive(Debug, Clone, Default)]
pub struct ChordSmoother {
    config: SmootherConfig,
}

impl ChordSmoother {
    pub fn new(config: SmootherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Samples the active chord every `resolution_sec`, replaces each sample
    /// by the most common chord among its `window_samples()` neighbors (gaps
    /// do not vote), and regroups equal runs into segments.
    ///
    /// Sequences of two segments or fewer, and timelines shorter than the
    /// vote window, are returned unchanged. A regrouped chord takes its
    /// confidence and pitch classes from the first input segment of that name.
    pub fn smooth(&self, segments: Vec<ChordSegment>) -> Vec<ChordSegment> {
        if segments.len() <= 2 {
            return segments;
        }
        let start = segments.iter().map(|s| s.start).fold(f64::INFINITY, f64::min);
        let end = segments.iter().map(|s| s.end).fold(f64::NEG_INFINITY, f64::max);
        if !(end > start) {
            return segments;
        }

        let resolution = self.config.resolution_sec;
        let times: Vec<f64> = (0..)
            .map(|i| start + i as f64 * resolution)
            .take_while(|&t| t <= end)
            .collect();
        let window = self.config.window_samples();
        if times.len() < window {
            return segments;
        }

        let labels: Vec<Option<&str>> = times
            .iter()
            .map(|&t| {
                segments
                    .iter()
                    .find(|s| s.start <= t && t < s.end)
                    .map(|s| s.name.as_str())
            })
            .collect();

        let voted: Vec<Option<&str>> = (0..labels.len())
            .map(|i| {
                let from = i.saturating_sub(window / 2);
                let to = (from + window).min(labels.len());
                majority(&labels[from..to])
            })
            .collect();

        let mut smoothed = Vec::new();
        let mut run_start = 0;
        for i in 1..=voted.len() {
            if i < voted.len() && voted[i] == voted[run_start] {
                continue;
            }
            if let Some(name) = voted[run_start] {
                let run_end = times.get(i).copied().unwrap_or(end);
                if let Some(source) = segments.iter().find(|s| s.name == name) {
                    let mut segment = source.clone();
                    segment.start = times[run_start];
                    segment.end = run_end;
                    segment.windows = 1;
                    smoothed.push(segment);
                }
            }
            run_start = i;
        }

        debug!(before = segments.len(), after = smoothed.len(), "smoothed chord timeline");
        smoothed
    }
}

/// Most frequent label, ignoring gaps; ties go to the label seen first.
fn majority<'a>(labels: &[Option<&'a str>]) -> Option<&'a str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for label in labels.iter().flatten() {
        match counts.iter_mut().find(|(name, _)| name == label) {
            Some((_, count)) => *count += 1,
            None => counts.push((label, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None::<(&str, usize)>, |best, (name, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((name, count)),
        })
        .map(|(name, _)| name)
}
