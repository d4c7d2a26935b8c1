//! # Note Events and Observations
//!
//! Note events arrive from an external transcription model; pitch-class
//! observations are what the segment assembler consumes, whether they come
//! from note events or from chromagram frames.
//!
//! ## Note clean-up
//! Transcribed notes are noisy, so before assembly they can be
//! - smoothed: each pitch class's confidence sequence (in onset order) is
//!   passed through a median filter;
//! - filtered: notes shorter than a minimum duration are dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::NoteFilterConfig;
use crate::error::{ChordError, Result};
use crate::pitch::PITCH_CLASSES;

/// A note detected by the transcription collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Onset in seconds
    #[serde(alias = "onset_time")]
    pub onset: f64,
    /// Offset in seconds, after the onset
    #[serde(alias = "offset_time")]
    pub offset: f64,
    /// MIDI pitch (0-127)
    #[serde(alias = "midi_pitch")]
    pub pitch: u8,
    /// Model confidence (0.0 to 1.0)
    pub confidence: f32,
}

impl NoteEvent {
    pub fn duration(&self) -> f64 {
        self.offset - self.onset
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch % PITCH_CLASSES as u8
    }

    /// Checks the event's own invariants.
    ///
    /// # Arguments
    /// * `index` - Position of the event in its list, reported in the error
    pub fn validate(&self, index: usize) -> Result<()> {
        let invalid = |reason: String| Err(ChordError::InvalidObservation { index, reason });
        if !(self.onset.is_finite() && self.onset >= 0.0) {
            return invalid(format!("onset must be non-negative, got {}", self.onset));
        }
        if !(self.offset.is_finite() && self.offset > self.onset) {
            return invalid(format!(
                "offset {} must be after onset {}",
                self.offset, self.onset
            ));
        }
        if self.pitch > 127 {
            return invalid(format!("pitch {} is outside the MIDI range", self.pitch));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return invalid(format!(
                "confidence {} is outside [0, 1]",
                self.confidence
            ));
        }
        Ok(())
    }
}

/// Validates every event, failing on the first invalid one.
pub fn validate_notes(notes: &[NoteEvent]) -> Result<()> {
    notes
        .iter()
        .enumerate()
        .try_for_each(|(index, note)| note.validate(index))
}

/// A timestamped, weighted pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchObservation {
    pub onset: f64,
    pub offset: f64,
    pub pitch_class: u8,
    pub confidence: f32,
}

impl PitchObservation {
    pub fn duration(&self) -> f64 {
        self.offset - self.onset
    }

    /// Seconds of this observation falling inside `[start, end)`.
    pub fn overlap(&self, start: f64, end: f64) -> f64 {
        (self.offset.min(end) - self.onset.max(start)).max(0.0)
    }
}

impl From<&NoteEvent> for PitchObservation {
    fn from(note: &NoteEvent) -> Self {
        Self {
            onset: note.onset,
            offset: note.offset,
            pitch_class: note.pitch_class(),
            confidence: note.confidence,
        }
    }
}

/// Median smoothing and short-note removal for transcribed notes.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    config: NoteFilterConfig,
}

impl NoteFilter {
    pub fn new(config: NoteFilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Smooths confidences, then drops short notes. Output is in onset order.
    pub fn apply(&self, notes: &[NoteEvent]) -> Vec<NoteEvent> {
        let smoothed = self.smooth(notes);
        let before = smoothed.len();
        let kept: Vec<NoteEvent> = smoothed
            .into_iter()
            .filter(|n| n.duration() >= self.config.min_note_duration_sec)
            .collect();
        if kept.len() < before {
            debug!(
                dropped = before - kept.len(),
                min_duration = self.config.min_note_duration_sec,
                "dropped short notes"
            );
        }
        kept
    }

    /// Median-filters each pitch class's confidence sequence, ordered by onset.
    ///
    /// Sequences shorter than the window are left untouched; the filter
    /// edges are padded with zeros like a classic 1-D median filter.
    pub fn smooth(&self, notes: &[NoteEvent]) -> Vec<NoteEvent> {
        let window = self.config.median_window;
        let mut out: Vec<NoteEvent> = if window <= 1 {
            notes.to_vec()
        } else {
            let mut by_class: BTreeMap<u8, Vec<NoteEvent>> = BTreeMap::new();
            for note in notes {
                by_class.entry(note.pitch_class()).or_default().push(*note);
            }

            by_class
                .into_values()
                .flat_map(|mut events| {
                    events.sort_by(|a, b| a.onset.total_cmp(&b.onset));
                    if events.len() >= window {
                        let confidences: Vec<f32> =
                            events.iter().map(|n| n.confidence).collect();
                        for (event, smoothed) in
                            events.iter_mut().zip(median_filter(&confidences, window))
                        {
                            event.confidence = smoothed;
                        }
                    }
                    events
                })
                .collect()
        };
        out.sort_by(|a, b| a.onset.total_cmp(&b.onset));
        out
    }
}

/// Zero-padded running median of odd width.
fn median_filter(values: &[f32], window: usize) -> Vec<f32> {
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let mut neighborhood: Vec<f32> = (0..window)
                .map(|k| {
                    (i + k)
                        .checked_sub(half)
                        .and_then(|j| values.get(j).copied())
                        .unwrap_or(0.0)
                })
                .collect();
            neighborhood.sort_by(f32::total_cmp);
            neighborhood[half]
        })
        .collect()
}
