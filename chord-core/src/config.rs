//! # Configuration Module
//!
//! Tunable parameters for every stage of the engine. Each struct has a
//! `Default` matching the reference settings and a `validate` method that
//! rejects values the algorithms cannot work with.
//!
//! All configs are serde-enabled with `#[serde(default)]`, so a settings file
//! only needs to name the fields it overrides.

use serde::{Deserialize, Serialize};

use crate::error::{ChordError, Result};

/// How `ConstantQTransform::process` treats frames that are not exactly
/// `fft_size` samples long.
///
/// Longer buffers are always right-aligned: the most recent `fft_size`
/// samples are analyzed and the rest is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingPolicy {
    /// Shorter frames are extended with trailing zeros.
    #[default]
    ZeroPad,
    /// Shorter frames fail with `ChordError::InsufficientSamples`.
    Strict,
}

/// Constant-Q transform parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CqtConfig {
    /// Sample rate in Hz
    pub sample_rate: f32,
    /// Number of CQT bins per octave (12 = semitone resolution)
    pub bins_per_octave: usize,
    /// Center frequency of the lowest bin in Hz (default: guitar low E)
    pub min_frequency: f32,
    /// Upper frequency bound in Hz (default: C8)
    pub max_frequency: f32,
    /// Samples between successive analysis frames
    pub hop_size: usize,
    /// Frame length and FFT size; must be a power of two
    pub fft_size: usize,
    /// Spectral kernel coefficients at or below this magnitude are dropped
    pub support_threshold: f32,
    /// Treatment of frames shorter than `fft_size`
    pub padding: PaddingPolicy,
}

impl Default for CqtConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            bins_per_octave: 12,
            min_frequency: 82.41,
            max_frequency: 4186.0,
            hop_size: 512,
            fft_size: 2048,
            support_threshold: 1e-4,
            padding: PaddingPolicy::ZeroPad,
        }
    }
}

impl CqtConfig {
    /// Q = 1 / (2^(1/binsPerOctave) - 1)
    pub fn q_factor(&self) -> f32 {
        1.0 / (2.0_f32.powf(1.0 / self.bins_per_octave as f32) - 1.0)
    }

    /// Whole octaves between the minimum and maximum frequency.
    pub fn octave_count(&self) -> usize {
        let ratio = self.max_frequency / self.min_frequency;
        if !ratio.is_finite() || ratio < 1.0 {
            return 0;
        }
        ratio.log2().floor() as usize
    }

    pub fn total_bins(&self) -> usize {
        self.bins_per_octave * self.octave_count()
    }

    /// Duration of one hop in seconds.
    pub fn hop_seconds(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }

    /// Checks every invariant the kernel bank and transform rely on.
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() {
            return Err(ChordError::config(format!(
                "fft_size must be a power of two, got {}",
                self.fft_size
            )));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ChordError::config(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.min_frequency.is_finite() && self.min_frequency > 0.0) {
            return Err(ChordError::config(format!(
                "min_frequency must be positive, got {}",
                self.min_frequency
            )));
        }
        if !(self.min_frequency < self.max_frequency) {
            return Err(ChordError::config(format!(
                "min_frequency ({}) must be below max_frequency ({})",
                self.min_frequency, self.max_frequency
            )));
        }
        if self.bins_per_octave == 0 {
            return Err(ChordError::config("bins_per_octave must be at least 1"));
        }
        if self.hop_size == 0 {
            return Err(ChordError::config("hop_size must be at least 1"));
        }
        if self.total_bins() == 0 {
            return Err(ChordError::config(format!(
                "frequency range {}..{} Hz spans less than one octave",
                self.min_frequency, self.max_frequency
            )));
        }
        if !(self.support_threshold.is_finite() && self.support_threshold >= 0.0) {
            return Err(ChordError::config("support_threshold must be non-negative"));
        }
        Ok(())
    }
}

/// Chord template matching thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// At most this many of the strongest pitch classes are considered
    pub max_considered_tones: usize,
    /// Pitch classes below this fraction of the strongest one are discarded
    pub significance_ratio: f32,
    /// Best score / total significant weight must reach this, else fall back
    pub min_match_ratio: f32,
    /// Penalty per missing template tone, as a fraction of the mean significant weight
    pub absent_tone_penalty: f32,
    /// Confidence ceiling for the fallback major triad
    pub fallback_confidence_cap: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_considered_tones: 6,
            significance_ratio: 0.2,
            min_match_ratio: 0.5,
            absent_tone_penalty: 0.5,
            fallback_confidence_cap: 0.5,
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_considered_tones < 2 {
            return Err(ChordError::config("max_considered_tones must be at least 2"));
        }
        for (name, value) in [
            ("significance_ratio", self.significance_ratio),
            ("min_match_ratio", self.min_match_ratio),
            ("fallback_confidence_cap", self.fallback_confidence_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ChordError::config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !(self.absent_tone_penalty.is_finite() && self.absent_tone_penalty >= 0.0) {
            return Err(ChordError::config("absent_tone_penalty must be non-negative"));
        }
        Ok(())
    }
}

/// Windowing and merging parameters for segment assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub window_size_sec: f64,
    /// Windows advance by `window_size_sec - overlap_sec`
    pub overlap_sec: f64,
    /// Observations below this confidence do not contribute to a window
    pub min_observation_confidence: f32,
    /// Windows with fewer qualifying observations emit nothing
    pub min_observations_per_window: usize,
    /// Same-name segments separated by at most this gap are merged
    pub max_merge_gap_sec: f64,
    /// Merged segments shorter than this are dropped
    pub min_segment_duration_sec: f64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            window_size_sec: 2.0,
            overlap_sec: 1.0,
            min_observation_confidence: 0.4,
            min_observations_per_window: 2,
            max_merge_gap_sec: 0.5,
            min_segment_duration_sec: 0.3,
        }
    }
}

impl AssemblerConfig {
    /// Distance between successive window starts.
    pub fn window_step(&self) -> f64 {
        self.window_size_sec - self.overlap_sec
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.window_size_sec.is_finite() && self.window_size_sec > 0.0) {
            return Err(ChordError::config("window_size_sec must be positive"));
        }
        if !(self.overlap_sec >= 0.0 && self.window_step() > 0.0) {
            return Err(ChordError::config(format!(
                "overlap_sec ({}) must be in [0, window_size_sec ({}))",
                self.overlap_sec, self.window_size_sec
            )));
        }
        if self.max_merge_gap_sec < 0.0 || self.min_segment_duration_sec < 0.0 {
            return Err(ChordError::config(
                "max_merge_gap_sec and min_segment_duration_sec must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Clean-up applied to transcribed note events before assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteFilterConfig {
    /// Notes shorter than this (seconds) are dropped
    pub min_note_duration_sec: f64,
    /// Odd width of the per-pitch-class confidence median filter; 0 or 1 disables it
    pub median_window: usize,
}

impl Default for NoteFilterConfig {
    fn default() -> Self {
        Self {
            min_note_duration_sec: 0.06,
            median_window: 3,
        }
    }
}

impl NoteFilterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.median_window > 1 && self.median_window % 2 == 0 {
            return Err(ChordError::config(format!(
                "median_window must be odd, got {}",
                self.median_window
            )));
        }
        if self.min_note_duration_sec < 0.0 {
            return Err(ChordError::config("min_note_duration_sec must be non-negative"));
        }
        Ok(())
    }
}

/// Drops weak out-of-key notes once the key of a note list is clear.
///
/// Off by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyFilterConfig {
    pub enabled: bool,
    /// Filtering only happens when the note-level key confidence reaches this
    pub min_key_confidence: f32,
    /// Out-of-key notes at or above this confidence are kept
    pub min_out_of_key_confidence: f32,
}

impl Default for KeyFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_key_confidence: 0.5,
            min_out_of_key_confidence: 0.15,
        }
    }
}

impl KeyFilterConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("key_filter.min_key_confidence", self.min_key_confidence)?;
        check_unit("key_filter.min_out_of_key_confidence", self.min_out_of_key_confidence)
    }
}

/// Key-aware pruning of assembled segments.
///
/// Off by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyFilterConfig {
    pub enabled: bool,
    /// Below this key confidence every root counts as in key
    pub min_key_confidence: f32,
    /// Out-of-key chords need both this confidence and `min_out_of_key_duration_sec`
    pub min_out_of_key_confidence: f32,
    pub min_out_of_key_duration_sec: f64,
    /// In-key colour chords are kept at this confidence, this duration, or when they repeat
    pub min_in_key_confidence: f32,
    pub min_in_key_duration_sec: f64,
}

impl Default for HarmonyFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_key_confidence: 0.6,
            min_out_of_key_confidence: 0.7,
            min_out_of_key_duration_sec: 1.0,
            min_in_key_confidence: 0.3,
            min_in_key_duration_sec: 0.6,
        }
    }
}

impl HarmonyFilterConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("harmony_filter.min_key_confidence", self.min_key_confidence)?;
        check_unit("harmony_filter.min_out_of_key_confidence", self.min_out_of_key_confidence)?;
        check_unit("harmony_filter.min_in_key_confidence", self.min_in_key_confidence)?;
        if self.min_out_of_key_duration_sec < 0.0 || self.min_in_key_duration_sec < 0.0 {
            return Err(ChordError::config("harmony_filter durations must be non-negative"));
        }
        Ok(())
    }
}

/// Majority-vote smoothing of the chord timeline.
///
/// Off by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    pub enabled: bool,
    /// Spacing of the sampled timeline (seconds)
    pub resolution_sec: f64,
    /// Span of the vote around each sample (seconds); at least three samples are used
    pub window_sec: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution_sec: 0.5,
            window_sec: 1.0,
        }
    }
}

impl SmootherConfig {
    /// Samples per vote.
    pub fn window_samples(&self) -> usize {
        ((self.window_sec / self.resolution_sec) as usize).max(3)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.resolution_sec.is_finite() && self.resolution_sec > 0.0) {
            return Err(ChordError::config("smoother.resolution_sec must be positive"));
        }
        if !(self.window_sec.is_finite() && self.window_sec >= 0.0) {
            return Err(ChordError::config("smoother.window_sec must be non-negative"));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ChordError::config(format!("{name} must be in [0, 1], got {value}")))
    }
}

/// Everything a `ChordAnalyzer` session needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    pub cqt: CqtConfig,
    pub matcher: MatcherConfig,
    pub assembler: AssemblerConfig,
    pub notes: NoteFilterConfig,
    pub key_filter: KeyFilterConfig,
    pub harmony_filter: HarmonyFilterConfig,
    pub smoother: SmootherConfig,
    /// Frame worker threads; 0 uses the available parallelism
    pub workers: usize,
}

impl AnalyzerSettings {
    pub fn validate(&self) -> Result<()> {
        self.cqt.validate()?;
        self.matcher.validate()?;
        self.assembler.validate()?;
        self.notes.validate()?;
        self.key_filter.validate()?;
        self.harmony_filter.validate()?;
        self.smoother.validate()
    }
}
