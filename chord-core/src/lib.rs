// chord-core/src/lib.rs

//! The core harmonic-analysis engine.
//! This crate turns audio frames or transcribed note events into a timed
//! sequence of chord labels and an estimated key. It is completely headless
//! and contains no presentation code.
//!
//! ## Components
//! - `kernel`: per-configuration sparse constant-Q kernels
//! - `cqt`: frame to 12-bin chromagram
//! - `templates` / `matcher`: weighted pitch classes to a chord label
//! - `segment`: windowed assembly and merging of chord segments
//! - `key`: Krumhansl-Schmuckler key estimation
//! - `refine`: optional key-aware filtering and chord smoothing
//! - `analysis`: the end-to-end pipeline

pub mod analysis;
#[cfg(feature = "capture")]
pub mod audio;
pub mod config;
pub mod cqt;
pub mod error;
pub mod fft;
pub mod kernel;
pub mod key;
pub mod matcher;
pub mod note;
pub mod pitch;
pub mod refine;
pub mod segment;
pub mod templates;

pub use analysis::{AnalysisReport, ChordAnalyzer};
pub use config::{
    AnalyzerSettings, AssemblerConfig, CqtConfig, HarmonyFilterConfig, KeyFilterConfig,
    MatcherConfig, NoteFilterConfig, PaddingPolicy, SmootherConfig,
};
pub use cqt::{Chromagram, ConstantQTransform};
pub use error::{ChordError, Result};
pub use kernel::{SpectralKernel, SpectralKernelBank};
pub use key::{Key, KeyEstimate, KeyEstimator, Mode};
pub use matcher::{ChordMatch, ChordMatcher};
pub use note::{NoteEvent, NoteFilter, PitchObservation};
pub use pitch::PitchClassWeights;
pub use refine::{ChordSmoother, HarmonyFilter, KeyFilter};
pub use segment::{ChordSegment, SegmentAssembler};
pub use templates::{ChordQuality, ChordTemplate, ChordTemplateLibrary};
