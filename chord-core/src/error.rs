//! # Error Module
//!
//! Error kinds surfaced by the harmonic-analysis engine. All of them are
//! local conditions the caller can recover from: a bad configuration stops a
//! session before it starts, a short frame can be skipped, and an invalid
//! note event can be dropped or reported back to the transcription side.
//!
//! "No chord" and "unknown key" are valid results, not errors.

use thiserror::Error;

/// Errors produced by `chord-core`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChordError {
    /// An analysis configuration violates one of its invariants
    /// (non-power-of-two FFT size, inverted frequency range, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A frame was shorter than the FFT size and the padding policy is strict.
    #[error("insufficient samples: expected {expected}, got {actual}")]
    InsufficientSamples { expected: usize, actual: usize },

    /// A note event failed its own validity invariants.
    #[error("invalid observation at index {index}: {reason}")]
    InvalidObservation { index: usize, reason: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChordError>;

impl ChordError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ChordError::Config(msg.into())
    }
}
