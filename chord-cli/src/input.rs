//! Readers for the two offline input formats.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;

use chord_core::NoteEvent;

/// Note files come either as a bare array or wrapped in an object, the
/// latter being what transcription services usually return.
#[derive(Deserialize)]
#[serde(untagged)]
enum NoteFile {
    Bare(Vec<NoteEvent>),
    Wrapped { notes: Vec<NoteEvent> },
}

pub fn read_notes(path: &Path) -> Result<Vec<NoteEvent>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading notes from {}", path.display()))?;
    parse_notes(&text).with_context(|| format!("parsing notes from {}", path.display()))
}

pub fn parse_notes(text: &str) -> Result<Vec<NoteEvent>> {
    Ok(match serde_json::from_str(text)? {
        NoteFile::Bare(notes) | NoteFile::Wrapped { notes } => notes,
    })
}

pub fn read_samples(path: &Path) -> Result<Vec<f32>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading samples from {}", path.display()))?;
    decode_samples(&bytes).with_context(|| format!("decoding samples from {}", path.display()))
}

/// Raw little-endian `f32` PCM, one channel.
pub fn decode_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!(
            "{} bytes is not a whole number of 32-bit samples",
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
