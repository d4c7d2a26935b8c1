//! # Analysis Pipeline
//!
//! Wires the components together for one bounded span of audio or one list
//! of transcribed notes:
//!
//! ```text
//! frames -> ConstantQTransform -> chromagrams -> observations ─┐
//! notes  -> NoteFilter -> [KeyFilter] ---------> observations ─┴> SegmentAssembler -> KeyEstimator
//!                                                                   -> [HarmonyFilter] -> [ChordSmoother]
//! ```
//!
//! Bracketed stages are off unless enabled in the settings. The key is
//! estimated once from the assembled segments and is not revised after the
//! harmony filter or smoother run.
//!
//! Frames are independent of each other, so they are transformed on a small
//! worker pool (crossbeam channels over scoped threads) and put back in frame
//! order before assembly. A frame that fails is logged and skipped; the
//! assembler simply sees fewer observations.

use crossbeam_channel::{bounded, unbounded};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use crate::config::{AnalyzerSettings, CqtConfig};
use crate::cqt::{Chromagram, ConstantQTransform};
use crate::error::Result;
use crate::kernel::SpectralKernelBank;
use crate::key::{KeyEstimate, KeyEstimator};
use crate::note::{NoteEvent, NoteFilter, PitchObservation, validate_notes};
use crate::refine::{ChordSmoother, HarmonyFilter, KeyFilter};
use crate::segment::{ChordSegment, SegmentAssembler};

/// Terminal output of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(rename = "chords")]
    pub segments: Vec<ChordSegment>,
    pub key: KeyEstimate,
}

/// One configured analysis session.
///
/// The kernel bank is built once in `new` and shared with every transform.
pub struct ChordAnalyzer {
    settings: AnalyzerSettings,
    cqt: ConstantQTransform,
    notes: NoteFilter,
    assembler: SegmentAssembler,
    key: KeyEstimator,
    key_filter: KeyFilter,
    harmony: HarmonyFilter,
    smoother: ChordSmoother,
}

impl ChordAnalyzer {
    /// Validates `settings` and builds the kernel bank.
    ///
    /// # Returns
    /// * `Err(ChordError::Config)` - Any invalid setting; nothing is built
    pub fn new(settings: AnalyzerSettings) -> Result<Self> {
        settings.validate()?;
        let bank = Arc::new(SpectralKernelBank::new(&settings.cqt)?);
        Self::with_bank(settings, bank)
    }

    /// Builds a session around an existing kernel bank, which must have been
    /// built from `settings.cqt`.
    pub fn with_bank(settings: AnalyzerSettings, bank: Arc<SpectralKernelBank>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            cqt: ConstantQTransform::new(bank),
            notes: NoteFilter::new(settings.notes.clone())?,
            assembler: SegmentAssembler::new(
                settings.assembler.clone(),
                settings.matcher.clone(),
            )?,
            key: KeyEstimator::new(),
            key_filter: KeyFilter::new(settings.key_filter.clone())?,
            harmony: HarmonyFilter::new(settings.harmony_filter.clone())?,
            smoother: ChordSmoother::new(settings.smoother.clone())?,
            settings,
        })
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    pub fn bank(&self) -> &Arc<SpectralKernelBank> {
        self.cqt.bank()
    }

    pub fn transform(&self) -> &ConstantQTransform {
        &self.cqt
    }

    /// Analyzes note events from a transcription model.
    ///
    /// # Returns
    /// * `Err(ChordError::InvalidObservation)` - The first event breaking its invariants
    pub fn analyze_notes(&self, notes: &[NoteEvent]) -> Result<AnalysisReport> {
        validate_notes(notes)?;
        let mut filtered = self.notes.apply(notes);
        if self.key_filter.is_enabled() {
            let key = self.key.estimate_notes(&filtered);
            filtered = self.key_filter.apply(filtered, &key);
        }
        let observations: Vec<PitchObservation> =
            filtered.iter().map(PitchObservation::from).collect();
        Ok(self.finish(&observations))
    }

    /// Analyzes a mono sample buffer at `settings.cqt.sample_rate`.
    pub fn analyze_samples(&self, samples: &[f32]) -> AnalysisReport {
        let frames = frame_samples(samples, &self.settings.cqt);
        self.analyze_frames(&frames)
    }

    /// Analyzes frames that start `hop_size` samples apart.
    pub fn analyze_frames<F: AsRef<[f32]> + Sync>(&self, frames: &[F]) -> AnalysisReport {
        let chromagrams = self.transform_frames(frames);
        let observations = chroma_observations(&chromagrams, self.settings.cqt.hop_seconds());
        self.finish(&observations)
    }

    /// Transforms every frame on the worker pool, in frame order.
    /// Frames that fail are `None`.
    pub fn transform_frames<F: AsRef<[f32]> + Sync>(&self, frames: &[F]) -> Vec<Option<Chromagram>> {
        let workers = self.worker_count().min(frames.len()).max(1);
        let mut results: Vec<Option<Chromagram>> = vec![None; frames.len()];

        let (job_tx, job_rx) = bounded::<usize>(workers * 2);
        let (result_tx, result_rx) = unbounded();

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let cqt = &self.cqt;
                scope.spawn(move || {
                    for index in job_rx {
                        let outcome = cqt.process(frames[index].as_ref());
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            for index in 0..frames.len() {
                if job_tx.send(index).is_err() {
                    break;
                }
            }
            drop(job_tx);

            for (index, outcome) in result_rx {
                match outcome {
                    Ok(chroma) => results[index] = Some(chroma),
                    Err(e) => warn!(frame = index, error = %e, "skipping frame"),
                }
            }
        });

        results
    }

    fn finish(&self, observations: &[PitchObservation]) -> AnalysisReport {
        let mut segments = self.assembler.assemble(observations);
        let key = self.key.estimate(&segments);

        if self.harmony.is_enabled() || self.smoother.is_enabled() {
            if self.harmony.is_enabled() {
                segments = self.harmony.apply(segments, &key);
            }
            if self.smoother.is_enabled() {
                segments = self.smoother.smooth(segments);
            }
            let min_duration = self.assembler.config().min_segment_duration_sec;
            segments.retain(|s| s.duration() >= min_duration);
        }

        info!(segments = segments.len(), key = %key, "analysis complete");
        AnalysisReport { segments, key }
    }

    fn worker_count(&self) -> usize {
        match self.settings.workers {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }
}

/// Cuts a buffer into frames starting every `hop_size` samples.
///
/// Frames near the end are shorter than `fft_size`; the transform's padding
/// policy decides what happens to them.
pub fn frame_samples<'a>(samples: &'a [f32], config: &CqtConfig) -> Vec<&'a [f32]> {
    (0..samples.len())
        .step_by(config.hop_size.max(1))
        .map(|start| &samples[start..(start + config.fft_size).min(samples.len())])
        .collect()
}

/// One observation per non-zero chroma bin; frame i spans
/// `[i * hop, (i + 1) * hop)` seconds. Missing frames leave a gap.
pub fn chroma_observations(chromagrams: &[Option<Chromagram>], hop_seconds: f64) -> Vec<PitchObservation> {
    chromagrams
        .iter()
        .enumerate()
        .filter_map(|(i, chroma)| chroma.map(|c| (i, c)))
        .flat_map(|(i, chroma)| {
            let onset = i as f64 * hop_seconds;
            chroma
                .values()
                .iter()
                .enumerate()
                .filter(|&(_, &v)| v > 0.0)
                .map(move |(pc, &v)| PitchObservation {
                    onset,
                    offset: onset + hop_seconds,
                    pitch_class: pc as u8,
                    confidence: v,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
