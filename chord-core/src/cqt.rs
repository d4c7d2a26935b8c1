//! # Constant-Q Transform Module
//!
//! Maps one fixed-size audio frame to a 12-bin chromagram using the sparse
//! kernels of a shared `SpectralKernelBank`.
//!
//! ## Frame length policy
//! Frames are right-aligned to `fft_size`:
//! - a longer buffer is analyzed through its most recent `fft_size` samples;
//! - a shorter buffer is padded with trailing zeros under
//!   `PaddingPolicy::ZeroPad`, or rejected with
//!   `ChordError::InsufficientSamples` under `PaddingPolicy::Strict`.

use rustfft::{Fft, num_complex::Complex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;

use crate::config::{CqtConfig, PaddingPolicy};
use crate::error::{ChordError, Result};
use crate::fft;
use crate::kernel::SpectralKernelBank;
use crate::pitch::{PITCH_CLASSES, PitchClassWeights};

/// Folded pitch-class energy, each bin in [0, 1]. Index 0 is C.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Chromagram([f32; PITCH_CLASSES]);

impl Chromagram {
    pub fn values(&self) -> &[f32; PITCH_CLASSES] {
        &self.0
    }

    pub fn get(&self, pitch_class: u8) -> f32 {
        self.0[(pitch_class as usize) % PITCH_CLASSES]
    }

    /// Strongest pitch class, or `None` for a silent frame.
    pub fn dominant(&self) -> Option<u8> {
        self.0
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(pc, _)| pc as u8)
    }

    pub fn is_silent(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    /// Scales every bin by the maximum so the strongest equals 1.0.
    /// A frame with no (finite, positive) energy becomes all zeros.
    fn normalized(mut raw: [f32; PITCH_CLASSES]) -> Self {
        let max = raw.iter().copied().fold(0.0_f32, f32::max);
        if max > 0.0 && max.is_finite() {
            for v in raw.iter_mut() {
                *v = (*v / max).clamp(0.0, 1.0);
            }
        } else {
            raw = [0.0; PITCH_CLASSES];
        }
        Chromagram(raw)
    }
}

impl From<Chromagram> for PitchClassWeights {
    fn from(chroma: Chromagram) -> Self {
        chroma
            .0
            .iter()
            .enumerate()
            .map(|(pc, &v)| (pc as u8, v))
            .collect()
    }
}

/// Frame-to-chromagram transform over a shared kernel bank.
///
/// Holds no mutable state; `process` can be called concurrently from several
/// threads on the same instance.
#[derive(Clone)]
pub struct ConstantQTransform {
    bank: Arc<SpectralKernelBank>,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl ConstantQTransform {
    pub fn new(bank: Arc<SpectralKernelBank>) -> Self {
        let size = bank.config().fft_size;
        Self {
            fft: fft::plan_forward(size),
            window: fft::hamming_window(size),
            bank,
        }
    }

    /// Convenience constructor that builds its own kernel bank.
    pub fn from_config(config: &CqtConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(SpectralKernelBank::new(config)?)))
    }

    pub fn config(&self) -> &CqtConfig {
        self.bank.config()
    }

    pub fn bank(&self) -> &Arc<SpectralKernelBank> {
        &self.bank
    }

    /// Transforms one audio frame into a chromagram.
    ///
    /// This function:
    /// 1. Right-aligns the frame to `fft_size` (see module docs)
    /// 2. Applies the Hamming window and a forward FFT
    /// 3. Correlates the spectrum with every kernel's sparse support
    /// 4. Folds bin magnitudes by pitch class and normalizes by the maximum
    ///
    /// # Returns
    /// * `Ok(chromagram)` - All zeros for a silent frame
    /// * `Err(ChordError::InsufficientSamples)` - Short frame under `PaddingPolicy::Strict`
    pub fn process(&self, frame: &[f32]) -> Result<Chromagram> {
        let magnitudes = self.magnitudes(frame)?;

        let mut folded = [0.0_f32; PITCH_CLASSES];
        for (kernel, magnitude) in self.bank.kernels().iter().zip(&magnitudes) {
            folded[kernel.pitch_class as usize] += magnitude;
        }

        Ok(Chromagram::normalized(folded))
    }

    /// Raw per-bin CQT magnitudes, lowest bin first.
    pub fn magnitudes(&self, frame: &[f32]) -> Result<Vec<f32>> {
        let mut samples = self.align(frame)?.into_owned();
        fft::apply_window(&mut samples, &self.window);
        let spectrum = fft::forward_real(self.fft.as_ref(), &samples);

        let scale = 1.0 / self.config().fft_size as f32;
        Ok(self
            .bank
            .kernels()
            .iter()
            .map(|kernel| {
                let sum: Complex<f32> = kernel
                    .support
                    .iter()
                    .map(|&(idx, coeff)| spectrum[idx] * coeff.conj())
                    .sum();
                sum.norm() * scale
            })
            .collect())
    }

    fn align<'a>(&self, frame: &'a [f32]) -> Result<Cow<'a, [f32]>> {
        let size = self.config().fft_size;
        match frame.len() {
            len if len == size => Ok(Cow::Borrowed(frame)),
            len if len > size => Ok(Cow::Borrowed(&frame[len - size..])),
            len => match self.config().padding {
                PaddingPolicy::ZeroPad => {
                    let mut padded = frame.to_vec();
                    padded.resize(size, 0.0);
                    Ok(Cow::Owned(padded))
                }
                PaddingPolicy::Strict => Err(ChordError::InsufficientSamples {
                    expected: size,
                    actual: len,
                }),
            },
        }
    }
}
