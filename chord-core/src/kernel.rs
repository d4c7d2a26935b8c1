//! # Spectral Kernel Bank
//!
//! Precomputes one frequency-domain analysis kernel per constant-Q bin so the
//! per-frame transform reduces to a sparse dot product against the frame's
//! spectrum instead of a separate transform per bin.
//!
//! For bin k the center frequency is `fk = fmin * 2^(k / binsPerOctave)`. A
//! Hamming-windowed complex exponential at `fk`, `Nk = round(Q * sr / fk)`
//! samples long (clamped to the FFT size), is centered in an otherwise zero
//! buffer of `fft_size` samples, transformed, and reduced to the coefficients
//! in the positive-frequency half whose magnitude exceeds the support threshold.
//!
//! The bank is a pure function of its `CqtConfig` and is immutable after
//! construction, so one instance can be shared between sessions and threads.

use rustfft::num_complex::Complex;
use std::f32::consts::PI;
use tracing::debug;

use crate::config::CqtConfig;
use crate::error::Result;
use crate::fft;
use crate::pitch::pitch_class_of_frequency;

/// Sparse spectral kernel for a single CQT bin.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralKernel {
    /// Center frequency in Hz
    pub center_frequency: f32,
    /// Pitch class this bin folds into (0 = C)
    pub pitch_class: u8,
    /// Time-domain window length actually used (after clamping)
    pub window_length: usize,
    /// (FFT index, coefficient) pairs, indices ascending and below `fft_size / 2`
    pub support: Vec<(usize, Complex<f32>)>,
}

/// All kernels for one configuration.
#[derive(Debug, Clone)]
pub struct SpectralKernelBank {
    config: CqtConfig,
    kernels: Vec<SpectralKernel>,
}

impl SpectralKernelBank {
    /// Builds the kernel for every bin of `config`.
    ///
    /// # Returns
    /// * `Ok(bank)` - One kernel per bin, `config.total_bins()` in total
    /// * `Err(ChordError::Config)` - The configuration is invalid; no partial bank is produced
    pub fn new(config: &CqtConfig) -> Result<Self> {
        config.validate()?;

        let n = config.fft_size;
        let q = config.q_factor();
        let plan = fft::plan_forward(n);

        let kernels: Vec<SpectralKernel> = (0..config.total_bins())
            .map(|k| {
                let fk = config.min_frequency
                    * 2.0_f32.powf(k as f32 / config.bins_per_octave as f32);
                let nk = ((q * config.sample_rate / fk).round() as usize).clamp(1, n);

                let mut temporal = vec![Complex::new(0.0, 0.0); n];
                let offset = (n - nk) / 2;
                let window = fft::hamming_window(nk);
                for (i, w) in window.iter().enumerate() {
                    // Positive-frequency exponential, so the spectral peak sits below n / 2.
                    let phase = 2.0 * PI * fk * i as f32 / config.sample_rate;
                    temporal[offset + i] =
                        Complex::new(w * phase.cos(), w * phase.sin()) / nk as f32;
                }

                fft::forward_complex(plan.as_ref(), &mut temporal);

                let support: Vec<(usize, Complex<f32>)> = temporal
                    .iter()
                    .take(n / 2)
                    .enumerate()
                    .filter(|(_, c)| c.norm() > config.support_threshold)
                    .map(|(idx, &c)| (idx, c))
                    .collect();

                SpectralKernel {
                    center_frequency: fk,
                    pitch_class: pitch_class_of_frequency(fk),
                    window_length: nk,
                    support,
                }
            })
            .collect();

        debug!(
            bins = kernels.len(),
            fft_size = n,
            support = kernels.iter().map(|k| k.support.len()).sum::<usize>(),
            "built spectral kernel bank"
        );

        Ok(Self {
            config: config.clone(),
            kernels,
        })
    }

    pub fn config(&self) -> &CqtConfig {
        &self.config
    }

    pub fn kernels(&self) -> &[SpectralKernel] {
        &self.kernels
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
