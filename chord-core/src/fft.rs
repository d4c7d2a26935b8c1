//! # Fast Fourier Transform (FFT) Module
//!
//! Thin helpers over RustFFT used by both the kernel bank (once per
//! configuration) and the constant-Q transform (once per frame).
//!
//! ## Features
//! - Forward FFT planning shared through `Arc`
//! - Hamming windowing for reduced spectral leakage
//! - Real-to-complex forward transform without shared mutable state

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::f32::consts::PI;
use std::sync::Arc;

/// Plans a forward FFT of the given size.
///
/// The returned plan is immutable and safe to share across threads.
pub fn plan_forward(size: usize) -> Arc<dyn Fft<f32>> {
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(size)
}

/// Builds a Hamming window: w(n) = 0.54 - 0.46 cos(2πn / (N - 1)).
///
/// A window of length 1 is the single coefficient 1.0.
pub fn hamming_window(len: usize) -> Vec<f32> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let n_minus_1 = (len - 1) as f32;
            (0..len)
                .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f32 / n_minus_1).cos())
                .collect()
        }
    }
}

/// Multiplies `buffer` by `window` sample by sample (in place).
///
/// # Arguments
/// * `buffer` - Audio buffer to window
/// * `window` - Window coefficients, same length as `buffer`
pub fn apply_window(buffer: &mut [f32], window: &[f32]) {
    debug_assert_eq!(buffer.len(), window.len());
    for (sample, w) in buffer.iter_mut().zip(window) {
        *sample *= w;
    }
}

/// Performs a forward FFT on a real signal and returns the complex spectrum.
///
/// # Arguments
/// * `fft` - Plan whose length equals `signal.len()`
/// * `signal` - Input samples (already windowed if required)
///
/// # Returns
/// * `Vec<Complex<f32>>` - Complex frequency spectrum of `signal.len()` bins
pub fn forward_real(fft: &dyn Fft<f32>, signal: &[f32]) -> Vec<Complex<f32>> {
    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&sample| Complex { re: sample, im: 0.0 })
        .collect();
    forward_complex(fft, &mut buffer);
    buffer
}

/// Forward FFT of a complex buffer in place, with a scratch buffer local to the call.
pub fn forward_complex(fft: &dyn Fft<f32>, buffer: &mut [Complex<f32>]) {
    let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    fft.process_with_scratch(buffer, &mut scratch);
}
