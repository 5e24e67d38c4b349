//! # Fast Fourier Transform (FFT) Module
//!
//! Frequency-domain helpers for the engine:
//! - the per-tick decibel magnitude transform consumed by the vocal-quality analyser
//! - FFT-based autocorrelation used by the spectral pitch estimator
//!
//! Both use RustFFT with a fresh planner per call.

use rustfft::{FftPlanner, num_complex::Complex};

use crate::audio::AudioFrame;

/// Magnitudes below this are clamped so silent bins stay finite.
pub const MIN_DB: f32 = -160.0;

/// Decibel magnitude spectrum of one frame, DC up to (excluding) Nyquist.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTransform {
    pub magnitudes_db: Vec<f32>,
    /// Width of one bin in Hz (`sample_rate / fft_size`).
    pub bin_width: f32,
}

impl FrequencyTransform {
    pub fn len(&self) -> usize {
        self.magnitudes_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes_db.is_empty()
    }

    /// Centre frequency of `bin` in Hz.
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_width
    }
}

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to reduce spectral leakage.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Computes the decibel magnitude transform of a frame.
///
/// The frame is DC-corrected and Hann-windowed first. Magnitudes are scaled
/// by the frame length so a full-scale sine peaks near -6 dB regardless of
/// frame size.
pub fn compute_transform(frame: &AudioFrame) -> FrequencyTransform {
    let size = frame.len();
    if size == 0 || frame.sample_rate == 0 {
        return FrequencyTransform { magnitudes_db: Vec::new(), bin_width: 0.0 };
    }

    let mut processed = frame.samples.clone();
    remove_dc_offset(&mut processed);
    apply_hann_window(&mut processed);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(size);

    let mut buffer: Vec<Complex<f32>> = processed
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();
    fft.process(&mut buffer);

    let scale = 2.0 / size as f32;
    let magnitudes_db = buffer
        .iter()
        .take(size / 2)
        .map(|c| magnitude_to_db(c.norm() * scale))
        .collect();

    FrequencyTransform {
        magnitudes_db,
        bin_width: frame.sample_rate as f32 / size as f32,
    }
}

fn magnitude_to_db(magnitude: f32) -> f32 {
    let db = 20.0 * magnitude.log10();
    if db.is_finite() { db.max(MIN_DB) } else { MIN_DB }
}

/// Linear (unnormalised) autocorrelation `r[k] = Σ x[i]·x[i+k]` for `k` in `0..n`.
///
/// The signal is zero-padded to a power of two of at least `2n` so the
/// circular correlation computed by the FFT equals the linear one.
pub fn autocorrelate(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let padded = (2 * n).next_power_of_two();

    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(padded);
    let inverse = planner.plan_fft_inverse(padded);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&s| Complex { re: s, im: 0.0 })
        .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }))
        .take(padded)
        .collect();

    forward.process(&mut buffer);
    for bin in buffer.iter_mut() {
        *bin = Complex { re: bin.norm_sqr(), im: 0.0 };
    }
    inverse.process(&mut buffer);

    // RustFFT does not normalise the inverse transform.
    let norm = padded as f32;
    buffer.iter().take(n).map(|c| c.re / norm).collect()
}

/// Brute-force O(n²) autocorrelation with the same output as [`autocorrelate`].
pub fn autocorrelate_direct(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    (0..n)
        .map(|lag| (0..n - lag).map(|i| signal[i] * signal[i + lag]).sum())
        .collect()
}
