//! # Pitch Detection Module
//!
//! The engine's own autocorrelation pitch estimator. It is the fallback when
//! the primary (McLeod) detector cannot be loaded and the sole estimator in
//! the "spectral" strategy. Its output contract is [`PitchEstimate`], shared
//! with the primary detector so the two are interchangeable.
//!
//! ## Algorithm
//! 1. Silence gate on frame RMS
//! 2. Linear resampling to a fixed working rate
//! 3. Zero-mean, unit-variance normalisation of the newest window
//! 4. FFT autocorrelation normalised to `r[0] = 1`
//! 5. Strongest local maximum inside the frequency band, above an acceptance threshold
//! 6. Parabolic interpolation for sub-sample lag accuracy

use crate::audio::{AudioFrame, rms};
use crate::config::EngineConfig;
use crate::error::DetectorError;
use crate::fft;

/// Rate every frame is resampled to before analysis.
pub const WORKING_SAMPLE_RATE: u32 = 16000;
/// Samples analysed per detection, taken from the end of the resampled frame.
pub const WINDOW_SIZE: usize = 1024;
/// Minimum normalised correlation for a peak to count as a pitch.
pub const ACCEPTANCE_THRESHOLD: f32 = 0.3;

/// The result of one detection. `frequency` is `None` for silence or unvoiced input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    pub frequency: Option<f32>,
    /// 0.0 to 1.0.
    pub confidence: f32,
}

impl PitchEstimate {
    pub const UNVOICED: PitchEstimate = PitchEstimate { frequency: None, confidence: 0.0 };

    pub fn voiced(frequency: f32, confidence: f32) -> Self {
        Self { frequency: Some(frequency), confidence: confidence.clamp(0.0, 1.0) }
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SpectralPitchEstimator {
    min_frequency: f32,
    max_frequency: f32,
    silence_rms: f32,
    ready: bool,
}

impl SpectralPitchEstimator {
    pub const NAME: &'static str = "spectral";

    pub fn new(min_frequency: f32, max_frequency: f32, silence_rms: f32) -> Self {
        Self { min_frequency, max_frequency, silence_rms, ready: false }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.min_frequency, config.max_frequency, config.silence_threshold_rms)
    }

    /// Checks that the band is searchable at the working rate.
    pub fn initialize(&mut self) -> Result<(), DetectorError> {
        let (min_lag, max_lag) = self.lag_range();
        if !(self.min_frequency > 0.0) || min_lag > max_lag {
            return Err(DetectorError::LoadFailed {
                detector: Self::NAME,
                reason: format!(
                    "frequency band {}-{} Hz has no usable lags at {} Hz",
                    self.min_frequency, self.max_frequency, WORKING_SAMPLE_RATE
                ),
            });
        }
        self.ready = true;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Lag search range `[sr / max_f, sr / min_f]`, kept clear of the window
    /// edges so every candidate has two neighbours.
    fn lag_range(&self) -> (usize, usize) {
        let sr = WORKING_SAMPLE_RATE as f32;
        let min_lag = (sr / self.max_frequency).ceil().max(1.0) as usize;
        let max_lag = ((sr / self.min_frequency).floor() as usize).min(WINDOW_SIZE - 2);
        (min_lag, max_lag)
    }

    /// Estimates the fundamental of `frame`.
    pub fn detect(&self, frame: &AudioFrame) -> PitchEstimate {
        if !self.ready || frame.is_empty() || frame.sample_rate == 0 {
            return PitchEstimate::UNVOICED;
        }
        if rms(&frame.samples) < self.silence_rms {
            return PitchEstimate::UNVOICED;
        }

        let resampled;
        let signal: &[f32] = if frame.sample_rate == WORKING_SAMPLE_RATE {
            &frame.samples
        } else {
            resampled = resample_linear(&frame.samples, frame.sample_rate, WORKING_SAMPLE_RATE);
            &resampled
        };
        if signal.len() < WINDOW_SIZE {
            return PitchEstimate::UNVOICED;
        }

        let Some(window) = normalize(&signal[signal.len() - WINDOW_SIZE..]) else {
            return PitchEstimate::UNVOICED;
        };

        let mut correlation = fft::autocorrelate(&window);
        let energy = correlation[0];
        if !(energy > 0.0) {
            return PitchEstimate::UNVOICED;
        }
        for value in correlation.iter_mut() {
            *value /= energy;
        }

        let (min_lag, max_lag) = self.lag_range();
        let Some(lag) = select_peak(&correlation, min_lag, max_lag, ACCEPTANCE_THRESHOLD) else {
            return PitchEstimate::UNVOICED;
        };

        let refined_lag = lag as f32 + parabolic_shift(&correlation, lag);
        let frequency = WORKING_SAMPLE_RATE as f32 / refined_lag;
        if !frequency.is_finite() || frequency <= 0.0 {
            return PitchEstimate::UNVOICED;
        }

        PitchEstimate::voiced(frequency, correlation[lag])
    }
}

/// Resamples by linear interpolation between neighbouring samples.
pub fn resample_linear(signal: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || signal.is_empty() || from_rate == 0 || to_rate == 0 {
        return signal.to_vec();
    }
    let out_len = (signal.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let last = signal.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * from_rate as f64 / to_rate as f64;
            let index = (position.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let frac = (position - index as f64) as f32;
            signal[index] * (1.0 - frac) + signal[next] * frac
        })
        .collect()
}

/// Zero mean, unit variance. `None` for a constant window.
fn normalize(window: &[f32]) -> Option<Vec<f32>> {
    let n = window.len() as f32;
    let mean = window.iter().sum::<f32>() / n;
    let variance = window.iter().map(|&s| (s - mean) * (s - mean)).sum::<f32>() / n;
    let std_dev = variance.sqrt();
    if !(std_dev > 1e-9) {
        return None;
    }
    Some(window.iter().map(|&s| (s - mean) / std_dev).collect())
}

/// Strongest strict local maximum in `[min_lag, max_lag]` that beats `threshold`.
fn select_peak(correlation: &[f32], min_lag: usize, max_lag: usize, threshold: f32) -> Option<usize> {
    let max_lag = max_lag.min(correlation.len().saturating_sub(2));
    let mut peaks: Vec<usize> = (min_lag.max(1)..=max_lag)
        .filter(|&lag| correlation[lag] > correlation[lag - 1] && correlation[lag] > correlation[lag + 1])
        .collect();

    peaks.sort_by(|&a, &b| {
        correlation[b]
            .partial_cmp(&correlation[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    peaks.into_iter().find(|&lag| correlation[lag] > threshold)
}

/// Vertex offset of the parabola through `lag - 1`, `lag`, `lag + 1`.
fn parabolic_shift(values: &[f32], lag: usize) -> f32 {
    let (y1, y2, y3) = (values[lag - 1], values[lag], values[lag + 1]);
    let shift = (y1 - y3) / (2.0 * (y1 - 2.0 * y2 + y3));
    if shift.is_finite() { shift } else { 0.0 }
}
