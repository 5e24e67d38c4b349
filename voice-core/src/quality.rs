//! # Vocal Quality Module
//!
//! Perceptual metrics derived from the pitch history and the per-frame
//! decibel spectrum:
//!
//! - **Vibrato**: periodic pitch oscillation, as rate (Hz) and peak-to-peak extent (cents)
//! - **Stability**: short-term pitch steadiness, 1.0 for a perfectly held note
//! - **Spectral centroid**: brightness, normalised to 0..1
//! - **HNR**: share of energy near the harmonics of the fundamental (inverse breathiness)
//!
//! Centroid and HNR are low-pass filtered across calls. The filter state
//! lives on the analyser, so callers keep one instance alive for a whole
//! session and call [`VocalQualityAnalyzer::reset`] after sustained silence.

use std::collections::VecDeque;

use serde::Serialize;

use crate::fft::FrequencyTransform;
use crate::tuning::calculate_cents_deviation;

/// Pitch points retained (about one second of ticks).
pub const HISTORY_CAPACITY: usize = 30;
/// Points used for vibrato analysis.
pub const VIBRATO_WINDOW: usize = 15;
/// Points used for the stability score.
pub const STABILITY_WINDOW: usize = 10;

const VIBRATO_MIN_EXTENT_CENTS: f32 = 15.0;
const VIBRATO_MIN_RATE_HZ: f32 = 4.0;
const VIBRATO_MAX_RATE_HZ: f32 = 8.0;

/// Deviation (cents) at which stability reaches zero.
const STABILITY_SPREAD_CENTS: f32 = 100.0;

const VOICE_BAND_HZ: (f32, f32) = (100.0, 5000.0);
const CENTROID_FLOOR_DB: f32 = 40.0;
const CENTROID_RANGE_HZ: (f32, f32) = (400.0, 2500.0);
const CENTROID_SMOOTHING: f32 = 0.3;

const HNR_FLOOR_DB: f32 = 50.0;
const HNR_HARMONICS: usize = 8;
const HNR_BIN_TOLERANCE: usize = 2;
const HNR_MAX_PARTIAL: f32 = 10.0;
const HNR_SMOOTHING: f32 = 0.4;

const DEFAULT_STABILITY: f32 = 1.0;
const DEFAULT_CENTROID: f32 = 0.5;
const DEFAULT_HNR: f32 = 1.0;

/// One voiced pitch reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchPoint {
    pub frequency: f32,
    pub timestamp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vibrato {
    pub detected: bool,
    pub rate_hz: f32,
    pub extent_cents: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VocalQualityMetrics {
    pub vibrato: Vibrato,
    /// 0.0 to 1.0, 1.0 = perfectly steady.
    pub stability: f32,
    /// 0.0 (dark) to 1.0 (bright).
    pub spectral_centroid: f32,
    /// 0.0 (breathy) to 1.0 (clear).
    pub hnr: f32,
}

impl Default for VocalQualityMetrics {
    fn default() -> Self {
        Self {
            vibrato: Vibrato::default(),
            stability: DEFAULT_STABILITY,
            spectral_centroid: DEFAULT_CENTROID,
            hnr: DEFAULT_HNR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VocalQualityAnalyzer {
    history: VecDeque<PitchPoint>,
    metrics: VocalQualityMetrics,
}

impl Default for VocalQualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl VocalQualityAnalyzer {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
            metrics: VocalQualityMetrics::default(),
        }
    }

    /// Updates every metric for one tick.
    ///
    /// A `Some(frequency)` is appended to the history first. Unvoiced ticks
    /// still refresh the brightness estimate but hold the HNR.
    pub fn analyze(
        &mut self,
        frequency: Option<f32>,
        timestamp_ms: f64,
        transform: &FrequencyTransform,
    ) -> VocalQualityMetrics {
        if let Some(frequency) = frequency.filter(|f| *f > 0.0 && f.is_finite()) {
            self.history.push_back(PitchPoint { frequency, timestamp_ms });
            if self.history.len() > HISTORY_CAPACITY {
                self.history.pop_front();
            }
        }

        self.metrics.vibrato = self.analyze_vibrato();
        if let Some(stability) = self.analyze_stability() {
            self.metrics.stability = stability;
        }

        if let Some(centroid) = spectral_centroid(transform) {
            self.metrics.spectral_centroid = smooth(self.metrics.spectral_centroid, centroid, CENTROID_SMOOTHING);
        }
        if let Some(hnr) = frequency.and_then(|f| harmonic_ratio(transform, f)) {
            self.metrics.hnr = smooth(self.metrics.hnr, hnr, HNR_SMOOTHING);
        }

        self.metrics
    }

    /// Current metrics without analysing anything new.
    pub fn metrics(&self) -> VocalQualityMetrics {
        self.metrics
    }

    pub fn vibrato(&self) -> Vibrato {
        self.metrics.vibrato
    }

    pub fn stability(&self) -> f32 {
        self.metrics.stability
    }

    pub fn spectral_centroid(&self) -> f32 {
        self.metrics.spectral_centroid
    }

    pub fn hnr(&self) -> f32 {
        self.metrics.hnr
    }

    pub fn history(&self) -> impl Iterator<Item = &PitchPoint> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Clears the history and restores every metric to its default.
    pub fn reset(&mut self) {
        self.history.clear();
        self.metrics = VocalQualityMetrics::default();
    }

    /// Vibrato over the newest [`VIBRATO_WINDOW`] points.
    pub fn analyze_vibrato(&self) -> Vibrato {
        if self.history.len() < VIBRATO_WINDOW {
            return Vibrato::default();
        }
        let window: Vec<PitchPoint> = self
            .history
            .iter()
            .skip(self.history.len() - VIBRATO_WINDOW)
            .copied()
            .collect();

        let reference = window[0].frequency;
        let raw: Vec<f32> = window
            .iter()
            .map(|p| calculate_cents_deviation(p.frequency, reference))
            .collect();
        let mean = raw.iter().sum::<f32>() / raw.len() as f32;
        let cents: Vec<f32> = raw.iter().map(|c| c - mean).collect();

        let (min, max) = cents
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &c| (lo.min(c), hi.max(c)));
        let extent = max - min;
        if !(extent >= VIBRATO_MIN_EXTENT_CENTS) {
            return Vibrato::default();
        }

        let crossings = cents
            .windows(2)
            .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
            .count();
        let span_s = (window[window.len() - 1].timestamp_ms - window[0].timestamp_ms) / 1000.0;
        if !(span_s > 0.0) {
            return Vibrato::default();
        }
        let rate = (crossings as f64 / 2.0 / span_s) as f32;

        if (VIBRATO_MIN_RATE_HZ..=VIBRATO_MAX_RATE_HZ).contains(&rate) {
            Vibrato { detected: true, rate_hz: rate, extent_cents: extent }
        } else {
            Vibrato::default()
        }
    }

    /// Stability over the newest [`STABILITY_WINDOW`] points; `None` until enough exist.
    pub fn analyze_stability(&self) -> Option<f32> {
        if self.history.len() < STABILITY_WINDOW {
            return None;
        }
        let mut window = self.history.iter().skip(self.history.len() - STABILITY_WINDOW);
        let reference = window.next()?.frequency;
        let cents: Vec<f32> = std::iter::once(0.0)
            .chain(window.map(|p| calculate_cents_deviation(p.frequency, reference)))
            .collect();

        let n = cents.len() as f32;
        let mean = cents.iter().sum::<f32>() / n;
        let std_dev = (cents.iter().map(|c| (c - mean) * (c - mean)).sum::<f32>() / n).sqrt();
        Some((1.0 - std_dev / STABILITY_SPREAD_CENTS).max(0.0))
    }
}

fn smooth(previous: f32, current: f32, factor: f32) -> f32 {
    (previous + (current - previous) * factor).clamp(0.0, 1.0)
}

/// Bins of `transform` whose centre lies in `[low, high]` Hz.
fn band(transform: &FrequencyTransform, low: f32, high: f32) -> std::ops::Range<usize> {
    if !(transform.bin_width > 0.0) {
        return 0..0;
    }
    let start = (low / transform.bin_width).ceil() as usize;
    let end = ((high / transform.bin_width).floor() as usize)
        .saturating_add(1)
        .min(transform.len());
    start.min(end)..end
}

fn peak_db(values: &[f32]) -> Option<f32> {
    values
        .iter()
        .copied()
        .filter(|db| db.is_finite())
        .fold(None, |peak, db| Some(peak.map_or(db, |p: f32| p.max(db))))
}

/// Linear magnitude of `db` relative to `peak` (1.0 at the peak).
fn relative_magnitude(db: f32, peak: f32) -> f32 {
    10.0_f32.powf((db - peak) / 20.0)
}

/// Normalised spectral centroid of the voice band, or `None` without usable energy.
fn spectral_centroid(transform: &FrequencyTransform) -> Option<f32> {
    let bins = band(transform, VOICE_BAND_HZ.0, VOICE_BAND_HZ.1);
    let peak = peak_db(&transform.magnitudes_db[bins.clone()])?;
    let floor = peak - CENTROID_FLOOR_DB;

    let (weighted, total) = bins
        .filter(|&bin| {
            let db = transform.magnitudes_db[bin];
            db.is_finite() && db >= floor
        })
        .fold((0.0_f32, 0.0_f32), |(weighted, total), bin| {
            let magnitude = relative_magnitude(transform.magnitudes_db[bin], peak);
            (weighted + magnitude * transform.bin_frequency(bin), total + magnitude)
        });
    if !(total > 0.0) {
        return None;
    }

    let centroid_hz = weighted / total;
    let (low, high) = CENTROID_RANGE_HZ;
    let normalised = (centroid_hz - low) / (high - low);
    normalised.is_finite().then(|| normalised.clamp(0.0, 1.0))
}

/// Normalised harmonic-to-total energy ratio, or `None` without usable energy.
fn harmonic_ratio(transform: &FrequencyTransform, fundamental: f32) -> Option<f32> {
    if !(fundamental > 0.0) || !(transform.bin_width > 0.0) {
        return None;
    }
    let fundamental_bin = fundamental / transform.bin_width;
    let max_hz = (fundamental * HNR_MAX_PARTIAL).min(VOICE_BAND_HZ.1);
    let bins = band(transform, 0.0, max_hz);
    let peak = peak_db(&transform.magnitudes_db[bins.clone()])?;
    let floor = peak - HNR_FLOOR_DB;

    let harmonic_bins: Vec<usize> = (1..=HNR_HARMONICS)
        .map(|h| (fundamental_bin * h as f32).round() as usize)
        .collect();

    let (harmonic, total) = bins
        .filter(|&bin| {
            let db = transform.magnitudes_db[bin];
            db.is_finite() && db >= floor
        })
        .fold((0.0_f32, 0.0_f32), |(harmonic, total), bin| {
            let energy = relative_magnitude(transform.magnitudes_db[bin], peak).powi(2);
            let near_harmonic = harmonic_bins.iter().any(|&h| h.abs_diff(bin) <= HNR_BIN_TOLERANCE);
            (if near_harmonic { harmonic + energy } else { harmonic }, total + energy)
        });
    if !(total > 0.0) {
        return None;
    }

    let ratio = harmonic / total;
    Some(((ratio - 0.1) / 0.7).clamp(0.0, 1.0))
}
