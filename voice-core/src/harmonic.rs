//! Harmonic error correction.
//!
//! Pitch estimators occasionally lock onto the 3rd or 5th harmonic of a
//! voice, reporting a note an octave-plus-fifth (19 semitones) or two
//! octaves plus a major third (28 semitones) away from the real one. Such
//! jumps are rewritten against the median of recent notes. Plain octave
//! jumps (12 and 24 semitones) are left alone since singers make them on
//! purpose.

use std::collections::VecDeque;

/// Notes kept for the median baseline.
pub const BUFFER_CAPACITY: usize = 8;
/// Notes required before any correction is attempted.
pub const MIN_SAMPLES: usize = 4;

/// 5th harmonic: two octaves and a major third.
const FIFTH_HARMONIC_SEMITONES: f32 = 28.0;
/// 3rd harmonic: an octave and a fifth.
const THIRD_HARMONIC_SEMITONES: f32 = 19.0;
/// Accepted distance from each interval, in semitones.
const INTERVAL_TOLERANCE: f32 = 1.0;

#[derive(Debug, Clone, Default)]
pub struct HarmonicCorrector {
    notes: VecDeque<f32>,
}

impl HarmonicCorrector {
    pub fn new() -> Self {
        Self { notes: VecDeque::with_capacity(BUFFER_CAPACITY + 1) }
    }

    /// Feeds one raw MIDI estimate.
    ///
    /// # Returns
    /// * `(corrected, amount)` - the corrected note and the semitones
    ///   subtracted from the raw one (`corrected = raw - amount`); `amount`
    ///   is 0.0 when nothing was changed.
    pub fn correct(&mut self, raw_midi: f32) -> (f32, f32) {
        self.notes.push_back(raw_midi);
        if self.notes.len() > BUFFER_CAPACITY {
            self.notes.pop_front();
        }
        if self.notes.len() < MIN_SAMPLES {
            return (raw_midi, 0.0);
        }

        let baseline = median(&self.notes);
        let diff = raw_midi - baseline;
        let distance = diff.abs();

        let interval = if (distance - FIFTH_HARMONIC_SEMITONES).abs() <= INTERVAL_TOLERANCE {
            FIFTH_HARMONIC_SEMITONES
        } else if (distance - THIRD_HARMONIC_SEMITONES).abs() <= INTERVAL_TOLERANCE {
            THIRD_HARMONIC_SEMITONES
        } else {
            return (raw_midi, 0.0);
        };

        let amount = interval.copysign(diff);
        let corrected = raw_midi - amount;
        if let Some(newest) = self.notes.back_mut() {
            *newest = corrected;
        }
        log::debug!(
            "harmonic correction: {:.2} -> {:.2} (median {:.2})",
            raw_midi, corrected, baseline
        );
        (corrected, amount)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn reset(&mut self) {
        self.notes.clear();
    }
}

fn median(values: &VecDeque<f32>) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_baseline(note: f32, count: usize) -> HarmonicCorrector {
        let mut corrector = HarmonicCorrector::new();
        for _ in 0..count {
            assert_eq!(corrector.correct(note), (note, 0.0));
        }
        corrector
    }

    #[test]
    fn third_harmonic_jump_is_folded_back() {
        let mut corrector = with_baseline(60.0, 4);
        assert_eq!(corrector.correct(79.0), (60.0, 19.0));
    }

    #[test]
    fn fifth_harmonic_jump_is_folded_back() {
        let mut corrector = with_baseline(50.0, 5);
        assert_eq!(corrector.correct(78.0), (50.0, 28.0));
    }

    #[test]
    fn downward_jumps_are_corrected_upward() {
        let mut corrector = with_baseline(79.0, 4);
        // The amount is signed: corrected = raw - amount.
        let (corrected, amount) = corrector.correct(60.0);
        assert_eq!(corrected, 79.0);
        assert_eq!(amount, -19.0);
        assert_eq!(corrected, 60.0 - amount);
    }

    #[test]
    fn octave_jumps_pass_through() {
        let mut corrector = with_baseline(60.0, 4);
        assert_eq!(corrector.correct(72.0), (72.0, 0.0));

        let mut corrector = with_baseline(60.0, 4);
        assert_eq!(corrector.correct(84.0), (84.0, 0.0));
    }

    #[test]
    fn nothing_is_corrected_before_enough_samples() {
        let mut corrector = with_baseline(60.0, 2);
        // Third sample: still below MIN_SAMPLES.
        assert_eq!(corrector.correct(79.0), (79.0, 0.0));
    }

    #[test]
    fn corrected_value_feeds_later_medians() {
        let mut corrector = with_baseline(60.0, 4);
        corrector.correct(79.0);
        corrector.correct(79.0);
        corrector.correct(79.0);
        // Had the raw values been stored, the median would have drifted toward 79.
        assert_eq!(corrector.correct(79.0), (60.0, 19.0));
    }

    #[test]
    fn buffer_is_bounded() {
        let mut corrector = with_baseline(60.0, 20);
        assert_eq!(corrector.len(), BUFFER_CAPACITY);
        corrector.reset();
        assert!(corrector.is_empty());
    }

    #[test]
    fn fractional_intervals_within_tolerance_are_corrected() {
        let mut corrector = with_baseline(60.0, 4);
        let (corrected, amount) = corrector.correct(78.6);
        assert_eq!(amount, 19.0);
        assert!((corrected - 59.6).abs() < 1e-4);
    }
}
