//! # Musical Tuning Module
//!
//! Frequency, MIDI and note-name conversions in 12-tone equal temperament
//! with A4 = 440 Hz (MIDI 69).
//!
//! MIDI numbers are handled as `f32` so fractional notes carry the
//! sub-semitone deviation the harmonic corrector and cents readout need.

use once_cell::sync::Lazy;

/// Reference pitch of A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;
/// MIDI number of A4.
pub const A4_MIDI: f32 = 69.0;

/// Note names for MIDI 0 (C-1) to 127 (G9).
static NOTE_NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    const PITCH_CLASSES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    (0..128)
        .map(|midi: i32| {
            let octave = midi / 12 - 1;
            format!("{}{}", PITCH_CLASSES[(midi % 12) as usize], octave)
        })
        .collect()
});

/// Converts a frequency to a (fractional) MIDI note number.
pub fn frequency_to_midi(freq: f32) -> f32 {
    A4_MIDI + 12.0 * (freq / A4_FREQUENCY).log2()
}

/// Converts a (fractional) MIDI note number to a frequency.
pub fn midi_to_frequency(midi: f32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - A4_MIDI) / 12.0)
}

/// Name of an integer MIDI note, e.g. 60 -> "C4". `None` outside 0..=127.
pub fn midi_to_note_name(midi: i32) -> Option<&'static str> {
    usize::try_from(midi)
        .ok()
        .and_then(|index| NOTE_NAMES.get(index))
        .map(String::as_str)
}

/// Finds the closest equal-tempered note to a frequency.
///
/// # Returns
/// * `(midi_note, note_name, cents_off)` - nearest MIDI note, its name, and the
///   deviation of `freq` from it in cents (positive = sharp). `None` when the
///   frequency is not positive or lies outside the MIDI range.
pub fn find_nearest_note(freq: f32) -> Option<(i32, &'static str, f32)> {
    if !(freq > 0.0) || !freq.is_finite() {
        return None;
    }
    let midi = frequency_to_midi(freq);
    let nearest = midi.round() as i32;
    let name = midi_to_note_name(nearest)?;
    Some((nearest, name, (midi - nearest as f32) * 100.0))
}

/// Calculates the deviation from a target frequency in cents.
///
/// - 100 cents = 1 semitone, 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values flatness
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_round_trips() {
        assert!((frequency_to_midi(440.0) - 69.0).abs() < 1e-5);
        assert!((midi_to_frequency(69.0) - 440.0).abs() < 1e-3);
        assert!((midi_to_frequency(60.0) - 261.6256).abs() < 1e-2);
    }

    #[test]
    fn note_names_follow_scientific_pitch_notation() {
        assert_eq!(midi_to_note_name(60), Some("C4"));
        assert_eq!(midi_to_note_name(69), Some("A4"));
        assert_eq!(midi_to_note_name(61), Some("C#4"));
        assert_eq!(midi_to_note_name(0), Some("C-1"));
        assert_eq!(midi_to_note_name(127), Some("G9"));
        assert_eq!(midi_to_note_name(128), None);
        assert_eq!(midi_to_note_name(-1), None);
    }

    #[test]
    fn nearest_note_reports_cents() {
        let sharp = midi_to_frequency(69.25);
        let (midi, name, cents) = find_nearest_note(sharp).unwrap();
        assert_eq!(midi, 69);
        assert_eq!(name, "A4");
        assert!((cents - 25.0).abs() < 0.1);

        assert!(find_nearest_note(0.0).is_none());
        assert!(find_nearest_note(f32::NAN).is_none());
    }

    #[test]
    fn octave_is_twelve_hundred_cents() {
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-3);
        assert!((calculate_cents_deviation(220.0, 440.0) + 1200.0).abs() < 1e-3);
    }
}
