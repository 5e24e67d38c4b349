// voice-core/src/lib.rs

//! The core logic for real-time voice pitch analysis.
//! This crate is responsible for audio capture, gain control, pitch
//! detection, harmonic error correction and vocal-quality metrics.
//! It is completely headless and contains no UI code.

pub mod audio;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod fft;
pub mod gain;
pub mod harmonic;
pub mod pitch;
pub mod quality;
pub mod tuning;

use serde::Serialize;

pub use audio::{AudioFrame, FrameSource, MicrophoneSource};
pub use config::EngineConfig;
pub use detector::{DetectorState, DetectorStrategy};
pub use engine::PitchEngine;
pub use error::{ConfigError, DetectorError, EngineError};
pub use quality::VocalQualityMetrics;

/// The engine's output for one voiced tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchSample {
    /// Detected fundamental in Hz, after harmonic correction.
    pub frequency: f32,
    /// Confidence reported by the detector (0.0 to 1.0).
    pub confidence: f32,
    /// Name of the nearest note, e.g. "A4".
    pub note_name: String,
    /// MIDI number of the nearest note.
    pub midi_note: i32,
    /// Deviation from the nearest note in cents.
    pub cents_off: f32,
    /// Milliseconds since the engine was created.
    pub timestamp_ms: f64,
    /// RMS of the frame before gain adjustment for the next one.
    pub rms: f32,
    pub vocal_analysis: VocalQualityMetrics,
    /// Which detector produced the frequency.
    pub detector_name: &'static str,
}
