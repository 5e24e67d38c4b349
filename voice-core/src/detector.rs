//! # Pluggable Pitch Detectors
//!
//! The engine chooses between two interchangeable estimators:
//!
//! - **Primary**: the McLeod pitch method from the `pitch-detection` crate,
//!   tuned for monophonic voice
//! - **Spectral**: the engine's own autocorrelation estimator
//!   ([`SpectralPitchEstimator`]), used as fallback or on request
//!
//! Both produce a [`PitchEstimate`] and are wrapped in the closed [`Detector`] enum.

use pitch_detection::detector::PitchDetector;
use pitch_detection::detector::mcleod::McLeodDetector;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;
use crate::config::EngineConfig;
use crate::error::DetectorError;
use crate::pitch::{PitchEstimate, SpectralPitchEstimator};

/// Which estimator the engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorStrategy {
    #[default]
    Primary,
    Spectral,
}

impl DetectorStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            DetectorStrategy::Primary => PrimaryEstimator::NAME,
            DetectorStrategy::Spectral => SpectralPitchEstimator::NAME,
        }
    }
}

impl std::str::FromStr for DetectorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(DetectorStrategy::Primary),
            "spectral" => Ok(DetectorStrategy::Spectral),
            other => Err(format!("unknown detector strategy `{other}` (expected primary or spectral)")),
        }
    }
}

/// Lifecycle of a detector.
///
/// `Unloaded -> Loading -> Ready`, or `Loading -> Error`. The only backward
/// step is `Error -> Loading` when the caller retries.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DetectorState {
    #[default]
    Unloaded,
    Loading,
    Ready,
    Error(DetectorError),
}

impl DetectorState {
    pub fn can_transition_to(&self, next: &DetectorState) -> bool {
        matches!(
            (self, next),
            (DetectorState::Unloaded, DetectorState::Loading)
                | (DetectorState::Loading, DetectorState::Ready)
                | (DetectorState::Loading, DetectorState::Error(_))
                | (DetectorState::Error(_), DetectorState::Loading)
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DetectorState::Ready)
    }
}

/// Clarity below which the McLeod detector reports no pitch.
const PRIMARY_CLARITY_THRESHOLD: f32 = 0.6;
/// Smallest analysis window the McLeod detector is loaded with.
const PRIMARY_MIN_WINDOW: usize = 256;

/// The primary estimator: a McLeod detector sized to the capture frame.
pub struct PrimaryEstimator {
    detector: Option<McLeodDetector<f32>>,
    window_size: usize,
    min_frequency: f32,
    max_frequency: f32,
    silence_rms: f32,
}

impl std::fmt::Debug for PrimaryEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryEstimator")
            .field("window_size", &self.window_size)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl PrimaryEstimator {
    pub const NAME: &'static str = "primary";

    pub fn new(config: &EngineConfig) -> Self {
        Self {
            detector: None,
            window_size: config.buffer_size,
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            silence_rms: config.silence_threshold_rms,
        }
    }

    /// Default loader: builds and initialises an estimator from `config`.
    pub fn load(config: &EngineConfig) -> Result<Self, DetectorError> {
        let mut estimator = Self::new(config);
        estimator.initialize()?;
        Ok(estimator)
    }

    /// Allocates the McLeod detector's scratch buffers.
    pub fn initialize(&mut self) -> Result<(), DetectorError> {
        if self.window_size < PRIMARY_MIN_WINDOW {
            return Err(DetectorError::LoadFailed {
                detector: Self::NAME,
                reason: format!(
                    "window of {} samples is below the minimum of {}",
                    self.window_size, PRIMARY_MIN_WINDOW
                ),
            });
        }
        self.detector = Some(McLeodDetector::new(self.window_size, self.window_size / 2));
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_some()
    }

    pub fn detect(&mut self, frame: &AudioFrame) -> PitchEstimate {
        let Some(detector) = self.detector.as_mut() else {
            return PitchEstimate::UNVOICED;
        };
        if frame.len() < self.window_size || frame.sample_rate == 0 {
            return PitchEstimate::UNVOICED;
        }
        let signal = &frame.samples[frame.len() - self.window_size..];

        // The crate gates on the summed power of the window.
        let power_threshold = self.silence_rms * self.silence_rms * self.window_size as f32;
        let Some(pitch) = detector.get_pitch(
            signal,
            frame.sample_rate as usize,
            power_threshold,
            PRIMARY_CLARITY_THRESHOLD,
        ) else {
            return PitchEstimate::UNVOICED;
        };

        let in_band = pitch.frequency >= self.min_frequency && pitch.frequency <= self.max_frequency;
        if !pitch.frequency.is_finite() || !in_band {
            return PitchEstimate::UNVOICED;
        }
        PitchEstimate::voiced(pitch.frequency, pitch.clarity)
    }
}

/// Builds the primary estimator. Replaceable so callers can supply their own
/// loading step (and tests can force a failure).
pub type PrimaryLoader = fn(&EngineConfig) -> Result<PrimaryEstimator, DetectorError>;

/// One of the two interchangeable estimators.
#[derive(Debug)]
pub enum Detector {
    Primary(PrimaryEstimator),
    Spectral(SpectralPitchEstimator),
}

impl Detector {
    pub fn initialize(&mut self) -> Result<(), DetectorError> {
        match self {
            Detector::Primary(estimator) => estimator.initialize(),
            Detector::Spectral(estimator) => estimator.initialize(),
        }
    }

    pub fn detect(&mut self, frame: &AudioFrame) -> PitchEstimate {
        match self {
            Detector::Primary(estimator) => estimator.detect(frame),
            Detector::Spectral(estimator) => estimator.detect(frame),
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            Detector::Primary(estimator) => estimator.is_ready(),
            Detector::Spectral(estimator) => estimator.is_ready(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.strategy().name()
    }

    pub fn strategy(&self) -> DetectorStrategy {
        match self {
            Detector::Primary(_) => DetectorStrategy::Primary,
            Detector::Spectral(_) => DetectorStrategy::Spectral,
        }
    }
}
