//! Error types for the pitch engine.

use thiserror::Error;

/// Failures of a single pluggable pitch detector.
///
/// Cloneable so the last failure can be kept inside [`crate::detector::DetectorState::Error`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// The detector could not be brought into the `Ready` state.
    #[error("failed to load {detector} detector: {reason}")]
    LoadFailed {
        detector: &'static str,
        reason: String,
    },

    /// The detector was asked to run before it finished loading.
    #[error("{0} detector is not ready")]
    NotReady(&'static str),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Engine-level errors surfaced to the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No input device, permission denied, or the stream could not start.
    /// Fatal; the engine never retries capture on its own.
    #[error("audio capture failed: {0:#}")]
    Capture(anyhow::Error),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `detect_and_notify` or `run` called before a successful `initialize`.
    #[error("pitch engine is not initialized")]
    NotReady,
}
