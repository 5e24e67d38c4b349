//! # Engine Configuration
//!
//! All tunables recognised by the engine. Every field has a default so a
//! partial TOML file (or none at all) yields a working configuration.
//!
//! ```toml
//! buffer_size = 4096
//! min_frequency = 80.0
//! max_frequency = 1000.0
//! detector_strategy = "spectral"
//! fallback_enabled = true
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::detector::DetectorStrategy;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Samples per captured frame.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Lowest frequency (Hz) either estimator will report.
    #[serde(default = "default_min_frequency")]
    pub min_frequency: f32,
    /// Highest frequency (Hz) either estimator will report.
    #[serde(default = "default_max_frequency")]
    pub max_frequency: f32,
    /// Frames with an RMS below this are treated as silence.
    #[serde(default = "default_silence_threshold_rms")]
    pub silence_threshold_rms: f32,
    /// Tick period of [`crate::engine::PitchEngine::run`].
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default)]
    pub detector_strategy: DetectorStrategy,
    /// Fall back to the spectral estimator when the primary one fails to load.
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,
    #[serde(default = "default_target_rms")]
    pub target_rms: f32,
    #[serde(default = "default_min_gain")]
    pub min_gain: f32,
    #[serde(default = "default_max_gain")]
    pub max_gain: f32,
    #[serde(default = "default_agc_adapt_speed")]
    pub agc_adapt_speed: f32,
    /// Consecutive unvoiced ticks after which the analyser and corrector are reset.
    #[serde(default = "default_silence_reset_ticks")]
    pub silence_reset_ticks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            min_frequency: default_min_frequency(),
            max_frequency: default_max_frequency(),
            silence_threshold_rms: default_silence_threshold_rms(),
            update_interval_ms: default_update_interval_ms(),
            detector_strategy: DetectorStrategy::default(),
            fallback_enabled: default_fallback_enabled(),
            target_rms: default_target_rms(),
            min_gain: default_min_gain(),
            max_gain: default_max_gain(),
            agc_adapt_speed: default_agc_adapt_speed(),
            silence_reset_ticks: default_silence_reset_ticks(),
        }
    }
}

fn default_buffer_size() -> usize { 4096 }
fn default_min_frequency() -> f32 { 80.0 }
fn default_max_frequency() -> f32 { 1000.0 }
fn default_silence_threshold_rms() -> f32 { 0.005 }
fn default_update_interval_ms() -> u64 { 40 }
fn default_fallback_enabled() -> bool { true }
fn default_target_rms() -> f32 { 0.1 }
fn default_min_gain() -> f32 { 0.5 }
fn default_max_gain() -> f32 { 10.0 }
fn default_agc_adapt_speed() -> f32 { 0.1 }
fn default_silence_reset_ticks() -> u32 { 10 }

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded engine config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid { field, reason: reason.into() }
        }

        if self.buffer_size == 0 {
            return Err(invalid("buffer_size", "must be greater than zero"));
        }
        if !(self.min_frequency > 0.0) {
            return Err(invalid("min_frequency", "must be positive"));
        }
        if !(self.max_frequency > self.min_frequency) {
            return Err(invalid(
                "max_frequency",
                format!("must exceed min_frequency ({})", self.min_frequency),
            ));
        }
        if !(self.silence_threshold_rms >= 0.0) {
            return Err(invalid("silence_threshold_rms", "must not be negative"));
        }
        if self.silence_reset_ticks == 0 {
            return Err(invalid("silence_reset_ticks", "must be greater than zero"));
        }
        if self.update_interval_ms == 0 {
            return Err(invalid("update_interval_ms", "must be greater than zero"));
        }
        if !(self.target_rms > 0.0) {
            return Err(invalid("target_rms", "must be positive"));
        }
        if !(self.min_gain > 0.0) {
            return Err(invalid("min_gain", "must be positive"));
        }
        if !(self.max_gain >= self.min_gain) {
            return Err(invalid("max_gain", "must not be below min_gain"));
        }
        if !(self.agc_adapt_speed > 0.0 && self.agc_adapt_speed <= 1.0) {
            return Err(invalid("agc_adapt_speed", "must be in (0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.detector_strategy, DetectorStrategy::Primary);
        assert!(config.fallback_enabled);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = EngineConfig::from_toml_str(
            "detector_strategy = \"spectral\"\nmin_frequency = 60.0\nfallback_enabled = false\n",
        )
        .unwrap();
        assert_eq!(config.detector_strategy, DetectorStrategy::Spectral);
        assert_eq!(config.min_frequency, 60.0);
        assert!(!config.fallback_enabled);
        assert_eq!(config.max_frequency, 1000.0);
    }

    #[test]
    fn inverted_frequency_range_is_rejected() {
        let err = EngineConfig::from_toml_str("min_frequency = 500.0\nmax_frequency = 400.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_frequency", .. }));
    }

    #[test]
    fn gain_bounds_are_checked() {
        let config = EngineConfig { min_gain: 4.0, max_gain: 2.0, ..EngineConfig::default() };
        assert!(config.validate().is_err());

        let config = EngineConfig { agc_adapt_speed: 0.0, ..EngineConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_silence_reset_is_rejected() {
        let err = EngineConfig::from_toml_str("silence_reset_ticks = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "silence_reset_ticks", .. }));
    }

    #[test]
    fn unknown_strategy_fails_to_parse() {
        let err = EngineConfig::from_toml_str("detector_strategy = \"neural\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
