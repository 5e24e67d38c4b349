//! Automatic gain control.
//!
//! Runs once per tick ahead of pitch detection. The controller only decides
//! the gain; the capture path applies it to the samples that follow.

use crate::audio::{AudioFrame, FrameSource};
use crate::config::EngineConfig;

/// Frames quieter than this leave the gain untouched.
const SILENCE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct GainState {
    pub current_gain: f32,
    pub target_rms: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub adapt_speed: f32,
}

#[derive(Debug, Clone)]
pub struct GainController {
    state: GainState,
}

impl GainController {
    pub fn new(target_rms: f32, min_gain: f32, max_gain: f32, adapt_speed: f32) -> Self {
        Self {
            state: GainState {
                current_gain: 1.0_f32.clamp(min_gain, max_gain),
                target_rms,
                min_gain,
                max_gain,
                adapt_speed,
            },
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.target_rms, config.min_gain, config.max_gain, config.agc_adapt_speed)
    }

    pub fn state(&self) -> &GainState {
        &self.state
    }

    pub fn current_gain(&self) -> f32 {
        self.state.current_gain
    }

    /// Measures the frame and moves the gain one step toward `target_rms`.
    ///
    /// Returns the frame's RMS. The frame itself is not modified.
    pub fn process(&mut self, frame: &AudioFrame) -> f32 {
        let rms = frame.rms();
        if !(rms > SILENCE_EPSILON) || !rms.is_finite() {
            return rms;
        }

        let state = &mut self.state;
        let desired = (state.target_rms / rms * state.current_gain).clamp(state.min_gain, state.max_gain);
        let next = state.current_gain + (desired - state.current_gain) * state.adapt_speed;
        state.current_gain = next.clamp(state.min_gain, state.max_gain);

        log::trace!("agc: rms={:.4} gain={:.3}", rms, state.current_gain);
        rms
    }

    /// [`GainController::process`], then pushes the new gain to the capture path.
    pub fn process_and_apply(&mut self, frame: &AudioFrame, source: &mut impl FrameSource) -> f32 {
        let rms = self.process(frame);
        source.apply_gain(self.state.current_gain);
        rms
    }
}
