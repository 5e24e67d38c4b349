//! # Pitch Engine
//!
//! Owns the detector lifecycle and runs the per-tick pipeline:
//!
//! ```text
//! frame -> AGC -> detector -> harmonic correction -> vocal quality -> PitchSample
//! ```
//!
//! The engine is single-threaded. [`PitchEngine::run`] drives ticks from a
//! timer channel until told to stop; ticks never overlap, so detector
//! switches made between ticks are always safe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::audio::FrameSource;
use crate::config::EngineConfig;
use crate::detector::{Detector, DetectorState, DetectorStrategy, PrimaryEstimator, PrimaryLoader};
use crate::error::{DetectorError, EngineError};
use crate::fft;
use crate::gain::GainController;
use crate::harmonic::HarmonicCorrector;
use crate::pitch::SpectralPitchEstimator;
use crate::quality::VocalQualityAnalyzer;
use crate::tuning;
use crate::PitchSample;

pub struct PitchEngine<S: FrameSource> {
    config: EngineConfig,
    source: S,
    requested: DetectorStrategy,
    detector: Option<Detector>,
    state: DetectorState,
    primary_loader: PrimaryLoader,
    gain: GainController,
    corrector: HarmonicCorrector,
    analyzer: VocalQualityAnalyzer,
    silent_ticks: u32,
    last_sample: Option<PitchSample>,
    running: Arc<AtomicBool>,
    started: Instant,
}

impl<S: FrameSource> PitchEngine<S> {
    /// Creates an engine for `config.detector_strategy`. No detector is
    /// loaded until [`PitchEngine::initialize`].
    pub fn new(config: EngineConfig, source: S) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            requested: config.detector_strategy,
            gain: GainController::from_config(&config),
            config,
            source,
            detector: None,
            state: DetectorState::Unloaded,
            primary_loader: PrimaryEstimator::load,
            corrector: HarmonicCorrector::new(),
            analyzer: VocalQualityAnalyzer::new(),
            silent_ticks: 0,
            last_sample: None,
            running: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        })
    }

    /// Replaces the step that loads the primary estimator.
    pub fn with_primary_loader(mut self, loader: PrimaryLoader) -> Self {
        self.primary_loader = loader;
        self
    }

    /// Like [`PitchEngine::with_primary_loader`], for an engine already in use
    /// (e.g. before retrying a failed `initialize`).
    pub fn set_primary_loader(&mut self, loader: PrimaryLoader) {
        self.primary_loader = loader;
    }

    /// Loads the requested detector.
    ///
    /// If the primary detector fails and fallback is enabled, the spectral
    /// estimator is loaded instead and the engine is ready anyway. Without
    /// fallback the failure is recorded in [`PitchEngine::state`] and returned.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.state.is_ready() && self.detector.is_some() {
            return Ok(());
        }
        self.set_state(DetectorState::Loading);
        log::info!("Loading {} detector...", self.requested.name());

        let loaded = match self.load(self.requested) {
            Ok(detector) => Ok(detector),
            Err(err) if self.requested == DetectorStrategy::Primary && self.config.fallback_enabled => {
                log::warn!("{}; falling back to the {} detector", err, SpectralPitchEstimator::NAME);
                self.load(DetectorStrategy::Spectral)
            }
            Err(err) => Err(err),
        };

        match loaded {
            Ok(detector) => {
                log::info!("{} detector ready", detector.name());
                self.detector = Some(detector);
                self.set_state(DetectorState::Ready);
                Ok(())
            }
            Err(err) => {
                log::error!("Detector initialization failed: {}", err);
                self.detector = None;
                self.set_state(DetectorState::Error(err.clone()));
                Err(err.into())
            }
        }
    }

    fn load(&self, strategy: DetectorStrategy) -> Result<Detector, DetectorError> {
        let detector = match strategy {
            DetectorStrategy::Primary => Detector::Primary((self.primary_loader)(&self.config)?),
            DetectorStrategy::Spectral => {
                let mut detector = Detector::Spectral(SpectralPitchEstimator::from_config(&self.config));
                detector.initialize()?;
                detector
            }
        };
        if !detector.is_ready() {
            return Err(DetectorError::NotReady(detector.name()));
        }
        Ok(detector)
    }

    fn set_state(&mut self, next: DetectorState) {
        if !self.state.can_transition_to(&next) {
            log::warn!("Unexpected detector state transition: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    /// Swaps to `strategy`, keeping the pitch history and correction buffer.
    pub fn switch_detector(&mut self, strategy: DetectorStrategy) -> Result<(), EngineError> {
        log::info!("Switching detector: {} -> {}", self.active_name().unwrap_or("none"), strategy.name());
        self.requested = strategy;
        self.detector = None;
        self.state = DetectorState::Unloaded;
        self.initialize()
    }

    /// Runs one tick of the pipeline.
    ///
    /// # Returns
    /// * `Ok(Some(sample))` - a voiced frame
    /// * `Ok(None)` - no new frame, or silence / unvoiced input
    /// * `Err(EngineError::NotReady)` - called before a successful `initialize`
    pub fn detect_and_notify(&mut self) -> Result<Option<PitchSample>, EngineError> {
        let Some(detector) = self.detector.as_mut() else {
            return Err(EngineError::NotReady);
        };
        let Some(frame) = self.source.next_frame() else {
            return Ok(None);
        };

        let rms = self.gain.process_and_apply(&frame, &mut self.source);
        let estimate = detector.detect(&frame);
        let detector_name = detector.name();

        let Some(raw_frequency) = estimate.frequency else {
            self.register_silence();
            return Ok(None);
        };
        self.silent_ticks = 0;

        let (midi, correction) = self.corrector.correct(tuning::frequency_to_midi(raw_frequency));
        let frequency = if correction != 0.0 { tuning::midi_to_frequency(midi) } else { raw_frequency };

        let Some((midi_note, note_name, cents_off)) = tuning::find_nearest_note(frequency) else {
            self.register_silence();
            return Ok(None);
        };

        let timestamp_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let transform = fft::compute_transform(&frame);
        let vocal_analysis = self.analyzer.analyze(Some(frequency), timestamp_ms, &transform);

        let sample = PitchSample {
            frequency,
            confidence: estimate.confidence,
            note_name: note_name.to_string(),
            midi_note,
            cents_off,
            timestamp_ms,
            rms,
            vocal_analysis,
            detector_name,
        };
        log::trace!("{} {:.2} Hz ({:+.1} cents)", sample.note_name, frequency, cents_off);

        self.last_sample = Some(sample.clone());
        Ok(Some(sample))
    }

    /// Counts an unvoiced tick; a long enough run resets the rolling state
    /// so it does not leak into the next phrase.
    fn register_silence(&mut self) {
        self.silent_ticks = self.silent_ticks.saturating_add(1);
        if self.silent_ticks == self.config.silence_reset_ticks {
            log::debug!("Sustained silence; resetting analysis state");
            self.analyzer.reset();
            self.corrector.reset();
        }
    }

    /// Ticks every `update_interval_ms` and sends each sample to `sink`.
    ///
    /// Returns when a message arrives on (or the sender of) `shutdown`, or
    /// when `sink` is disconnected.
    pub fn run(&mut self, sink: &Sender<PitchSample>, shutdown: &Receiver<()>) -> Result<(), EngineError> {
        if self.detector.is_none() {
            return Err(EngineError::NotReady);
        }
        let ticker = crossbeam_channel::tick(Duration::from_millis(self.config.update_interval_ms));
        self.running.store(true, Ordering::SeqCst);
        log::info!("Pitch engine running every {} ms", self.config.update_interval_ms);

        let result = loop {
            crossbeam_channel::select! {
                recv(ticker) -> _ => match self.detect_and_notify() {
                    Ok(Some(sample)) => {
                        if sink.send(sample).is_err() {
                            log::info!("Sample consumer disconnected");
                            break Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => break Err(err),
                },
                recv(shutdown) -> _ => {
                    log::info!("Received shutdown signal");
                    break Ok(());
                },
            }
        };

        self.running.store(false, Ordering::SeqCst);
        log::info!("Pitch engine stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared flag mirroring [`PitchEngine::is_running`], readable from other threads.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn requested_strategy(&self) -> DetectorStrategy {
        self.requested
    }

    /// Strategy actually running, which differs from the requested one after a fallback.
    pub fn active_strategy(&self) -> Option<DetectorStrategy> {
        self.detector.as_ref().map(Detector::strategy)
    }

    pub fn active_name(&self) -> Option<&'static str> {
        self.detector.as_ref().map(Detector::name)
    }

    pub fn last_sample(&self) -> Option<&PitchSample> {
        self.last_sample.as_ref()
    }

    pub fn analyzer(&self) -> &VocalQualityAnalyzer {
        &self.analyzer
    }

    pub fn gain(&self) -> &GainController {
        &self.gain
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
