use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use voice_core::detector::{DetectorState, DetectorStrategy, PrimaryEstimator};
use voice_core::{AudioFrame, DetectorError, EngineConfig, EngineError, FrameSource, PitchEngine};

const SAMPLE_RATE: u32 = 44100;
const FRAME_SIZE: usize = 4096;

/// Plays back a fixed list of frames, then keeps repeating the last one.
#[derive(Debug, Default)]
struct ScriptedSource {
    frames: VecDeque<AudioFrame>,
    last: Option<AudioFrame>,
    applied_gains: Vec<f32>,
}

impl ScriptedSource {
    fn new(frames: impl IntoIterator<Item = AudioFrame>) -> Self {
        Self { frames: frames.into_iter().collect(), ..Self::default() }
    }

    fn tone(freq: f32) -> Self {
        Self::new([sine(freq, 0.5)])
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        if let Some(frame) = self.frames.pop_front() {
            self.last = Some(frame);
        }
        self.last.clone()
    }

    fn apply_gain(&mut self, gain: f32) {
        self.applied_gains.push(gain);
    }
}

/// A source that never delivers a frame.
struct EmptySource;

impl FrameSource for EmptySource {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        None
    }
}

fn sine(freq: f32, amplitude: f32) -> AudioFrame {
    let samples = (0..FRAME_SIZE)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
        .collect();
    AudioFrame::new(samples, SAMPLE_RATE)
}

fn silence() -> AudioFrame {
    AudioFrame::new(vec![0.0; FRAME_SIZE], SAMPLE_RATE)
}

fn failing_loader(_: &EngineConfig) -> Result<PrimaryEstimator, DetectorError> {
    Err(DetectorError::LoadFailed { detector: "primary", reason: "model unavailable".into() })
}

fn config(strategy: DetectorStrategy, fallback_enabled: bool) -> EngineConfig {
    EngineConfig { detector_strategy: strategy, fallback_enabled, ..EngineConfig::default() }
}

#[test]
fn failed_primary_falls_back_to_spectral() {
    let mut engine = PitchEngine::new(config(DetectorStrategy::Primary, true), ScriptedSource::tone(440.0))
        .unwrap()
        .with_primary_loader(failing_loader);

    engine.initialize().unwrap();
    assert_eq!(engine.state(), &DetectorState::Ready);
    assert_eq!(engine.requested_strategy(), DetectorStrategy::Primary);
    assert_eq!(engine.active_strategy(), Some(DetectorStrategy::Spectral));

    let sample = engine.detect_and_notify().unwrap().expect("a voiced sample");
    assert!((sample.frequency - 440.0).abs() < 4.4, "got {}", sample.frequency);
    assert_eq!(sample.detector_name, "spectral");
    assert_eq!(sample.note_name, "A4");
    assert_eq!(sample.midi_note, 69);
    assert!(sample.confidence > 0.3);
}

#[test]
fn failed_primary_without_fallback_is_surfaced() {
    let mut engine = PitchEngine::new(config(DetectorStrategy::Primary, false), ScriptedSource::tone(440.0))
        .unwrap()
        .with_primary_loader(failing_loader);

    let err = engine.initialize().unwrap_err();
    assert!(matches!(err, EngineError::Detector(DetectorError::LoadFailed { .. })));
    assert!(matches!(engine.state(), DetectorState::Error(_)));
    assert!(matches!(engine.detect_and_notify(), Err(EngineError::NotReady)));

    // A second failed attempt goes Error -> Loading -> Error again.
    assert!(engine.initialize().is_err());
    assert!(matches!(engine.state(), DetectorState::Error(_)));

    // Once the primary loads, the same strategy recovers through `initialize`.
    engine.set_primary_loader(PrimaryEstimator::load);
    engine.initialize().unwrap();
    assert_eq!(engine.state(), &DetectorState::Ready);
    assert_eq!(engine.requested_strategy(), DetectorStrategy::Primary);
    assert_eq!(engine.active_strategy(), Some(DetectorStrategy::Primary));
    assert!(engine.detect_and_notify().unwrap().is_some());
}

#[test]
fn failed_primary_can_be_swapped_for_spectral() {
    let mut engine = PitchEngine::new(config(DetectorStrategy::Primary, false), ScriptedSource::tone(440.0))
        .unwrap()
        .with_primary_loader(failing_loader);
    assert!(engine.initialize().is_err());

    engine.switch_detector(DetectorStrategy::Spectral).unwrap();
    assert_eq!(engine.state(), &DetectorState::Ready);
    assert!(engine.detect_and_notify().unwrap().is_some());
}

#[test]
fn primary_detector_reports_note() {
    let mut engine =
        PitchEngine::new(config(DetectorStrategy::Primary, true), ScriptedSource::tone(261.63)).unwrap();
    engine.initialize().unwrap();
    assert_eq!(engine.active_strategy(), Some(DetectorStrategy::Primary));

    let sample = engine.detect_and_notify().unwrap().unwrap();
    assert_eq!(sample.detector_name, "primary");
    assert_eq!(sample.note_name, "C4");
    assert!(sample.cents_off.abs() < 10.0);
    assert!((sample.rms - 0.3535).abs() < 1e-2);
    assert_eq!(engine.last_sample(), Some(&sample));
}

#[test]
fn ticks_before_initialize_are_rejected() {
    let mut engine = PitchEngine::new(EngineConfig::default(), ScriptedSource::tone(440.0)).unwrap();
    assert_eq!(engine.state(), &DetectorState::Unloaded);
    assert!(matches!(engine.detect_and_notify(), Err(EngineError::NotReady)));
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let config = EngineConfig { min_frequency: 900.0, max_frequency: 100.0, ..EngineConfig::default() };
    assert!(matches!(
        PitchEngine::new(config, EmptySource),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn missing_frames_and_silence_yield_none() {
    let mut engine = PitchEngine::new(config(DetectorStrategy::Spectral, true), EmptySource).unwrap();
    engine.initialize().unwrap();
    assert!(engine.detect_and_notify().unwrap().is_none());

    let mut engine =
        PitchEngine::new(config(DetectorStrategy::Spectral, true), ScriptedSource::new([silence()])).unwrap();
    engine.initialize().unwrap();
    assert!(engine.detect_and_notify().unwrap().is_none());
    assert!(engine.last_sample().is_none());
}

#[test]
fn sustained_silence_resets_pitch_history() {
    let mut frames: Vec<AudioFrame> = (0..5).map(|_| sine(330.0, 0.5)).collect();
    frames.extend((0..12).map(|_| silence()));
    let config = EngineConfig { silence_reset_ticks: 10, ..config(DetectorStrategy::Spectral, true) };
    let mut engine = PitchEngine::new(config, ScriptedSource::new(frames)).unwrap();
    engine.initialize().unwrap();

    for _ in 0..5 {
        assert!(engine.detect_and_notify().unwrap().is_some());
    }
    assert_eq!(engine.analyzer().history_len(), 5);

    for _ in 0..9 {
        assert!(engine.detect_and_notify().unwrap().is_none());
    }
    assert_eq!(engine.analyzer().history_len(), 5);

    engine.detect_and_notify().unwrap();
    assert_eq!(engine.analyzer().history_len(), 0);
}

#[test]
fn third_harmonic_glitch_is_corrected() {
    let mut frames: Vec<AudioFrame> = (0..4).map(|_| sine(200.0, 0.5)).collect();
    frames.push(sine(600.0, 0.5));
    let mut engine =
        PitchEngine::new(config(DetectorStrategy::Spectral, true), ScriptedSource::new(frames)).unwrap();
    engine.initialize().unwrap();

    for _ in 0..4 {
        let sample = engine.detect_and_notify().unwrap().unwrap();
        assert!((sample.frequency - 200.0).abs() < 2.0);
    }
    let glitch = engine.detect_and_notify().unwrap().unwrap();
    // 600 Hz folded down by 19 semitones.
    assert!((glitch.frequency - 200.0).abs() < 3.0, "got {}", glitch.frequency);
}

#[test]
fn switching_detectors_keeps_history() {
    let mut engine =
        PitchEngine::new(config(DetectorStrategy::Spectral, true), ScriptedSource::tone(220.0)).unwrap();
    engine.initialize().unwrap();
    for _ in 0..3 {
        engine.detect_and_notify().unwrap();
    }
    assert_eq!(engine.analyzer().history_len(), 3);

    engine.switch_detector(DetectorStrategy::Primary).unwrap();
    assert_eq!(engine.active_strategy(), Some(DetectorStrategy::Primary));
    assert_eq!(engine.analyzer().history_len(), 3);

    let sample = engine.detect_and_notify().unwrap().unwrap();
    assert_eq!(sample.detector_name, "primary");
    assert_eq!(engine.analyzer().history_len(), 4);
}

#[test]
fn gain_is_pushed_to_the_source_within_bounds() {
    let frames = [sine(440.0, 0.01), sine(440.0, 0.9), sine(440.0, 0.2)];
    let mut engine =
        PitchEngine::new(config(DetectorStrategy::Spectral, true), ScriptedSource::new(frames)).unwrap();
    engine.initialize().unwrap();
    for _ in 0..3 {
        engine.detect_and_notify().unwrap();
    }

    let gains = &engine.source().applied_gains;
    assert_eq!(gains.len(), 3);
    assert!(gains[0] > 1.0, "quiet input should raise gain");
    let cfg = engine.config();
    assert!(gains.iter().all(|g| (cfg.min_gain..=cfg.max_gain).contains(g)));
}

#[test]
fn run_streams_samples_until_shutdown() {
    let config = EngineConfig { update_interval_ms: 5, ..config(DetectorStrategy::Spectral, true) };
    let mut engine = PitchEngine::new(config, ScriptedSource::tone(440.0)).unwrap();
    engine.initialize().unwrap();

    let (sample_tx, sample_rx) = crossbeam_channel::unbounded();
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let running = engine.running_flag();

    let consumer = std::thread::spawn(move || {
        let samples: Vec<_> = sample_rx.iter().take(3).collect();
        let was_running = running.load(Ordering::SeqCst);
        shutdown_tx.send(()).unwrap();
        (samples, was_running)
    });

    engine.run(&sample_tx, &shutdown_rx).unwrap();
    let (samples, was_running) = consumer.join().unwrap();

    assert!(was_running);
    assert!(!engine.is_running());
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| (s.frequency - 440.0).abs() < 4.4));
    assert!(samples.windows(2).all(|w| w[1].timestamp_ms >= w[0].timestamp_ms));
}
