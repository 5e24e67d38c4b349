//! # Audio Capture Module
//!
//! Frames, frame sources and real-time microphone capture through CPAL.
//!
//! The engine pulls frames through the [`FrameSource`] trait, so the same
//! pipeline runs against the microphone ([`MicrophoneSource`]) or against
//! synthetic signals in tests.
//!
//! ## Features
//! - Automatic input device selection, preferring mono 32-bit float near 44.1 kHz
//! - Multi-channel input is downmixed to mono in the callback
//! - Capture gain applied in the callback from a lock-free [`GainHandle`]
//! - Bounded hand-off to the analysis thread; frames are dropped when it lags

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::error::EngineError;

/// Sample rate requested from the input device.
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// Frames queued between the capture callback and the engine.
const FRAME_QUEUE_DEPTH: usize = 4;

/// One captured block of mono samples, normalised to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Root mean square of a signal; zero for an empty slice.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Anything that can hand the engine one frame per tick.
pub trait FrameSource {
    /// Returns the most recent frame, or `None` when nothing new has arrived.
    fn next_frame(&mut self) -> Option<AudioFrame>;

    /// Receives the gain chosen by the AGC. Sources without an adjustable
    /// capture path ignore it.
    fn apply_gain(&mut self, _gain: f32) {}
}

/// Shared capture gain, written by the engine thread and read by the audio callback.
#[derive(Debug, Clone)]
pub struct GainHandle(Arc<AtomicU32>);

impl GainHandle {
    pub fn new(gain: f32) -> Self {
        Self(Arc::new(AtomicU32::new(gain.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.to_bits(), Ordering::Relaxed);
    }
}

/// Live input from the default capture device.
///
/// The CPAL stream stops when this value is dropped.
pub struct MicrophoneSource {
    stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
    gain: GainHandle,
}

impl MicrophoneSource {
    /// Opens the default input device and starts streaming frames of `frame_size` samples.
    ///
    /// Any failure here (no device, permission denied, unsupported format)
    /// is fatal for the engine and reported as [`EngineError::Capture`].
    pub fn open(frame_size: usize) -> Result<Self, EngineError> {
        let gain = GainHandle::new(1.0);
        let (sender, receiver) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let (stream, sample_rate) =
            start_audio_capture(sender, frame_size, gain.clone()).map_err(EngineError::Capture)?;
        Ok(Self { stream, receiver, sample_rate, gain })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Pauses the underlying stream. Dropping the source has the same effect.
    pub fn pause(&self) -> Result<(), EngineError> {
        self.stream
            .pause()
            .map_err(|e| EngineError::Capture(anyhow!("failed to pause stream: {e}")))
    }
}

impl FrameSource for MicrophoneSource {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        // Only the newest frame matters; stale ones are discarded.
        let latest = self.receiver.try_iter().last()?;
        Some(AudioFrame::new(latest, self.sample_rate))
    }

    fn apply_gain(&mut self, gain: f32) {
        self.gain.set(gain);
    }
}

/// Builds and starts the CPAL input stream.
///
/// Returns the stream handle (which must be kept alive) and the negotiated
/// sample rate.
fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    frame_size: usize,
    gain: GainHandle,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    log::info!("Using audio input device: {}", device.name()?);

    let configs = device
        .supported_input_configs()
        .context("failed to query input configurations")?
        .collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = TARGET_SAMPLE_RATE.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
    let channels = config.channels().max(1) as usize;
    let sample_rate = config.sample_rate().0;
    let config: cpal::StreamConfig = config.into();

    log::info!("Selected sample rate: {} Hz, {} channel(s)", sample_rate, channels);

    let err_fn = |err| log::error!("An error occurred on the audio stream: {}", err);

    let mut audio_buffer: Vec<f32> = Vec::with_capacity(frame_size * 2);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let gain = gain.get();
                audio_buffer.extend(
                    data.chunks(channels)
                        .map(|chunk| gain * chunk.iter().sum::<f32>() / chunk.len() as f32),
                );

                while audio_buffer.len() >= frame_size {
                    let frame: Vec<f32> = audio_buffer.drain(..frame_size).collect();
                    // A full queue means the engine is behind; drop the frame.
                    let _ = sender.try_send(frame);
                }
            },
            err_fn,
            None,
        )
        .context("failed to build input stream")?;

    stream.play().context("failed to start input stream")?;

    Ok((stream, sample_rate))
}

/// Picks the f32 configuration closest to `target_rate`, preferring mono.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let covers = c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
            let distance = if covers {
                0
            } else {
                let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                min_diff.min(max_diff)
            };
            (c.channels() != 1, distance)
        })
}
