//! # voice-probe
//!
//! Headless command-line harness for the pitch engine. Opens the default
//! microphone, runs the engine at its configured tick rate and prints every
//! voiced sample as a JSON line on stdout.
//!
//! ## Architecture
//! - **Main thread**: owns the capture stream and runs the engine loop
//! - **Printer thread**: serialises samples to stdout
//! - **Stop thread**: waits for `--duration` or end of stdin, then signals shutdown

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use voice_core::{DetectorStrategy, EngineConfig, MicrophoneSource, PitchEngine, PitchSample};

#[derive(Parser, Debug)]
#[command(name = "voice-probe", about = "Stream live voice pitch and quality metrics as JSON lines")]
struct Cli {
    /// TOML engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detector to request (primary or spectral)
    #[arg(short, long)]
    strategy: Option<DetectorStrategy>,

    /// Fail instead of falling back to the spectral detector
    #[arg(long)]
    no_fallback: bool,

    /// Tick interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many seconds (default: run until stdin closes)
    #[arg(short, long)]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let source = MicrophoneSource::open(config.buffer_size).context("could not start audio capture")?;
    let mut engine = PitchEngine::new(config, source)?;
    engine.initialize()?;

    let (sample_tx, sample_rx) = crossbeam_channel::unbounded::<PitchSample>();
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

    let printer = thread::spawn(move || -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for sample in sample_rx {
            serde_json::to_writer(&mut out, &sample)?;
            writeln!(out)?;
        }
        Ok(())
    });

    let duration = cli.duration;
    thread::spawn(move || {
        match duration {
            Some(seconds) => thread::sleep(Duration::from_secs(seconds)),
            None => {
                log::info!("Running until stdin closes (Ctrl-D to stop)");
                for _ in std::io::stdin().lock().lines() {}
            }
        }
        let _ = shutdown_tx.send(());
    });

    engine.run(&sample_tx, &shutdown_rx)?;
    drop(sample_tx);

    if let Err(e) = engine.source().pause() {
        log::warn!("{}", e);
    }
    printer
        .join()
        .map_err(|_| anyhow::anyhow!("printer thread panicked"))??;
    Ok(())
}

/// Loads the config file (if any) and applies command-line overrides.
fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(strategy) = cli.strategy {
        config.detector_strategy = strategy;
    }
    if cli.no_fallback {
        config.fallback_enabled = false;
    }
    if let Some(interval) = cli.interval_ms {
        config.update_interval_ms = interval;
    }

    config.validate()?;
    log::debug!("Engine config: {:?}", config);
    Ok(config)
}
