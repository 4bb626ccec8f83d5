//! CLI entry point for rust-ppg.
//!
//! Drives the estimator with synthetic frames:
//! - `run` builds a processor grid from configuration and prints one JSON heat map per sweep
//! - `single` feeds one processor and prints its frequency- and time-domain estimates
//!
//! # Usage
//!
//! ```bash
//! rust-ppg run --config config/ppg.toml --frames 600 --bpm 72 --compute-every 64
//! rust-ppg single --bpm 90 --samples 512
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_ppg::config::PpgConfig;
use rust_ppg::core::{FrequencyOutcome, TimeDomainEstimate};
use rust_ppg::logging::{self, OutputFormat, TracingConfig};
use rust_ppg::synthetic::SyntheticPulse;
use rust_ppg::{HarmonicProcessor, ProcessorGrid};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust-ppg")]
#[command(about = "Heart rate estimation over a grid of harmonic processors", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full grid on synthetic frames and print heat maps as JSON lines
    Run {
        /// Configuration file (defaults to config/ppg.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Frames to generate; every frame carries one sample per cell
        #[arg(long, default_value_t = 600)]
        frames: usize,

        /// Pulse rate of the synthetic source
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,

        /// Uniform noise half width added to green
        #[arg(long, default_value_t = 2.0)]
        noise: f64,

        /// Frames between sweeps
        #[arg(long, default_value_t = 64)]
        compute_every: usize,
    },

    /// Run one processor and print its estimates
    Single {
        /// Configuration file (defaults to config/ppg.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Samples to enroll
        #[arg(long, default_value_t = 512)]
        samples: usize,

        /// Pulse rate of the synthetic source
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,

        /// Uniform noise half width added to green
        #[arg(long, default_value_t = 0.0)]
        noise: f64,
    },
}

fn load_config(path: Option<PathBuf>, format: OutputFormat) -> Result<PpgConfig> {
    let mut config = match path {
        Some(path) => PpgConfig::load_from(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PpgConfig::load()?,
    };
    config.validate()?;

    let tracing_config = TracingConfig::from_config(&config)?.with_format(format);
    logging::init(tracing_config)?;

    match config.resolve_thresholds() {
        Ok(thresholds) => config.processor.thresholds = thresholds,
        Err(err) => warn!(%err, "reference lookup failed, keeping configured thresholds"),
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            frames,
            bpm,
            noise,
            compute_every,
        } => {
            let config = load_config(config, cli.log_format)?;
            run_grid(&config, frames, bpm, noise, compute_every.max(1)).await
        }
        Commands::Single {
            config,
            samples,
            bpm,
            noise,
        } => {
            let config = load_config(config, cli.log_format)?;
            run_single(&config, samples, bpm, noise)
        }
    }
}

async fn run_grid(
    config: &PpgConfig,
    frames: usize,
    bpm: f64,
    noise: f64,
    compute_every: usize,
) -> Result<()> {
    let mut grid = ProcessorGrid::new(config.grid, &config.processor)?;
    let mut maps = grid.subscribe_maps();

    let mut sources: Vec<SyntheticPulse> = (0..config.grid.cells() as u64)
        .map(|cell| {
            SyntheticPulse::new(bpm)
                .with_noise(noise)
                .with_seed(cell)
        })
        .collect();

    info!(frames, bpm, compute_every, "feeding synthetic frames");
    for frame in 1..=frames {
        for source in &mut sources {
            grid.dispatch(source.next_sample())?;
        }
        if frame % compute_every == 0 {
            grid.broadcast_compute()?;
            let map = tokio::time::timeout(Duration::from_secs(10), maps.recv())
                .await
                .context("timed out waiting for a heat map")??;
            println!("{}", serde_json::to_string(&map)?);
        }
    }

    grid.shutdown();
    Ok(())
}

#[derive(Serialize)]
struct SingleReport {
    samples: usize,
    frequency: FrequencyOutcome,
    count: TimeDomainEstimate,
}

fn run_single(config: &PpgConfig, samples: usize, bpm: f64, noise: f64) -> Result<()> {
    let mut processor = HarmonicProcessor::new(0, config.processor.clone())?;
    for sample in SyntheticPulse::new(bpm).with_noise(noise).take(samples) {
        processor.enroll(&sample)?;
    }

    let report = SingleReport {
        samples,
        frequency: processor.compute_frequency(),
        count: processor.count_frequency(),
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
