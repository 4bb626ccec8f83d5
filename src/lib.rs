//! # Rust PPG Core Library
//!
//! Streaming heart rate estimation from per-region color measurements, as produced by
//! camera-based photoplethysmography. Each spatial cell of a frame gets its own
//! [`HarmonicProcessor`](data::processor::HarmonicProcessor); a
//! [`ProcessorGrid`](grid::ProcessorGrid) runs the cells on a fixed pool of worker lanes and
//! folds their per-sweep SNR into a normalized heat map.
//!
//! ## Crate Structure
//!
//! - **`core`**: Samples, channel modes, estimate outcomes and observational events.
//! - **`data`**: The single-cell pipeline: ring storage, channel projection and PCA,
//!   spectral estimation, reference thresholds and the processor itself.
//! - **`grid`**: Lane pool, round-robin dispatch and the sweep aggregator.
//! - **`config`**: Figment-based configuration with environment overrides.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: The crate-wide `PpgError` enum.
//! - **`synthetic`**: Seeded pulse source for demos, tests and benchmarks.

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod grid;
pub mod logging;
pub mod synthetic;

pub use crate::core::{ColorChannel, FrequencyOutcome, Sample};
pub use crate::data::processor::{HarmonicProcessor, ProcessorConfig};
pub use crate::error::{AppResult, PpgError};
pub use crate::grid::{GridConfig, HeatMap, ProcessorGrid};
