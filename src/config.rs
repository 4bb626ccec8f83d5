//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/ppg.toml` (or any file passed to [`PpgConfig::load_from`])
//! 2. Environment variables prefixed with `RUST_PPG_`, nested with `__`
//!
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use rust_ppg::config::PpgConfig;
//!
//! let config = PpgConfig::load()?;
//! config.validate()?;
//! println!("{} cells", config.grid.cells());
//! # Ok::<(), rust_ppg::error::PpgError>(())
//! ```
//!
//! `RUST_PPG_PROCESSOR__BUFFER_LENGTH=128` overrides `processor.buffer_length`.

use crate::data::processor::ProcessorConfig;
use crate::data::reference::{ConfidenceBand, ReferenceTable, ReferenceThresholds, Sex};
use crate::error::{AppResult, PpgError};
use crate::grid::GridConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/ppg.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpgConfig {
    /// Application settings.
    pub application: ApplicationConfig,
    /// Per-cell processing parameters.
    pub processor: ProcessorConfig,
    /// Grid dimensions.
    pub grid: GridConfig,
    /// Optional population used to derive the plausibility band.
    pub reference: Option<ReferenceSelection>,
}

/// Application-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust-ppg".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Reference table and population used for the plausibility band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSelection {
    /// Path to the reference table.
    pub table: PathBuf,
    /// Population sex.
    pub sex: Sex,
    /// Age in years.
    pub age: u32,
    /// Confidence band.
    #[serde(default)]
    pub confidence: ConfidenceBand,
}

impl PpgConfig {
    /// Load configuration from `config/ppg.toml` and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path plus environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_PPG_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(PpgError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.processor.validate()?;
        self.grid.validate()?;
        Ok(())
    }

    /// Resolves the plausibility band from the configured reference table.
    ///
    /// Without a reference selection the band from `processor.thresholds` is returned.
    pub fn resolve_thresholds(&self) -> AppResult<ReferenceThresholds> {
        match &self.reference {
            None => Ok(self.processor.thresholds),
            Some(selection) => {
                let table = ReferenceTable::load(&selection.table)?;
                Ok(table.lookup(selection.sex, selection.age, selection.confidence)?)
            }
        }
    }
}
