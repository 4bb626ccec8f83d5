//! Custom error types for the crate.
//!
//! This module defines the primary error type, `PpgError`, used across the processor,
//! the grid and the configuration layer. Using the `thiserror` crate, it provides a
//! centralized way to report the failures a caller can act on.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in the configuration sources.
//! - **`Configuration`**: Semantic errors that pass parsing but are logically wrong, such as
//!   a buffer longer than the data window or an empty grid.
//! - **`InvalidSample`**: A frame observation that cannot be averaged (zero pixel area).
//! - **`Reference`**: Failures while resolving the plausibility band from a reference table.
//! - **`LaneSpawn`** / **`LaneClosed`**: The worker lanes of a grid could not be started, or
//!   have already been stopped.
//!
//! Numeric degeneracies inside the estimator (flat spectra, zero variance, equal map bounds)
//! are not errors; they are corrected in place and documented where they occur.

use crate::data::reference::{ConfidenceBand, Sex};
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, PpgError>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum PpgError {
    /// Configuration sources could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration was parsed but is not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A sample with zero pixel area was offered for enrollment.
    #[error("Invalid sample: pixel area must be non-zero (got {area})")]
    InvalidSample {
        /// The rejected area.
        area: u64,
    },

    /// Reference threshold lookup failed.
    #[error("Reference table error: {0}")]
    Reference(#[from] ReferenceError),

    /// A worker lane thread could not be spawned.
    #[error("Failed to spawn worker lane: {0}")]
    LaneSpawn(#[source] std::io::Error),

    /// A worker lane no longer accepts commands.
    #[error("Worker lane {0} is closed")]
    LaneClosed(usize),
}

impl From<figment::Error> for PpgError {
    fn from(value: figment::Error) -> Self {
        PpgError::Config(Box::new(value))
    }
}

/// Failures while resolving plausibility thresholds from a reference table.
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// The table file does not exist.
    #[error("reference table not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The table file exists but could not be read.
    #[error("reference table {} could not be read: {source}", path.display())]
    Unreadable {
        /// Table location.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The table file is not a valid reference document.
    #[error("reference table {} is malformed: {source}", path.display())]
    Malformed {
        /// Table location.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: toml::de::Error,
    },

    /// No record covers the requested population.
    #[error("no reference record for {sex:?}, age {age}, band {band:?}")]
    NoMatchingRecord {
        /// Requested sex.
        sex: Sex,
        /// Requested age in years.
        age: u32,
        /// Requested confidence band.
        band: ConfidenceBand,
    },

    /// The resolved band is empty or inverted.
    #[error("reference band is inverted: left {left} >= right {right}")]
    InvertedBand {
        /// Lower bound in bpm.
        left: f64,
        /// Upper bound in bpm.
        right: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sample_message() {
        let err = PpgError::InvalidSample { area: 0 };
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn test_reference_error_converts() {
        let err: PpgError = ReferenceError::NotFound(PathBuf::from("missing.toml")).into();
        assert!(matches!(err, PpgError::Reference(ReferenceError::NotFound(_))));
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_io_failure_keeps_its_context() {
        use crate::data::reference::ReferenceTable;
        use std::error::Error as _;

        let dir = tempfile::tempdir().unwrap();
        let err: PpgError = ReferenceTable::load(dir.path()).unwrap_err().into();
        match &err {
            PpgError::Reference(ReferenceError::Unreadable { path, source }) => {
                assert_eq!(path, dir.path());
                assert!(source.kind() != std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let reference = err.source().expect("reference error is the source");
        assert!(reference.source().is_some());
    }
}
