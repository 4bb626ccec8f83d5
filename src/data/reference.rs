//! Plausibility thresholds from a population heart rate reference table.
//!
//! The table is a TOML document with one `[[record]]` per sex and age range. Each record
//! lists resting heart rate percentiles keyed by the percentile written with one decimal:
//!
//! ```toml
//! [[record]]
//! sex = "male"
//! age_from = 18
//! age_to = 25
//! percentiles = { "1.0" = 50.0, "2.5" = 53.0, "97.5" = 97.0, "99.0" = 101.0 }
//! ```
//!
//! A [`ConfidenceBand`] picks a symmetric percentile pair; the resolved pair becomes the
//! processor's [`ReferenceThresholds`].
use crate::error::ReferenceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Population selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    /// Male records.
    Male,
    /// Female records.
    Female,
}

/// Two-sided share of the population that falls outside the plausibility band.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// 1st to 99th percentile.
    TwoPercent,
    /// 2.5th to 97.5th percentile.
    #[default]
    FivePercent,
    /// 5th to 95th percentile.
    TenPercent,
    /// 10th to 90th percentile.
    TwentyPercent,
    /// 25th to 75th percentile.
    FiftyPercent,
}

impl ConfidenceBand {
    /// Lower and upper percentile of the band.
    pub fn percentiles(self) -> (f64, f64) {
        match self {
            ConfidenceBand::TwoPercent => (1.0, 99.0),
            ConfidenceBand::FivePercent => (2.5, 97.5),
            ConfidenceBand::TenPercent => (5.0, 95.0),
            ConfidenceBand::TwentyPercent => (10.0, 90.0),
            ConfidenceBand::FiftyPercent => (25.0, 75.0),
        }
    }
}

/// Inclusive heart rate band, in bpm, inside which an estimate is considered plausible.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceThresholds {
    /// Lower bound in bpm.
    pub left: f64,
    /// Upper bound in bpm.
    pub right: f64,
}

impl ReferenceThresholds {
    /// Creates a band, rejecting empty or inverted ones.
    pub fn new(left: f64, right: f64) -> Result<Self, ReferenceError> {
        if !(left < right) {
            return Err(ReferenceError::InvertedBand { left, right });
        }
        Ok(Self { left, right })
    }

    /// True when `bpm` lies inside the band, bounds included.
    #[inline]
    pub fn contains(&self, bpm: f64) -> bool {
        bpm >= self.left && bpm <= self.right
    }
}

impl Default for ReferenceThresholds {
    fn default() -> Self {
        Self {
            left: 70.0,
            right: 80.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ReferenceRecord {
    sex: Sex,
    age_from: u32,
    age_to: u32,
    #[serde(default)]
    percentiles: BTreeMap<String, f64>,
}

impl ReferenceRecord {
    fn covers(&self, sex: Sex, age: u32) -> bool {
        self.sex == sex && (self.age_from..=self.age_to).contains(&age)
    }

    fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles.get(&format!("{p:.1}")).copied()
    }
}

/// Parsed reference table.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceTable {
    #[serde(rename = "record", default)]
    records: Vec<ReferenceRecord>,
}

impl ReferenceTable {
    /// Reads and parses a table.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReferenceError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ReferenceError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let table: ReferenceTable =
            toml::from_str(&text).map_err(|source| ReferenceError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), records = table.records.len(), "loaded reference table");
        Ok(table)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the table has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolves the band for one population.
    ///
    /// The first record covering `sex` and `age` that lists both percentiles of `band` wins.
    pub fn lookup(
        &self,
        sex: Sex,
        age: u32,
        band: ConfidenceBand,
    ) -> Result<ReferenceThresholds, ReferenceError> {
        let (lower, upper) = band.percentiles();
        let (left, right) = self
            .records
            .iter()
            .filter(|record| record.covers(sex, age))
            .find_map(|record| Some((record.percentile(lower)?, record.percentile(upper)?)))
            .ok_or(ReferenceError::NoMatchingRecord { sex, age, band })?;
        ReferenceThresholds::new(left, right)
    }
}
