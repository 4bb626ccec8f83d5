//! Core data types shared by the harmonic processor and the processor grid.
use crate::error::PpgError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One frame observation for one cell.
///
/// `red`, `green` and `blue` are channel sums over the cell's pixels and `area` is the
/// pixel count used to average them. `interval_ms` is the time elapsed since the previous
/// frame; spectral bin widths and the time-domain estimate are derived from these intervals.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Sum of the red channel over the cell.
    pub red: u64,
    /// Sum of the green channel over the cell.
    pub green: u64,
    /// Sum of the blue channel over the cell.
    pub blue: u64,
    /// Number of pixels summed.
    pub area: u64,
    /// Frame interval in milliseconds.
    pub interval_ms: f64,
}

impl Sample {
    /// Creates a sample.
    pub fn new(red: u64, green: u64, blue: u64, area: u64, interval_ms: f64) -> Self {
        Self {
            red,
            green,
            blue,
            area,
            interval_ms,
        }
    }

    /// Rejects samples that cannot be averaged.
    pub fn validate(&self) -> Result<(), PpgError> {
        if self.area == 0 {
            return Err(PpgError::InvalidSample { area: self.area });
        }
        Ok(())
    }

    /// Mean intensities `(red, green, blue) / area`.
    ///
    /// Callers must have validated the sample first.
    #[inline]
    pub fn mean_rgb(&self) -> [f64; 3] {
        let area = self.area as f64;
        [
            self.red as f64 / area,
            self.green as f64 / area,
            self.blue as f64 / area,
        ]
    }
}

/// Which color information feeds the streaming normalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChannel {
    /// Red mean only.
    Red,
    /// Green mean only.
    #[default]
    Green,
    /// Blue mean only.
    Blue,
    /// Two derived chrominance channels, each z-scored, combined by difference.
    All,
}

/// A heart rate read from the spectral peak.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HeartRateDecision {
    /// Beats per minute.
    pub bpm: f64,
    /// Penalized signal-to-noise ratio in dB.
    pub snr: f64,
    /// Whether `bpm` falls inside the configured plausibility band.
    pub plausible: bool,
}

/// Result of one frequency-domain estimate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum FrequencyOutcome {
    /// SNR cleared the acceptance threshold.
    HeartRate(HeartRateDecision),
    /// SNR did not clear the acceptance threshold.
    TooNoisy {
        /// Penalized signal-to-noise ratio in dB.
        snr: f64,
    },
}

impl FrequencyOutcome {
    /// The SNR reported to the aggregator, whatever the outcome.
    pub fn snr(&self) -> f64 {
        match self {
            FrequencyOutcome::HeartRate(decision) => decision.snr,
            FrequencyOutcome::TooNoisy { snr } => *snr,
        }
    }

    /// The decision, if the estimate was accepted.
    pub fn decision(&self) -> Option<&HeartRateDecision> {
        match self {
            FrequencyOutcome::HeartRate(decision) => Some(decision),
            FrequencyOutcome::TooNoisy { .. } => None,
        }
    }
}

/// Heart rate counted from zero crossings of the binary output track.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimeDomainEstimate {
    /// Beats per minute; zero when nothing could be counted.
    pub bpm: f64,
    /// False when the search hit its watchdog bound before enough crossings were seen.
    pub reliable: bool,
}

/// Observational output of a processor.
///
/// None of these are needed for estimation; they exist for plotting and monitoring.
/// Series snapshots are ordered oldest first.
#[derive(Clone, Debug)]
pub enum ProcessorEvent {
    /// Frame interval series.
    TimeUpdated(Arc<[f64]>),
    /// Combined and averaged signal series.
    SignalUpdated(Arc<[f64]>),
    /// Square-wave detector output series.
    BinaryOutputUpdated(Arc<[f64]>),
    /// Principal component projection used for the last estimate.
    PcaProjectionUpdated(Arc<[f64]>),
    /// Power spectrum of the last estimate.
    SpectrumUpdated(Arc<[f64]>),
    /// Values after one enrollment.
    CurrentValues {
        /// Latest signal value.
        signal: f64,
        /// Latest red mean.
        red: f64,
        /// Latest green mean.
        green: f64,
        /// Latest blue mean.
        blue: f64,
        /// Last accepted heart rate.
        heart_rate: f64,
        /// Last SNR.
        snr: f64,
    },
    /// SNR of the last estimate, reported whatever the outcome.
    SnrUpdated {
        /// Signal-to-noise ratio in dB.
        snr: f64,
    },
    /// Accepted frequency-domain estimate.
    HeartRateUpdated(HeartRateDecision),
    /// Rejected frequency-domain estimate.
    TooNoisy {
        /// Signal-to-noise ratio in dB.
        snr: f64,
    },
    /// Time-domain estimate.
    CountedHeartRate(TimeDomainEstimate),
}

/// A [`ProcessorEvent`] tagged with the cell that produced it.
#[derive(Clone, Debug)]
pub struct CellEvent {
    /// Cell id.
    pub cell: u32,
    /// The event.
    pub event: ProcessorEvent,
}
