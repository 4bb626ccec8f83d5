//! Spectral estimation of the dominant oscillation in a fixed-length window.
//!
//! The estimator runs a forward FFT over the window, untapered unless a
//! [`SpectralWindow::Hann`] taper is requested, and reduces the result to a power spectrum
//! `|X[k]|²` for `k = 0..=N/2`. Inside the heart rate band it then locates the strongest
//! bin, measures how much of the band's power sits within [`HALF_INTERVAL`] bins of it (the
//! SNR), and computes the power-weighted centroid of that neighbourhood. The distance between centroid and peak bin is the sub-bin bias; a large
//! bias means a smeared or ambiguous peak and penalizes the SNR.
//!
//! Bin `k` of a window lasting `D` milliseconds sits at `k * 60000 / D` beats per minute.
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Lowest heart rate searched, in beats per minute (0.7 Hz).
pub const BOTTOM_LIMIT_BPM: f64 = 42.0;
/// Highest heart rate searched, in beats per minute (4.5 Hz).
pub const TOP_LIMIT_BPM: f64 = 270.0;
/// Half width, in bins, of the neighbourhood counted as signal around the peak.
pub const HALF_INTERVAL: usize = 2;
/// SNR reported when the band holds signal power but no noise power.
pub const SNR_CEILING_DB: f64 = 60.0;
/// SNR reported when the band holds no signal power at all.
pub const SNR_FLOOR_DB: f64 = -60.0;

/// Weighting applied to the window before the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralWindow {
    /// Samples enter the transform unweighted.
    #[default]
    Rectangular,
    /// Symmetric Hann taper. Lowers leakage at the cost of a wider main lobe.
    Hann,
}

impl SpectralWindow {
    /// Per-sample weights for a window of `len` samples.
    pub fn coefficients(self, len: usize) -> Vec<f64> {
        match self {
            SpectralWindow::Hann if len > 1 => (0..len)
                .map(|i| {
                    0.5 * (1.0
                        - (2.0 * std::f64::consts::PI * i as f64 / (len - 1) as f64).cos())
                })
                .collect(),
            _ => vec![1.0; len],
        }
    }
}

/// Peak found in the heart rate band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralPeak {
    /// Integer bin of maximum power.
    pub bin: usize,
    /// Power-weighted mean bin of the peak neighbourhood.
    pub centroid: f64,
    /// `|bin - centroid|`.
    pub bias: f64,
    /// SNR in dB before the bias penalty.
    pub raw_snr: f64,
    /// SNR in dB after the bias penalty.
    pub snr: f64,
    /// First bin of the band (inclusive).
    pub bottom: usize,
    /// End of the band (exclusive).
    pub top: usize,
}

impl SpectralPeak {
    /// Converts the centroid into beats per minute for a window of `duration_ms`.
    pub fn bpm(&self, duration_ms: f64) -> f64 {
        if duration_ms > 0.0 {
            self.centroid * 60_000.0 / duration_ms
        } else {
            0.0
        }
    }
}

/// FFT-based power spectrum and peak analysis over a fixed window length.
#[derive(Clone)]
pub struct SpectralEstimator {
    window_size: usize,
    fft: Arc<dyn Fft<f64>>,
    window: SpectralWindow,
    weights: Vec<f64>,
    scratch: Vec<Complex<f64>>,
    amplitude: Vec<f64>,
}

impl std::fmt::Debug for SpectralEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralEstimator")
            .field("window_size", &self.window_size)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl SpectralEstimator {
    /// Creates an untapered estimator for windows of `window_size` samples.
    pub fn new(window_size: usize) -> Self {
        Self::with_window(window_size, SpectralWindow::Rectangular)
    }

    /// Creates an estimator that weights each window with `window` before the transform.
    ///
    /// # Arguments
    ///
    /// * `window_size` - Samples per transform. Powers of two are fastest but any length works.
    /// * `window` - Taper applied to the input.
    pub fn with_window(window_size: usize, window: SpectralWindow) -> Self {
        let window_size = window_size.max(1);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);

        Self {
            window_size,
            fft,
            window,
            weights: window.coefficients(window_size),
            scratch: vec![Complex::new(0.0, 0.0); window_size],
            amplitude: vec![0.0; window_size / 2 + 1],
        }
    }

    /// Samples per transform.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Taper applied before the transform.
    pub fn window(&self) -> SpectralWindow {
        self.window
    }

    /// Number of bins in the power spectrum (`window_size / 2 + 1`).
    pub fn spectrum_len(&self) -> usize {
        self.amplitude.len()
    }

    /// The power spectrum of the last transform.
    pub fn amplitude(&self) -> &[f64] {
        &self.amplitude
    }

    /// Weights `input`, transforms it and stores `Re² + Im²` per bin.
    ///
    /// Inputs shorter than the window are zero-padded; longer inputs are truncated.
    pub fn power_spectrum(&mut self, input: &[f64]) -> &[f64] {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let value = input.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(value * self.weights[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        for (amplitude, bin) in self.amplitude.iter_mut().zip(self.scratch.iter()) {
            *amplitude = bin.norm_sqr();
        }
        &self.amplitude
    }

    /// Heart rate band `[bottom, top)` in bins for a window lasting `duration_ms`.
    ///
    /// `top` is clamped to the spectrum length.
    pub fn band_bounds(&self, duration_ms: f64) -> (usize, usize) {
        if !(duration_ms.is_finite() && duration_ms > 0.0) {
            return (0, 0);
        }
        let seconds = duration_ms / 1000.0;
        let bottom = (BOTTOM_LIMIT_BPM / 60.0 * seconds).floor() as usize;
        let top = ((TOP_LIMIT_BPM / 60.0 * seconds).floor() as usize).min(self.spectrum_len());
        (bottom, top)
    }

    /// Finds the dominant peak of the current spectrum inside the heart rate band.
    ///
    /// Returns `None` when the band is too narrow to keep [`HALF_INTERVAL`] guard bins on
    /// both sides of a candidate peak.
    pub fn locate_peak(&self, duration_ms: f64) -> Option<SpectralPeak> {
        let (bottom, top) = self.band_bounds(duration_ms);
        let first = bottom + HALF_INTERVAL;
        let last = top.saturating_sub(HALF_INTERVAL);
        if first >= last {
            return None;
        }

        let mut bin = first;
        let mut max_power = f64::NEG_INFINITY;
        for (i, &power) in self.amplitude.iter().enumerate().take(last).skip(first) {
            if power > max_power {
                max_power = power;
                bin = i;
            }
        }

        let lower = bin - HALF_INTERVAL;
        let upper = bin + HALF_INTERVAL;
        let mut signal_power = 0.0;
        let mut noise_power = 0.0;
        for (i, &power) in self.amplitude.iter().enumerate().take(top).skip(bottom) {
            if (lower..=upper).contains(&i) {
                signal_power += power;
            } else {
                noise_power += power;
            }
        }
        let raw_snr = snr_db(signal_power, noise_power);

        let mut weighted = 0.0;
        let mut harmonic_power = 0.0;
        for i in lower..=upper {
            harmonic_power += self.amplitude[i];
            weighted += i as f64 * self.amplitude[i];
        }
        let centroid = if harmonic_power > 0.0 {
            weighted / harmonic_power
        } else {
            bin as f64
        };
        let bias = (bin as f64 - centroid).abs();
        let snr = raw_snr * bias_weight(bias);

        trace!(bin, centroid, raw_snr, snr, bottom, top, "spectral peak");

        Some(SpectralPeak {
            bin,
            centroid,
            bias,
            raw_snr,
            snr,
            bottom,
            top,
        })
    }

    /// Computes the spectrum of `input` and locates its peak in one call.
    pub fn estimate(&mut self, input: &[f64], duration_ms: f64) -> Option<SpectralPeak> {
        self.power_spectrum(input);
        self.locate_peak(duration_ms)
    }
}

/// Signal-to-noise ratio in dB with fallbacks for empty partitions.
///
/// A band without noise power reports [`SNR_CEILING_DB`]; a band without signal power
/// reports [`SNR_FLOOR_DB`]. Every other ratio is clamped into that range.
pub fn snr_db(signal_power: f64, noise_power: f64) -> f64 {
    if !(signal_power > 0.0) {
        return SNR_FLOOR_DB;
    }
    if !(noise_power > 0.0) {
        return SNR_CEILING_DB;
    }
    (10.0 * (signal_power / noise_power).log10()).clamp(SNR_FLOOR_DB, SNR_CEILING_DB)
}

/// Penalty `((H + 1 - bias) / (H + 1))⁴` applied to the SNR of a peak with sub-bin `bias`.
pub fn bias_weight(bias: f64) -> f64 {
    let span = (HALF_INTERVAL + 1) as f64;
    let weight = ((span - bias) / span).clamp(0.0, 1.0);
    weight.powi(4)
}
