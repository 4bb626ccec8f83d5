//! Channel selection, streaming normalization and principal component projection.
//!
//! Two independent paths turn raw color means into a 1-D signal:
//!
//! - [`ChannelProjector`] runs on every sample. It either passes one channel through or,
//!   in [`ColorChannel::All`] mode, derives the chrominance pair `r - g` and `r + g - 2b`.
//!   Each derived channel is z-scored against the statistics of the retained window and
//!   the combined value is `z(ch1) - z(ch2)`.
//! - [`PcaProjector`] only accumulates `(r, g, b)` triples per sample. When asked, it finds
//!   the axis of maximum variance over its workspace and projects every triple onto it.
//!   Triples are recorded regardless of channel mode so PCA can be toggled without losing
//!   history.
use crate::core::ColorChannel;
use crate::data::ring_buffer::RingBuffer;
use nalgebra::{Matrix3, SymmetricEigen, Vector3};

/// Iteration bound for the eigen decomposition of the 3×3 covariance.
const EIGEN_MAX_ITERATIONS: usize = 100;

/// Variances at or below this are treated as a flat window.
const MIN_VARIANCE: f64 = 1e-12;

/// Running mean and variance of the samples retained in a fixed window.
///
/// While the window fills, updates are plain Welford steps over the samples seen so far.
/// Once full, each update removes the overwritten sample and adds the new one. The exact
/// statistics are recomputed from the window once per wrap to stop rounding drift.
#[derive(Debug, Clone)]
pub struct WindowStats {
    values: RingBuffer<f64>,
    count: usize,
    mean: f64,
    m2: f64,
}

impl WindowStats {
    /// Statistics over the last `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            values: RingBuffer::filled(capacity, 0.0),
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Records `x` at logical index `tick` and returns its z-score against the updated window.
    ///
    /// The z-score is 0 while fewer than two samples are retained or the window is flat.
    pub fn push(&mut self, tick: isize, x: f64) -> f64 {
        let capacity = self.values.len();
        if self.count < capacity {
            self.count += 1;
            let delta = x - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (x - self.mean);
            self.values.set(tick, x);
        } else {
            let old = self.values.get(tick);
            let new_mean = self.mean + (x - old) / capacity as f64;
            self.m2 += (x - old) * (x - new_mean + old - self.mean);
            self.mean = new_mean;
            self.values.set(tick, x);
            if self.values.series().resolve(tick + 1) == 0 {
                self.resync();
            }
        }
        self.m2 = self.m2.max(0.0);

        let std_dev = self.std_dev();
        if std_dev > MIN_VARIANCE.sqrt() {
            (x - self.mean) / std_dev
        } else {
            0.0
        }
    }

    /// Mean of the retained samples.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation (`N - 1`) of the retained samples.
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    /// Number of retained samples, at most the window capacity.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Forgets every retained sample.
    pub fn reset(&mut self) {
        self.values.fill(0.0);
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }

    fn resync(&mut self) {
        let n = self.values.len() as f64;
        self.mean = self.values.iter().sum::<f64>() / n;
        self.m2 = self
            .values
            .iter()
            .map(|v| (v - self.mean) * (v - self.mean))
            .sum();
    }
}

/// Turns one color observation into the normalized input sample.
#[derive(Debug, Clone)]
pub struct ChannelProjector {
    mode: ColorChannel,
    first: WindowStats,
    second: WindowStats,
}

impl ChannelProjector {
    /// Creates a projector whose statistics span `window` samples.
    pub fn new(mode: ColorChannel, window: usize) -> Self {
        Self {
            mode,
            first: WindowStats::new(window),
            second: WindowStats::new(window),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> ColorChannel {
        self.mode
    }

    /// Switches mode. Statistics restart because the retained values belong to the old mode.
    pub fn set_mode(&mut self, mode: ColorChannel) {
        if mode != self.mode {
            self.mode = mode;
            self.first.reset();
            self.second.reset();
        }
    }

    /// Statistics of the first (or only) channel.
    pub fn primary_stats(&self) -> &WindowStats {
        &self.first
    }

    /// Statistics of the second chrominance channel (unused outside `All` mode).
    pub fn secondary_stats(&self) -> &WindowStats {
        &self.second
    }

    /// Normalized input sample for mean intensities `rgb` at logical index `tick`.
    pub fn project(&mut self, tick: isize, rgb: [f64; 3]) -> f64 {
        let [red, green, blue] = rgb;
        match self.mode {
            ColorChannel::Red => self.first.push(tick, red),
            ColorChannel::Green => self.first.push(tick, green),
            ColorChannel::Blue => self.first.push(tick, blue),
            ColorChannel::All => {
                let z1 = self.first.push(tick, red - green);
                let z2 = self.second.push(tick, red + green - 2.0 * blue);
                z1 - z2
            }
        }
    }
}

/// Outcome of a principal component update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcaStatus {
    /// A fresh projection was computed.
    Updated,
    /// The eigen solver did not converge; the previous projection was kept.
    NotConverged,
    /// The workspace has no variance; the previous projection was kept.
    Degenerate,
}

/// Principal component projection of the raw `(r, g, b)` workspace.
#[derive(Debug, Clone)]
pub struct PcaProjector {
    workspace: RingBuffer<[f64; 3]>,
    variances: [f64; 3],
    basis: Matrix3<f64>,
    projection: Vec<f64>,
}

impl PcaProjector {
    /// Creates a workspace of `buffer_length` triples.
    pub fn new(buffer_length: usize) -> Self {
        let workspace = RingBuffer::filled(buffer_length, [0.0; 3]);
        let len = workspace.len();
        Self {
            workspace,
            variances: [0.0; 3],
            basis: Matrix3::identity(),
            projection: vec![0.0; len],
        }
    }

    /// Stores the triple observed at logical index `tick`.
    #[inline]
    pub fn record(&mut self, tick: isize, rgb: [f64; 3]) {
        self.workspace.set(tick, rgb);
    }

    /// Last projection, oldest sample first.
    pub fn projection(&self) -> &[f64] {
        &self.projection
    }

    /// Variances along the principal axes, largest first.
    pub fn variances(&self) -> [f64; 3] {
        self.variances
    }

    /// Principal axes as columns, ordered like [`variances`](Self::variances).
    pub fn basis(&self) -> &Matrix3<f64> {
        &self.basis
    }

    /// Recomputes the basis over the workspace and projects the triples written before
    /// logical index `end` onto the first axis, scaled to unit variance.
    pub fn update(&mut self, end: isize) -> PcaStatus {
        let n = self.workspace.len();
        if n < 2 {
            return PcaStatus::Degenerate;
        }

        let mut mean = Vector3::zeros();
        for row in self.workspace.iter() {
            mean += Vector3::from(*row);
        }
        mean /= n as f64;

        let mut covariance = Matrix3::zeros();
        for row in self.workspace.iter() {
            let centered = Vector3::from(*row) - mean;
            covariance += centered * centered.transpose();
        }
        covariance /= (n - 1) as f64;

        let Some(eigen) = SymmetricEigen::try_new(covariance, f64::EPSILON, EIGEN_MAX_ITERATIONS)
        else {
            return PcaStatus::NotConverged;
        };

        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let leading = eigen.eigenvalues[order[0]];
        if !(leading > MIN_VARIANCE) {
            return PcaStatus::Degenerate;
        }

        for (dst, &src) in order.iter().enumerate() {
            self.variances[dst] = eigen.eigenvalues[src];
            self.basis.set_column(dst, &eigen.eigenvectors.column(src));
        }

        let axis = self.basis.column(0).into_owned();
        let scale = leading.sqrt();
        for (slot, row) in self
            .projection
            .iter_mut()
            .zip(self.workspace.window(end, n))
        {
            *slot = (Vector3::from(row) - mean).dot(&axis) / scale;
        }
        PcaStatus::Updated
    }
}
