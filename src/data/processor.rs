//! Single-cell harmonic processor.
//!
//! A [`HarmonicProcessor`] turns a stream of per-frame color sums into a heart rate. Every
//! call to [`enroll`](HarmonicProcessor::enroll) pushes one sample through a fixed pipeline:
//!
//! ```text
//! Sample ─► mean RGB ─┬─► PCA workspace (B × 3)
//!                     └─► ChannelProjector ─► input (F) ─┬─► signal (D, 2-point average)
//!                                                        └─► boxcar mean ─► derivative (2)
//!                                                                           └─► binary (D)
//! ```
//!
//! `D` is the data length, `B` the spectral buffer length and `F` the smoothing filter
//! length. All rings resolve their slot from one monotonically increasing sample counter,
//! so rings of different lengths stay aligned across wrap-around.
//!
//! Estimates are produced on demand. [`compute_frequency`](HarmonicProcessor::compute_frequency)
//! runs the spectral estimator over the last `B` samples; [`count_frequency`](HarmonicProcessor::count_frequency)
//! counts zero crossings of the binary track without an FFT.
//!
//! Observational output goes to a `tokio::sync::broadcast` channel and is only assembled
//! while someone is subscribed.
use crate::core::{
    CellEvent, ColorChannel, FrequencyOutcome, HeartRateDecision, ProcessorEvent, Sample,
    TimeDomainEstimate,
};
use crate::data::fft::{SpectralEstimator, SpectralWindow, HALF_INTERVAL, SNR_FLOOR_DB};
use crate::data::projector::{ChannelProjector, PcaProjector, PcaStatus};
use crate::data::reference::ReferenceThresholds;
use crate::data::ring_buffer::RingBuffer;
use crate::error::{AppResult, PpgError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// SNR, in dB, an estimate must exceed to be reported as a heart rate.
pub const SNR_THRESHOLD_DB: f64 = 2.0;

/// Frame interval assumed for slots that have not been written yet.
pub const NEUTRAL_INTERVAL_MS: f64 = 35.0;

/// Capacity of a standalone processor's event channel.
pub const EVENT_CAPACITY: usize = 1024;

/// Per-cell processing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Samples retained per series.
    pub data_length: usize,
    /// Samples fed to the spectral estimator.
    pub buffer_length: usize,
    /// Length of the boxcar smoothing filter.
    pub filter_length: usize,
    /// Channel selection for the normalized input.
    pub channel: ColorChannel,
    /// Estimate from the principal component projection instead of the signal ring.
    pub pca: bool,
    /// Zero crossings counted by the time-domain estimate.
    pub pulse_count: usize,
    /// Plausibility band for accepted estimates.
    pub thresholds: ReferenceThresholds,
    /// Taper applied before the FFT.
    pub window: SpectralWindow,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            data_length: 256,
            buffer_length: 256,
            filter_length: 5,
            channel: ColorChannel::Green,
            pca: false,
            pulse_count: 4,
            thresholds: ReferenceThresholds::default(),
            window: SpectralWindow::Rectangular,
        }
    }
}

impl ProcessorConfig {
    /// Checks the relations between lengths and the threshold band.
    pub fn validate(&self) -> AppResult<()> {
        if self.data_length < 2 {
            return Err(PpgError::Configuration(format!(
                "data_length must be at least 2 (got {})",
                self.data_length
            )));
        }
        if self.filter_length < 2 || self.filter_length > self.data_length {
            return Err(PpgError::Configuration(format!(
                "filter_length must be in 2..={} (got {})",
                self.data_length, self.filter_length
            )));
        }
        let min_buffer = 4 * HALF_INTERVAL + 2;
        if self.buffer_length < min_buffer || self.buffer_length > self.data_length {
            return Err(PpgError::Configuration(format!(
                "buffer_length must be in {}..={} (got {})",
                min_buffer, self.data_length, self.buffer_length
            )));
        }
        if self.pulse_count < 2 {
            return Err(PpgError::Configuration(format!(
                "pulse_count must be at least 2 (got {})",
                self.pulse_count
            )));
        }
        if !(self.thresholds.left < self.thresholds.right) {
            return Err(PpgError::Configuration(format!(
                "thresholds must satisfy left < right (got {} and {})",
                self.thresholds.left, self.thresholds.right
            )));
        }
        Ok(())
    }
}

/// Streaming heart rate estimator for one cell.
#[derive(Debug)]
pub struct HarmonicProcessor {
    id: u32,
    config: ProcessorConfig,
    tick: isize,

    projector: ChannelProjector,
    pca: PcaProjector,
    estimator: SpectralEstimator,

    input: RingBuffer<f64>,
    smoothed: RingBuffer<f64>,
    derivative: RingBuffer<f64>,
    signal: RingBuffer<f64>,
    time: RingBuffer<f64>,
    binary: RingBuffer<f64>,
    fft_input: Vec<f64>,

    parity: u8,
    output_sign: f64,
    heart_rate: f64,
    snr: f64,

    events: broadcast::Sender<CellEvent>,
}

impl HarmonicProcessor {
    /// Creates a processor for cell `id` with its own event channel.
    pub fn new(id: u32, config: ProcessorConfig) -> AppResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let data_length = config.data_length;
        let buffer_length = config.buffer_length;
        let filter_length = config.filter_length;

        Ok(Self {
            id,
            tick: 0,
            projector: ChannelProjector::new(config.channel, data_length),
            pca: PcaProjector::new(buffer_length),
            estimator: SpectralEstimator::with_window(buffer_length, config.window),
            input: RingBuffer::filled(filter_length, 0.0),
            smoothed: RingBuffer::filled(filter_length, 0.0),
            derivative: RingBuffer::filled(2, 0.0),
            signal: RingBuffer::filled(data_length, 0.0),
            time: RingBuffer::filled(data_length, NEUTRAL_INTERVAL_MS),
            binary: RingBuffer::filled(data_length, 1.0),
            fft_input: vec![0.0; buffer_length],
            parity: 0,
            output_sign: 1.0,
            heart_rate: 0.0,
            snr: 0.0,
            events,
            config,
        })
    }

    /// Publishes events on `sender` instead of the processor's own channel.
    pub fn with_event_sender(mut self, sender: broadcast::Sender<CellEvent>) -> Self {
        self.events = sender;
        self
    }

    /// Subscribes to this processor's events.
    pub fn subscribe(&self) -> broadcast::Receiver<CellEvent> {
        self.events.subscribe()
    }

    /// Cell id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Active configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Samples enrolled since construction.
    pub fn samples_enrolled(&self) -> u64 {
        self.tick as u64
    }

    /// Last accepted heart rate in bpm (0 before the first).
    pub fn heart_rate(&self) -> f64 {
        self.heart_rate
    }

    /// SNR of the last frequency-domain estimate in dB.
    pub fn snr(&self) -> f64 {
        self.snr
    }

    /// Running mean of the primary normalization channel.
    pub fn channel_mean(&self) -> f64 {
        self.projector.primary_stats().mean()
    }

    /// Samples currently contributing to the normalization statistics.
    pub fn retained_len(&self) -> usize {
        self.projector.primary_stats().count()
    }

    /// Combined signal series, oldest first.
    pub fn signal(&self) -> Vec<f64> {
        self.signal.window(self.tick, self.config.data_length)
    }

    /// Binary output series, oldest first.
    pub fn binary_output(&self) -> Vec<f64> {
        self.binary.window(self.tick, self.config.data_length)
    }

    /// Power spectrum of the last frequency-domain estimate.
    pub fn spectrum(&self) -> &[f64] {
        self.estimator.amplitude()
    }

    /// Selects the channel feeding normalization. Switching restarts the statistics.
    pub fn set_channel_mode(&mut self, channel: ColorChannel) {
        self.projector.set_mode(channel);
        self.config.channel = channel;
    }

    /// Enables or disables the principal component path for frequency estimation.
    pub fn set_pca_enabled(&mut self, enabled: bool) {
        self.config.pca = enabled;
    }

    /// Replaces the plausibility band.
    pub fn set_reference_thresholds(&mut self, thresholds: ReferenceThresholds) {
        self.config.thresholds = thresholds;
    }

    fn publishing(&self) -> bool {
        self.events.receiver_count() > 0
    }

    fn publish(&self, event: ProcessorEvent) {
        // No receivers is not an error here.
        let _ = self.events.send(CellEvent {
            cell: self.id,
            event,
        });
    }

    fn snapshot(ring: &RingBuffer<f64>, end: isize) -> Arc<[f64]> {
        ring.window(end, ring.len()).into()
    }

    /// Pushes one frame observation through the pipeline.
    ///
    /// A zero-area sample is rejected and leaves the processor untouched.
    pub fn enroll(&mut self, sample: &Sample) -> AppResult<()> {
        sample.validate()?;
        let tick = self.tick;
        let rgb = sample.mean_rgb();

        self.pca.record(tick, rgb);

        let value = self.projector.project(tick, rgb);
        self.input.set(tick, value);

        self.time.set(tick, sample.interval_ms);
        let signal = (value + self.signal.get(tick - 1)) / 2.0;
        self.signal.set(tick, signal);

        let filter_length = self.config.filter_length;
        let smoothed = self.input.iter().sum::<f64>() / filter_length as f64;
        self.smoothed.set(tick, smoothed);
        let previous = self.smoothed.get(tick - (filter_length as isize - 1));
        self.derivative.set(tick, smoothed - previous);

        if self.derivative.get(0) * self.derivative.get(1) < 0.0 {
            self.parity = (self.parity + 1) % 2;
            if self.parity == 0 {
                self.output_sign = -self.output_sign;
            }
        }
        self.binary.set(tick, self.output_sign);

        self.tick += 1;
        trace!(cell = self.id, tick, value, signal, "enrolled sample");

        if self.publishing() {
            let end = self.tick;
            self.publish(ProcessorEvent::TimeUpdated(Self::snapshot(&self.time, end)));
            self.publish(ProcessorEvent::SignalUpdated(Self::snapshot(&self.signal, end)));
            self.publish(ProcessorEvent::BinaryOutputUpdated(Self::snapshot(
                &self.binary,
                end,
            )));
            let [red, green, blue] = rgb;
            self.publish(ProcessorEvent::CurrentValues {
                signal,
                red,
                green,
                blue,
                heart_rate: self.heart_rate,
                snr: self.snr,
            });
        }
        Ok(())
    }

    /// Frequency-domain estimate over the last `buffer_length` samples.
    pub fn compute_frequency(&mut self) -> FrequencyOutcome {
        let buffer_length = self.config.buffer_length;
        let start = self.tick - buffer_length as isize;
        let duration: f64 = (0..buffer_length as isize)
            .map(|i| self.time.get(start + i))
            .sum();

        if self.config.pca {
            match self.pca.update(self.tick) {
                PcaStatus::Updated => {}
                status => warn!(
                    cell = self.id,
                    ?status,
                    "principal component update failed, reusing previous projection"
                ),
            }
            self.fft_input.copy_from_slice(self.pca.projection());
            if self.publishing() {
                self.publish(ProcessorEvent::PcaProjectionUpdated(
                    self.pca.projection().into(),
                ));
            }
        } else {
            for (i, slot) in self.fft_input.iter_mut().enumerate() {
                *slot = self.signal.get(start + i as isize);
            }
        }

        self.estimator.power_spectrum(&self.fft_input);
        if self.publishing() {
            self.publish(ProcessorEvent::SpectrumUpdated(
                self.estimator.amplitude().into(),
            ));
        }

        let outcome = match self.estimator.locate_peak(duration) {
            None => {
                warn!(
                    cell = self.id,
                    duration_ms = duration,
                    "heart rate band too narrow for the buffer duration"
                );
                FrequencyOutcome::TooNoisy { snr: SNR_FLOOR_DB }
            }
            Some(peak) if peak.snr > SNR_THRESHOLD_DB => {
                let bpm = peak.bpm(duration);
                self.heart_rate = bpm;
                FrequencyOutcome::HeartRate(HeartRateDecision {
                    bpm,
                    snr: peak.snr,
                    plausible: self.config.thresholds.contains(bpm),
                })
            }
            Some(peak) => FrequencyOutcome::TooNoisy { snr: peak.snr },
        };
        self.snr = outcome.snr();
        debug!(cell = self.id, duration_ms = duration, ?outcome, "frequency estimate");

        if self.publishing() {
            self.publish(ProcessorEvent::SnrUpdated { snr: self.snr });
            self.publish(match outcome {
                FrequencyOutcome::HeartRate(decision) => ProcessorEvent::HeartRateUpdated(decision),
                FrequencyOutcome::TooNoisy { snr } => ProcessorEvent::TooNoisy { snr },
            });
        }
        outcome
    }

    /// Time-domain estimate from zero crossings of the binary output.
    ///
    /// The walk starts one sample back, skips to the most recent crossing and then counts
    /// `pulse_count` crossings while summing frame intervals. Both phases share one bound
    /// of `data_length` steps; exhausting it yields an unreliable estimate of 0 bpm.
    pub fn count_frequency(&mut self) -> TimeDomainEstimate {
        let limit = self.config.data_length;
        let pulse_count = self.config.pulse_count;
        let crossing = |binary: &RingBuffer<f64>, at: isize| binary.get(at) * binary.get(at - 1);

        let mut position = self.tick - 1;
        let mut steps = 0;
        while crossing(&self.binary, position) > 0.0 && steps < limit {
            position -= 1;
            steps += 1;
        }

        let mut remaining = pulse_count;
        let mut elapsed = 0.0;
        while remaining > 0 && steps < limit {
            if crossing(&self.binary, position) < 0.0 {
                remaining -= 1;
            }
            position -= 1;
            steps += 1;
            elapsed += self.time.get(position);
        }

        let span_ms = elapsed - self.time.get(position);
        let estimate = if remaining == 0 && span_ms > 0.0 {
            let bpm = 60.0 * (pulse_count - 1) as f64 / (span_ms / 1000.0);
            self.heart_rate = bpm;
            TimeDomainEstimate {
                bpm,
                reliable: true,
            }
        } else {
            debug!(
                cell = self.id,
                remaining, span_ms, "zero crossing search exhausted"
            );
            TimeDomainEstimate {
                bpm: 0.0,
                reliable: false,
            }
        };

        if self.publishing() {
            self.publish(ProcessorEvent::CountedHeartRate(estimate));
        }
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn small_config() -> ProcessorConfig {
        ProcessorConfig {
            data_length: 32,
            buffer_length: 32,
            ..ProcessorConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ProcessorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_lengths() {
        let cases = [
            ProcessorConfig {
                data_length: 1,
                ..ProcessorConfig::default()
            },
            ProcessorConfig {
                filter_length: 1,
                ..ProcessorConfig::default()
            },
            ProcessorConfig {
                buffer_length: 512,
                ..ProcessorConfig::default()
            },
            ProcessorConfig {
                buffer_length: 8,
                ..ProcessorConfig::default()
            },
            ProcessorConfig {
                pulse_count: 1,
                ..ProcessorConfig::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(PpgError::Configuration(_))),
                "{config:?}"
            );
        }
    }

    #[test]
    fn test_zero_area_leaves_state_untouched() {
        let mut processor = HarmonicProcessor::new(0, small_config()).unwrap();
        processor
            .enroll(&Sample::new(500, 1000, 500, 10, 33.3))
            .unwrap();
        let before = processor.signal();

        let err = processor.enroll(&Sample::new(1, 1, 1, 0, 33.3));
        assert!(matches!(err, Err(PpgError::InvalidSample { area: 0 })));
        assert_eq!(processor.samples_enrolled(), 1);
        assert_eq!(processor.signal(), before);
    }

    #[test]
    fn test_binary_track_starts_positive() {
        let processor = HarmonicProcessor::new(0, small_config()).unwrap();
        assert!(processor.binary_output().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_constant_input_never_flips_output() {
        let mut processor = HarmonicProcessor::new(0, small_config()).unwrap();
        for _ in 0..100 {
            processor
                .enroll(&Sample::new(500, 1000, 500, 10, 33.3))
                .unwrap();
        }
        assert!(processor.binary_output().iter().all(|&v| v == 1.0));
        let estimate = processor.count_frequency();
        assert!(!estimate.reliable);
        assert_eq!(estimate.bpm, 0.0);
    }

    #[test]
    fn test_signal_is_two_point_average() {
        let mut processor = HarmonicProcessor::new(0, small_config()).unwrap();
        for i in 0..10u64 {
            processor
                .enroll(&Sample::new(500, 1000 + 10 * (i % 3), 500, 10, 33.3))
                .unwrap();
        }
        let signal = processor.signal();
        let n = signal.len();
        let input = processor.input.get(processor.tick - 1);
        assert!((signal[n - 1] - (input + signal[n - 2]) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_setter_applies_to_next_estimate() {
        let mut processor = HarmonicProcessor::new(0, small_config()).unwrap();
        let band = ReferenceThresholds::new(40.0, 200.0).unwrap();
        processor.set_reference_thresholds(band);
        assert_eq!(processor.config().thresholds, band);
        processor.set_pca_enabled(true);
        assert!(processor.config().pca);
    }

    #[test]
    #[traced_test]
    fn test_flat_pca_workspace_warns_and_continues() {
        let mut processor = HarmonicProcessor::new(0, small_config()).unwrap();
        processor.set_pca_enabled(true);
        for _ in 0..40 {
            processor
                .enroll(&Sample::new(500, 1000, 500, 10, 33.3))
                .unwrap();
        }
        let outcome = processor.compute_frequency();
        assert!(matches!(outcome, FrequencyOutcome::TooNoisy { .. }));
        assert!(logs_contain("principal component update failed"));
    }

    #[test]
    #[traced_test]
    fn test_narrow_band_warns() {
        let config = ProcessorConfig {
            data_length: 10,
            buffer_length: 10,
            ..ProcessorConfig::default()
        };
        let mut processor = HarmonicProcessor::new(0, config).unwrap();
        let outcome = processor.compute_frequency();
        assert_eq!(outcome, FrequencyOutcome::TooNoisy { snr: SNR_FLOOR_DB });
        assert!(logs_contain("heart rate band too narrow"));
    }

    #[tokio::test]
    async fn test_events_carry_cell_id() {
        let mut processor = HarmonicProcessor::new(7, small_config()).unwrap();
        let mut rx = processor.subscribe();
        processor
            .enroll(&Sample::new(500, 1000, 500, 10, 33.3))
            .unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.cell, 7);
        assert!(matches!(first.event, ProcessorEvent::TimeUpdated(ref s) if s.len() == 32));
    }
}
