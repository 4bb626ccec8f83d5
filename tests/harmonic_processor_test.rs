//! Integration tests for the single-cell harmonic processor.
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_ppg::core::{ColorChannel, FrequencyOutcome, ProcessorEvent, Sample};
use rust_ppg::data::fft::SpectralWindow;
use rust_ppg::data::processor::{HarmonicProcessor, ProcessorConfig, SNR_THRESHOLD_DB};
use rust_ppg::data::reference::ReferenceThresholds;
use rust_ppg::synthetic::SyntheticPulse;
use rust_ppg::PpgError;

fn config(data_length: usize, buffer_length: usize) -> ProcessorConfig {
    ProcessorConfig {
        data_length,
        buffer_length,
        filter_length: 5,
        channel: ColorChannel::Green,
        pca: false,
        pulse_count: 4,
        thresholds: ReferenceThresholds::new(70.0, 80.0).unwrap(),
        window: SpectralWindow::Rectangular,
    }
}

fn feed(processor: &mut HarmonicProcessor, samples: impl IntoIterator<Item = Sample>) {
    for sample in samples {
        processor.enroll(&sample).unwrap();
    }
}

/// Pulse on all three channels with small independent noise.
fn colored_pulse(bpm: f64, count: usize, seed: u64) -> Vec<Sample> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let t = i as f64 * 33.3 / 1000.0;
            let s = (2.0 * std::f64::consts::PI * bpm / 60.0 * t).sin();
            let mut level = |base: f64, gain: f64| {
                let v = base + gain * s + rng.gen_range(-0.5..=0.5);
                (v * 10.0).round() as u64
            };
            let red = level(60.0, 4.0);
            let green = level(100.0, 10.0);
            let blue = level(40.0, 1.0);
            Sample::new(red, green, blue, 10, 33.3)
        })
        .collect()
}

#[test]
fn test_end_to_end_green_pulse() {
    let mut processor = HarmonicProcessor::new(0, config(256, 128)).unwrap();
    feed(&mut processor, SyntheticPulse::new(72.0).take(128));

    let outcome = processor.compute_frequency();
    let decision = outcome.decision().expect("pulse should clear the SNR threshold");
    assert!((decision.bpm - 72.0).abs() < 2.0, "bpm {}", decision.bpm);
    assert!(decision.snr > SNR_THRESHOLD_DB);
    assert!(decision.plausible);
    assert_eq!(processor.heart_rate(), decision.bpm);
    assert_eq!(processor.snr(), decision.snr);
}

#[test]
fn test_untapered_spectrum_is_the_default() {
    let mut processor = HarmonicProcessor::new(0, config(256, 128)).unwrap();
    feed(&mut processor, SyntheticPulse::new(72.0).take(128));

    let decision = *processor
        .compute_frequency()
        .decision()
        .expect("pulse should clear the SNR threshold");
    // 72 bpm sits between bins 5 and 6 of a 4.26 s window; the raw spectrum leaks
    // into both neighbours.
    assert!((decision.snr - 17.69).abs() < 0.05, "snr {}", decision.snr);
    assert!((decision.bpm - 70.10).abs() < 0.05, "bpm {}", decision.bpm);
}

#[test]
fn test_hann_window_is_opt_in() {
    let tapered = ProcessorConfig {
        window: SpectralWindow::Hann,
        ..config(256, 128)
    };
    let mut processor = HarmonicProcessor::new(0, tapered).unwrap();
    feed(&mut processor, SyntheticPulse::new(72.0).take(128));

    let decision = *processor
        .compute_frequency()
        .decision()
        .expect("pulse should clear the SNR threshold");
    assert!((decision.snr - 29.60).abs() < 0.05, "snr {}", decision.snr);
    assert!((decision.bpm - 71.44).abs() < 0.05, "bpm {}", decision.bpm);
}

#[test]
fn test_sinusoids_across_band() {
    for bpm in [60.0, 72.0, 90.0, 120.0] {
        let mut processor = HarmonicProcessor::new(0, config(256, 256)).unwrap();
        feed(&mut processor, SyntheticPulse::new(bpm).take(512));

        match processor.compute_frequency() {
            FrequencyOutcome::HeartRate(decision) => {
                assert!(
                    (decision.bpm - bpm).abs() < 2.0,
                    "expected {bpm}, got {}",
                    decision.bpm
                );
                assert_eq!(decision.plausible, (70.0..=80.0).contains(&bpm));
            }
            other => panic!("{bpm} bpm rejected: {other:?}"),
        }
    }
}

#[test]
fn test_uniform_noise_is_rejected() {
    let trials = 40;
    let mut rejected = 0;
    let mut snr_sum = 0.0;
    for seed in 0..trials {
        let mut processor = HarmonicProcessor::new(0, config(256, 128)).unwrap();
        feed(&mut processor, SyntheticPulse::noise_only(10.0, seed).take(300));
        let outcome = processor.compute_frequency();
        snr_sum += outcome.snr();
        if matches!(outcome, FrequencyOutcome::TooNoisy { .. }) {
            rejected += 1;
        }
    }
    assert!(rejected >= 28, "only {rejected}/{trials} rejected");
    assert!(snr_sum / (trials as f64) < SNR_THRESHOLD_DB);
}

#[test]
fn test_time_domain_estimate() {
    let mut processor = HarmonicProcessor::new(0, config(256, 128)).unwrap();
    feed(&mut processor, SyntheticPulse::new(72.0).take(128));

    let estimate = processor.count_frequency();
    assert!(estimate.reliable);
    assert!((estimate.bpm - 72.0).abs() < 3.0, "bpm {}", estimate.bpm);
}

#[test]
fn test_time_domain_without_crossings_is_unreliable() {
    let mut processor = HarmonicProcessor::new(0, config(64, 64)).unwrap();
    feed(&mut processor, (0..10).map(|_| Sample::new(500, 1000, 500, 10, 33.3)));
    let estimate = processor.count_frequency();
    assert!(!estimate.reliable);
    assert_eq!(estimate.bpm, 0.0);
}

#[test]
fn test_pca_and_dual_channel_paths() {
    for channel in [ColorChannel::Green, ColorChannel::All] {
        for pca in [false, true] {
            let mut processor = HarmonicProcessor::new(0, config(256, 256)).unwrap();
            processor.set_channel_mode(channel);
            processor.set_pca_enabled(pca);
            feed(&mut processor, colored_pulse(72.0, 512, 5));

            let outcome = processor.compute_frequency();
            let decision = outcome
                .decision()
                .unwrap_or_else(|| panic!("{channel:?} pca={pca} rejected: {outcome:?}"));
            assert!(
                (decision.bpm - 72.0).abs() < 2.0,
                "{channel:?} pca={pca}: {}",
                decision.bpm
            );
        }
    }
}

#[test]
fn test_pca_can_be_enabled_late() {
    let mut processor = HarmonicProcessor::new(0, config(256, 128)).unwrap();
    // Six bins of a 128-sample window at 33.3 ms.
    let bpm = 6.0 * 60_000.0 / (128.0 * 33.3);
    feed(&mut processor, SyntheticPulse::new(bpm).take(300));
    processor.set_pca_enabled(true);

    let decision = *processor
        .compute_frequency()
        .decision()
        .expect("workspace filled before PCA was enabled");
    assert!((decision.bpm - bpm).abs() < 0.5, "bpm {}", decision.bpm);
    assert!(!decision.plausible);
}

#[test]
fn test_incremental_mean_matches_retained_window() {
    let data_length = 32;
    let mut processor = HarmonicProcessor::new(0, config(data_length, 32)).unwrap();
    let samples: Vec<Sample> = SyntheticPulse::new(80.0).with_noise(5.0).take(100).collect();

    for (n, sample) in samples.iter().enumerate() {
        processor.enroll(sample).unwrap();
        let kept = (n + 1).min(data_length);
        let window = &samples[n + 1 - kept..=n];
        let exact = window.iter().map(|s| s.mean_rgb()[1]).sum::<f64>() / kept as f64;
        assert_eq!(processor.retained_len(), kept);
        assert!(
            (processor.channel_mean() - exact).abs() < 1e-9,
            "after {} samples",
            n + 1
        );
    }
    assert_eq!(processor.signal().len(), data_length);
}

#[test]
fn test_zero_area_rejected() {
    let mut processor = HarmonicProcessor::new(0, config(64, 64)).unwrap();
    let err = processor
        .enroll(&Sample::new(10, 10, 10, 0, 33.3))
        .unwrap_err();
    assert!(matches!(err, PpgError::InvalidSample { area: 0 }));
    assert_eq!(processor.samples_enrolled(), 0);
}

#[test]
fn test_flat_input_is_too_noisy() {
    let mut processor = HarmonicProcessor::new(0, config(64, 64)).unwrap();
    feed(&mut processor, (0..64).map(|_| Sample::new(500, 1000, 500, 10, 33.3)));
    let outcome = processor.compute_frequency();
    assert!(matches!(outcome, FrequencyOutcome::TooNoisy { .. }));
    assert!(outcome.snr().is_finite());
}

#[tokio::test]
async fn test_estimate_events() {
    let mut processor = HarmonicProcessor::new(3, config(256, 128)).unwrap();
    feed(&mut processor, SyntheticPulse::new(72.0).take(128));

    let mut events = processor.subscribe();
    processor.compute_frequency();

    let mut saw_spectrum = false;
    let mut saw_snr = false;
    let mut saw_rate = false;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.cell, 3);
        match event.event {
            ProcessorEvent::SpectrumUpdated(spectrum) => {
                assert_eq!(spectrum.len(), 65);
                saw_spectrum = true;
            }
            ProcessorEvent::SnrUpdated { snr } => saw_snr = snr > SNR_THRESHOLD_DB,
            ProcessorEvent::HeartRateUpdated(decision) => saw_rate = decision.plausible,
            _ => {}
        }
    }
    assert!(saw_spectrum && saw_snr && saw_rate);
}
