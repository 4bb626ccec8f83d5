//! Configuration loading from files and environment.
use rust_ppg::config::PpgConfig;
use rust_ppg::core::ColorChannel;
use rust_ppg::data::fft::SpectralWindow;
use rust_ppg::data::reference::{ConfidenceBand, Sex};
use rust_ppg::PpgError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_config(
        r#"
[application]
name = "bench"
log_level = "debug"

[processor]
data_length = 512
buffer_length = 256
filter_length = 7
channel = "all"
pca = true
pulse_count = 6
thresholds = { left = 55.0, right = 95.0 }
window = "hann"

[grid]
width = 8
height = 6
"#,
    );
    let config = PpgConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.processor.data_length, 512);
    assert_eq!(config.processor.filter_length, 7);
    assert_eq!(config.processor.channel, ColorChannel::All);
    assert!(config.processor.pca);
    assert_eq!(config.processor.thresholds.left, 55.0);
    assert_eq!(config.processor.window, SpectralWindow::Hann);
    assert_eq!(config.grid.cells(), 48);
    assert!(config.reference.is_none());
}

#[test]
fn test_partial_file_uses_defaults() {
    let file = write_config("[processor]\nbuffer_length = 128\n");
    let config = PpgConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.processor.buffer_length, 128);
    assert_eq!(config.processor.data_length, 256);
    assert_eq!(config.processor.channel, ColorChannel::Green);
    assert_eq!(config.processor.window, SpectralWindow::Rectangular);
    assert_eq!(config.grid.width, 4);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = PpgConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.processor, PpgConfig::default().processor);
}

#[test]
fn test_buffer_longer_than_data_rejected() {
    let file = write_config("[processor]\ndata_length = 128\nbuffer_length = 256\n");
    let config = PpgConfig::load_from(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(PpgError::Configuration(msg)) if msg.contains("buffer_length")
    ));
}

#[test]
fn test_empty_grid_rejected() {
    let file = write_config("[grid]\nwidth = 0\n");
    let config = PpgConfig::load_from(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(PpgError::Configuration(_))));
}

#[test]
fn test_type_mismatch_is_config_error() {
    let file = write_config("[processor]\ndata_length = \"long\"\n");
    assert!(matches!(
        PpgConfig::load_from(file.path()),
        Err(PpgError::Config(_))
    ));
}

#[test]
fn test_reference_selection_resolves() {
    let table = write_config(
        r#"
[[record]]
sex = "female"
age_from = 20
age_to = 35
percentiles = { "10.0" = 61.0, "90.0" = 89.0 }
"#,
    );
    let file = write_config(&format!(
        "[reference]\ntable = {:?}\nsex = \"female\"\nage = 28\nconfidence = \"twenty_percent\"\n",
        table.path().display().to_string()
    ));
    let config = PpgConfig::load_from(file.path()).unwrap();
    let selection = config.reference.as_ref().unwrap();
    assert_eq!(selection.sex, Sex::Female);
    assert_eq!(selection.confidence, ConfidenceBand::TwentyPercent);

    let band = config.resolve_thresholds().unwrap();
    assert_eq!((band.left, band.right), (61.0, 89.0));
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config("[application]\nname = \"from-file\"\n");
    std::env::set_var("RUST_PPG_APPLICATION__NAME", "from-env");
    let config = PpgConfig::load_from(file.path());
    std::env::remove_var("RUST_PPG_APPLICATION__NAME");
    assert_eq!(config.unwrap().application.name, "from-env");
}
