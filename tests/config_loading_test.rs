//! Configuration files and environment overrides.

use rust_acq::config::{Framing, InstrumentConfig, InstrumentKind, RawConfig};
use rust_acq::error::ConfigError;
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn sample(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config").join(name)
}

fn load(path: &Path) -> Result<InstrumentConfig, ConfigError> {
    InstrumentConfig::try_from(RawConfig::load_from(path)?)
}

#[test]
#[serial]
fn test_bundled_configs_are_valid() {
    let generic = load(&sample("generic.toml")).unwrap();
    assert_eq!(generic.kind, InstrumentKind::Generic);
    assert_eq!(generic.active_channels.as_deref(), Some(&["t".to_string(), "s".to_string()][..]));

    let nmea = load(&sample("nmea.toml")).unwrap();
    assert_eq!(nmea.kind, InstrumentKind::SentenceBased);
    assert_eq!(nmea.framing, Framing::Sentences);

    let binary = load(&sample("binary.toml")).unwrap();
    assert_eq!(binary.kind, InstrumentKind::ChecksummedBinary);
    assert_eq!(binary.buffer_length, 480);
    assert!(matches!(binary.framing, Framing::Registered { frame_length: 17, .. }));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ctd.toml");
    std::fs::write(&file, std::fs::read_to_string(sample("generic.toml")).unwrap()).unwrap();

    std::env::set_var("RUST_ACQ_LOG_PATH", dir.path().join("override"));
    std::env::set_var("RUST_ACQ_DATA_TIMEOUT", "5");
    let cfg = load(&file);
    std::env::remove_var("RUST_ACQ_LOG_PATH");
    std::env::remove_var("RUST_ACQ_DATA_TIMEOUT");

    let cfg = cfg.unwrap();
    assert_eq!(cfg.log_path, dir.path().join("override"));
    assert_eq!(cfg.data_timeout, Duration::from_secs(5));
    assert_eq!(cfg.model, "SBE45");
}

#[test]
#[serial]
fn test_missing_field_in_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("broken.toml");
    let text = std::fs::read_to_string(sample("binary.toml")).unwrap();
    let text: String = text
        .lines()
        .filter(|line| !line.starts_with("frame_length"))
        .map(|line| format!("{line}\n"))
        .collect();
    std::fs::write(&file, text).unwrap();

    let err = load(&file).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Missing { field: "frame_length", .. }
    ));
}
