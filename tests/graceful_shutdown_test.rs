//! Integration tests for instrument close behavior.

use rust_acq::config::{InstrumentConfig, RawConfig};
use rust_acq::core::{InstrumentEvent, Status};
use rust_acq::error::AcqError;
use rust_acq::instrument::Instrument;
use rust_acq::transport::{ScriptStep, ScriptedTransport};
use std::thread;
use std::time::{Duration, Instant};

fn create_test_config(log_path: &std::path::Path) -> InstrumentConfig {
    let toml_str = format!(
        r#"
        module = "generic"
        model = "Mock"
        serial_number = "1"
        log_path = {:?}
        log_raw = false
        log_products = true
        terminator = "\n"
        separator = ";"
        variable_columns = [0]
        variable_names = ["x"]
        variable_units = ["V"]
        variable_types = ["float"]
        variable_precision = []
        "#,
        log_path.display().to_string()
    );
    InstrumentConfig::try_from(RawConfig::from_toml_str(&toml_str).expect("Failed to parse test config"))
        .expect("Invalid test config")
}

fn wait_for_data(instrument: &Instrument) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while instrument.counters().received == 0 {
        assert!(Instant::now() < deadline, "no data received");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_multiple_close_calls() {
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptedTransport::new();
    let mut instrument = Instrument::new(create_test_config(dir.path()));
    let mut events = instrument.subscribe();

    instrument.open_transport(Box::new(script.clone())).unwrap();
    instrument.close();
    instrument.close();

    assert!(!instrument.is_open());
    assert_eq!(instrument.status(), Status::Disconnected);
    assert_eq!(script.closes(), 1);

    let disconnects = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, InstrumentEvent::Status(Status::Disconnected)))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn test_close_without_open_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut instrument = Instrument::new(create_test_config(dir.path()));
    let mut events = instrument.subscribe();
    instrument.close();
    assert!(events.try_recv().is_err());
    assert!(matches!(instrument.log_stop(), Err(AcqError::NotConnected)));
}

#[test]
fn test_close_flushes_log_and_clears_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptedTransport::new();
    let mut instrument = Instrument::new(create_test_config(dir.path()));
    instrument.open_transport(Box::new(script.clone())).unwrap();
    instrument.log_start().unwrap();

    script.push_chunk(b"0.5\n".to_vec());
    wait_for_data(&instrument);
    let mut events = instrument.subscribe();
    instrument.close();

    // Closing while logging goes straight to Disconnected.
    let closing: Vec<InstrumentEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let statuses: Vec<Status> = closing
        .iter()
        .filter_map(|e| match e {
            InstrumentEvent::Status(status) => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![Status::Disconnected]);
    assert!(closing
        .iter()
        .any(|e| matches!(e, InstrumentEvent::LogFile { path: None, .. })));

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
    let text = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.ends_with(", 0.5\n"));

    let snapshot = instrument.live_view().snapshot();
    assert!(snapshot.timestamps.iter().all(|t| t.is_nan()));
    assert!(snapshot.channels.is_empty());
}

#[test]
fn test_close_waits_for_blocked_read() {
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptedTransport::new();
    script.push(ScriptStep::Block(Duration::from_millis(200)));
    let mut instrument = Instrument::new(create_test_config(dir.path()));
    instrument.open_transport(Box::new(script.clone())).unwrap();
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    instrument.close();
    let elapsed = start.elapsed();

    // Bounded by the read timeout, never by the data.
    assert!(elapsed < Duration::from_secs(2), "close took too long: {elapsed:?}");
    assert_eq!(script.closes(), 1);
}

#[test]
fn test_reopen_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptedTransport::new();
    let mut instrument = Instrument::new(create_test_config(dir.path()));

    instrument.open_transport(Box::new(script.clone())).unwrap();
    assert!(matches!(
        instrument.open_transport(Box::new(ScriptedTransport::new())),
        Err(AcqError::AlreadyConnected)
    ));
    instrument.close();
    instrument.open_transport(Box::new(script.clone())).unwrap();
    assert!(instrument.is_open());
    assert_eq!(script.opens(), 2);
    drop(instrument);
    assert_eq!(script.closes(), 2);
}
