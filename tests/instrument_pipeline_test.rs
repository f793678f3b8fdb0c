//! End-to-end acquisition: scripted transport → reader thread → events, buffer and log files.

use rust_acq::config::{InstrumentConfig, RawConfig};
use rust_acq::core::{InstrumentEvent, LogStream, Status, Value};
use rust_acq::error::AcqError;
use rust_acq::instrument::Instrument;
use rust_acq::transport::{ScriptStep, ScriptedTransport};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

fn config(toml: &str, log_path: &Path) -> InstrumentConfig {
    let text = format!("log_path = {:?}\n{toml}", log_path.display().to_string());
    InstrumentConfig::try_from(RawConfig::from_toml_str(&text).unwrap()).unwrap()
}

fn generic(log_path: &Path) -> InstrumentConfig {
    config(
        r#"
        module = "generic"
        model = "CTD"
        serial_number = "42"
        log_raw = true
        log_products = true
        terminator = "\r\n"
        separator = ","
        variable_columns = [0, 1]
        variable_names = ["temp", "cond"]
        variable_units = ["C", "S/m"]
        variable_types = ["float", "float"]
        variable_precision = ["%.2f", "%.3f"]
        aux_variables = ["temp"]
        "#,
        log_path,
    )
}

/// Collect events until `done` returns true for one of them (included).
fn collect_until(
    rx: &mut broadcast::Receiver<InstrumentEvent>,
    mut done: impl FnMut(&InstrumentEvent) -> bool,
) -> Vec<InstrumentEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => {
                let stop = done(&event);
                seen.push(event);
                if stop {
                    return seen;
                }
            }
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
            Err(e) => panic!("timed out waiting for event ({e:?}), got {seen:?}"),
        }
    }
}

fn data_count(n: usize) -> impl FnMut(&InstrumentEvent) -> bool {
    let mut count = 0;
    move |event| {
        if matches!(event, InstrumentEvent::Data { .. }) {
            count += 1;
        }
        count == n
    }
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}

#[test]
fn test_generic_instrument_logs_and_publishes() {
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptedTransport::new();
    let mut instrument = Instrument::new(generic(dir.path()));
    let mut events = instrument.subscribe();

    instrument.open_transport(Box::new(script.clone())).unwrap();
    instrument.log_start().unwrap();
    assert_eq!(
        instrument.status(),
        Status::Logging { raw: true, products: true }
    );

    // Split mid-line: frames must not depend on read boundaries.
    script.push_chunk(b"12.5,3.4".to_vec());
    script.push_chunk(b"1\r\n13.0,3.5\r\n".to_vec());
    let seen = collect_until(&mut events, data_count(2));

    let data: Vec<(Vec<Value>, Vec<f64>)> = seen
        .iter()
        .filter_map(|e| match e {
            InstrumentEvent::Data { record, values, .. } => {
                Some((record.values.clone(), values.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        data[0],
        (vec![Value::Float(12.5), Value::Float(3.41)], vec![12.5, 3.41])
    );
    assert_eq!(data[1].1, vec![13.0, 3.5]);
    assert!(seen.iter().any(|e| matches!(
        e,
        InstrumentEvent::AuxData(aux) if aux == &[("temp (C)".to_string(), "12.50".to_string())]
    )));
    assert!(seen.iter().any(|e| matches!(
        e,
        InstrumentEvent::LogFile { stream: LogStream::Products, path: Some(_) }
    )));

    let snapshot = instrument.live_view().snapshot();
    assert_eq!(snapshot.names, vec!["temp", "cond"]);
    assert_eq!(snapshot.channels[0].last().copied(), Some(13.0));

    instrument.close();
    let counters = instrument.counters();
    assert_eq!((counters.received, counters.corrupted, counters.logged), (2, 0, 2));

    let csv = fs::read_to_string(&files_with_extension(dir.path(), "csv")[0]).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "time, temp, cond");
    assert_eq!(lines[1], "yyyy/mm/dd HH:MM:SS.fff, C, S/m");
    assert!(lines[2].ends_with(", 12.50, 3.410"), "{}", lines[2]);
    assert!(lines[3].ends_with(", 13.00, 3.500"), "{}", lines[3]);

    let raw = fs::read_to_string(&files_with_extension(dir.path(), "raw")[0]).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines[0], "time, packet");
    assert!(lines[2].ends_with(", 12.5,3.41"));
    assert!(lines[3].ends_with(", 13.0,3.5"));

    let rest: Vec<InstrumentEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let closed = rest
        .iter()
        .filter(|e| matches!(e, InstrumentEvent::LogFile { path: None, .. }))
        .count();
    assert_eq!(closed, 2);
    assert!(matches!(
        rest.last(),
        Some(InstrumentEvent::Status(Status::Disconnected))
    ));
}

const MARKER: [u8; 4] = [0xFF, 0x00, 0xFF, 0x00];

/// Marker, two u16 fields, checksum over marker and fields, one pad byte.
fn binary_frame(a: u16, b: u16) -> Vec<u8> {
    let mut frame = MARKER.to_vec();
    frame.extend_from_slice(&a.to_be_bytes());
    frame.extend_from_slice(&b.to_be_bytes());
    let sum = frame.iter().fold(0u16, |s, &x| s.wrapping_add(u16::from(x)));
    frame.extend_from_slice(&sum.to_be_bytes());
    frame.push(0);
    frame
}

#[test]
fn test_invalid_checksum_is_never_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        r#"
        module = "checksummed_binary"
        model = "BB3"
        serial_number = "7"
        log_raw = true
        log_products = false
        frame_length = 7
        variable_names = ["a", "b"]
        variable_units = ["", ""]
        variable_types = ["u16", "u16"]
        variable_precision = []
        "#,
        dir.path(),
    );
    let script = ScriptedTransport::new();
    let mut instrument = Instrument::new(cfg);
    let mut events = instrument.subscribe();
    instrument.open_transport(Box::new(script.clone())).unwrap();
    instrument.log_start().unwrap();

    let mut bad = binary_frame(0x0102, 0x0304);
    bad[4] ^= 0x10;
    let good = binary_frame(0x0506, 0x0708);
    script.push_chunk([bad, good.clone()].concat());

    let seen = collect_until(&mut events, data_count(1));
    let corrupted = seen
        .iter()
        .filter(|e| matches!(e, InstrumentEvent::PacketCorrupted))
        .count();
    assert_eq!(corrupted, 1);
    let Some(InstrumentEvent::Data { record, .. }) = seen.last() else {
        panic!("expected data, got {seen:?}");
    };
    assert_eq!(record.values, vec![Value::Int(0x0506), Value::Int(0x0708)]);

    instrument.close();
    let counters = instrument.counters();
    assert_eq!((counters.received, counters.corrupted, counters.logged), (2, 1, 1));

    // Only the good frame, followed by its big-endian f64 timestamp.
    let bin = fs::read(&files_with_extension(dir.path(), "bin")[0]).unwrap();
    assert_eq!(bin.len(), good.len() + 8);
    assert_eq!(&bin[..good.len()], good.as_slice());
    let ts = f64::from_be_bytes(bin[good.len()..].try_into().unwrap());
    assert!(ts > 1.6e9);
}

#[test]
fn test_unsupported_sentence_is_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        r#"
        module = "nmea"
        model = "GPS"
        serial_number = "1"
        log_raw = false
        log_products = false
        variable_names = ["heading"]
        variable_units = ["deg"]
        variable_types = ["float"]
        variable_precision = []
        "#,
        dir.path(),
    );
    let script = ScriptedTransport::with_chunks([
        b"$GPGSV,3,1,11,03,03,111,00\r\n".to_vec(),
        b"$GPGSV,3,2,11,14,25,170,00\r\n".to_vec(),
        b"$HEHDT,274.1,T\r\n".to_vec(),
    ]);
    let mut instrument = Instrument::new(cfg);
    let mut events = instrument.subscribe();
    instrument.open_transport(Box::new(script)).unwrap();

    let seen = collect_until(&mut events, data_count(1));
    instrument.close();

    let corrupted = seen
        .iter()
        .filter(|e| matches!(e, InstrumentEvent::PacketCorrupted))
        .count();
    assert_eq!(corrupted, 1);
    assert_eq!(instrument.counters().received, 3);
    assert!(matches!(
        seen.last(),
        Some(InstrumentEvent::Data { values, .. }) if values == &[274.1]
    ));
}

#[test]
fn test_log_failure_stops_stream_but_not_acquisition() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the log directory should be.
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"").unwrap();
    let mut cfg = generic(&blocker);
    cfg.log_products = false;

    let script = ScriptedTransport::new();
    let mut instrument = Instrument::new(cfg);
    let mut events = instrument.subscribe();
    instrument.open_transport(Box::new(script.clone())).unwrap();
    instrument.log_start().unwrap();

    script.push_chunk(b"1.0,2.0\r\n3.0,4.0\r\n".to_vec());
    let seen = collect_until(&mut events, data_count(2));
    assert!(seen.iter().any(|e| matches!(
        e,
        InstrumentEvent::LogFile { stream: LogStream::Raw, path: None }
    )));
    assert!(seen
        .iter()
        .any(|e| matches!(e, InstrumentEvent::Status(Status::Connected))));
    assert_eq!(instrument.status(), Status::Connected);
    assert!(instrument.is_open());
    instrument.close();
}

#[test]
fn test_data_timeout_alarm_and_acknowledgement() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = generic(dir.path());
    cfg.data_timeout = Duration::from_millis(300);
    let script = ScriptedTransport::new();
    let mut instrument = Instrument::new(cfg);
    let mut events = instrument.subscribe();
    instrument.open_transport(Box::new(script.clone())).unwrap();

    collect_until(&mut events, |e| matches!(e, InstrumentEvent::Alarm(true)));
    instrument.acknowledge_alarm().unwrap();
    collect_until(&mut events, |e| matches!(e, InstrumentEvent::Alarm(false)));

    // The silence window restarted; it elapses again, then data clears it.
    let seen = collect_until(&mut events, |e| matches!(e, InstrumentEvent::Alarm(true)));
    assert_eq!(
        seen.iter().filter(|e| matches!(e, InstrumentEvent::Alarm(_))).count(),
        1
    );
    script.push_chunk(b"1.0,2.0\r\n".to_vec());
    collect_until(&mut events, |e| matches!(e, InstrumentEvent::Alarm(false)));
    instrument.close();
}

#[test]
fn test_timed_out_command_never_runs() {
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptedTransport::new();
    script.push(ScriptStep::Block(Duration::from_millis(600)));
    let mut instrument =
        Instrument::new(generic(dir.path())).with_command_timeout(Duration::from_millis(100));
    instrument.open_transport(Box::new(script.clone())).unwrap();

    // Wait until the reader sits in the blocking read.
    let deadline = Instant::now() + WAIT;
    while script.pending() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(matches!(
        instrument.log_start(),
        Err(AcqError::CommandTimeout(_))
    ));

    // The read returns and the reader drains its queue without starting the logs.
    thread::sleep(Duration::from_millis(800));
    assert_eq!(instrument.status(), Status::Connected);

    instrument.log_start().unwrap();
    assert_eq!(
        instrument.status(),
        Status::Logging {
            raw: true,
            products: true
        }
    );
    instrument.close();
}
