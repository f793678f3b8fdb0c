//! Core data types shared by the parsers, loggers and the instrument orchestrator.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single decoded value.
///
/// Numeric fields that are absent or unparsable decode to `Float(NaN)`, never to zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    /// The "no value" marker for numeric fields.
    pub const MISSING: Value = Value::Float(f64::NAN);

    /// Numeric view of the value, `None` for text and booleans.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) | Value::Bool(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Float(v) if v.is_nan())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) if v.is_nan() => f.write_str("nan"),
            // Keeps the decimal point on whole numbers: 21.0, not 21.
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
        }
    }
}

/// Ordered values decoded from one frame, aligned 1:1 with the configured variable names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Connection state reported to consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Disconnected,
    Connected,
    Logging { raw: bool, products: bool },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Disconnected => f.write_str("Disconnected"),
            Status::Connected => f.write_str("Connected"),
            Status::Logging { raw: true, products: true } => f.write_str("Logging (raw & prod)"),
            Status::Logging { raw: true, products: false } => f.write_str("Logging (raw)"),
            Status::Logging { raw: false, .. } => f.write_str("Logging (prod)"),
        }
    }
}

/// The two log streams an instrument may write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Raw,
    Products,
}

/// Notification pushed by an instrument; consumers drain them from a broadcast channel.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InstrumentEvent {
    /// A frame decoded successfully. `values` holds the active numeric channels only.
    Data {
        record: Record,
        values: Vec<f64>,
        timestamp: DateTime<Utc>,
    },
    /// Labelled auxiliary values, already formatted.
    AuxData(Vec<(String, String)>),
    Status(Status),
    PacketReceived,
    PacketCorrupted,
    PacketLogged,
    /// Names of the channels currently forwarded in `Data::values`.
    ActiveChannels(Vec<String>),
    /// Data-timeout alarm raised (`true`) or cleared (`false`).
    Alarm(bool),
    /// A log file was opened (`Some`) or closed (`None`).
    LogFile {
        stream: LogStream,
        path: Option<PathBuf>,
    },
    TransportFailure(String),
}

/// Running packet counters, shared between the reader thread and consumers.
#[derive(Debug, Default)]
pub struct Counters {
    received: AtomicU64,
    corrupted: AtomicU64,
    logged: AtomicU64,
    noise_bytes: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub received: u64,
    pub corrupted: u64,
    pub logged: u64,
    pub noise_bytes: u64,
}

impl Counters {
    pub(crate) fn packet_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_corrupted(&self) {
        self.corrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_logged(&self) {
        self.logged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn noise(&self, bytes: usize) {
        self.noise_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Zero every counter. Called on open and on log start.
    pub(crate) fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.corrupted.store(0, Ordering::Relaxed);
        self.logged.store(0, Ordering::Relaxed);
        self.noise_bytes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
            logged: self.logged.load(Ordering::Relaxed),
            noise_bytes: self.noise_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_value_is_nan_not_zero() {
        assert!(Value::MISSING.is_missing());
        assert!(Value::MISSING.as_f64().is_some_and(f64::is_nan));
        assert!(!Value::Int(0).is_missing());
        assert_eq!(Value::MISSING.to_string(), "nan");
    }

    #[test]
    fn displays_values_like_log_files() {
        assert_eq!(Value::Int(12).to_string(), "12");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Float(21.0).to_string(), "21.0");
        assert_eq!(Value::Float(-0.0).to_string(), "-0.0");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Text("A".into()).to_string(), "A");
        assert_eq!(Value::Text("A".into()).as_f64(), None);
    }

    #[test]
    fn status_labels() {
        assert_eq!(
            Status::Logging { raw: true, products: true }.to_string(),
            "Logging (raw & prod)"
        );
        assert_eq!(Status::Logging { raw: false, products: true }.to_string(), "Logging (prod)");
    }

    #[test]
    fn counters_snapshot_and_reset() {
        let counters = Counters::default();
        counters.packet_received();
        counters.packet_received();
        counters.packet_corrupted();
        counters.noise(7);
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot { received: 2, corrupted: 1, logged: 0, noise_bytes: 7 }
        );
        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn events_serialize_as_tagged_json() {
        let alarm = serde_json::to_value(InstrumentEvent::Alarm(true)).unwrap();
        assert_eq!(alarm, serde_json::json!({"event": "alarm", "data": true}));
        let status = serde_json::to_value(InstrumentEvent::Status(Status::Connected)).unwrap();
        assert_eq!(status, serde_json::json!({"event": "status", "data": "connected"}));
        let received = serde_json::to_value(InstrumentEvent::PacketReceived).unwrap();
        assert_eq!(received, serde_json::json!({"event": "packet_received"}));
    }
}
