//! # Rust Acquisition Core Library
//!
//! Continuous acquisition of byte streams from scientific instruments over serial
//! or socket links: frame synchronization, decoding, a live sample buffer,
//! rotating raw and product log files, and a data-timeout alarm.
//!
//! ## Crate Structure
//!
//! - **`transport`**: the `Transport` trait with serial, TCP socket and scripted
//!   in-memory implementations.
//! - **`framing`**: `FrameSynchronizer`, turning arbitrary read chunks into frames
//!   and noise for terminator, marker and sentence based streams.
//! - **`parser`**: decoders for the generic delimited text, checksummed binary and
//!   NMEA 0183 instrument variants.
//! - **`data`**: the fixed capacity `RingBuffer`/`SampleBuffer`, printf style
//!   `Precision` formatting and the rotating `Logger`.
//! - **`alarm`**: `AlarmMonitor`, raising an alarm after a silence window.
//! - **`instrument`**: the `Instrument` orchestrator and its reader thread.
//! - **`probe`**: `ConnectionProbe`, a cancellable worker for trying port settings.
//! - **`config`**: loading and validating per-instrument configuration.
//! - **`core`**: values, records, status and the `InstrumentEvent` notifications.
//! - **`error`**: the `AcqError` family of error enums.
//! - **`tracing_setup`**: subscriber initialization for binaries and tests.

pub mod alarm;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod framing;
pub mod instrument;
pub mod parser;
pub mod probe;
pub mod tracing_setup;
pub mod transport;

pub use crate::config::{InstrumentConfig, InstrumentKind, RawConfig};
pub use crate::core::{InstrumentEvent, Record, Status, Value};
pub use crate::error::{AcqError, AppResult};
pub use crate::instrument::Instrument;
