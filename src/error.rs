//! Custom error types for the acquisition engine.
//!
//! Every failure domain gets its own `thiserror` enum so that the reader loop can
//! decide locally what to do with it, and `AcqError` consolidates them for the
//! public API:
//!
//! - **`TransportError`**: opening or reading an interface failed. Recoverable: the
//!   instrument moves to disconnected and the user may retry.
//! - **`ParseError`**: a frame could not be decoded. Recoverable: the frame is
//!   discarded, the corrupted-packet counter is incremented and the stream continues.
//! - **`ConfigError`**: the configuration is incomplete or inconsistent. Fatal at
//!   construction, surfaced before any I/O begins.
//! - **`LogIoError`**: a log file could not be created or written. Logging for that
//!   stream stops, acquisition continues.
//!
//! Synchronization never fails: bytes that do not belong to a frame are reported as
//! noise, not as errors.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, AcqError>;

/// Failure to open or read a byte-stream endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Map an I/O error raised while opening or reading `resource`.
    pub fn from_io(resource: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        // EBUSY is reported as a raw OS error on unix, there is no ErrorKind for it.
        if err.raw_os_error() == Some(16) {
            return TransportError::Busy(format!("{resource}: {err}"));
        }
        match err.kind() {
            ErrorKind::NotFound => TransportError::NotFound(format!("{resource}: {err}")),
            ErrorKind::AddrInUse => TransportError::Busy(format!("{resource}: {err}")),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                TransportError::Timeout(format!("{resource}: {err}"))
            }
            _ => TransportError::Other(format!("{resource}: {err}")),
        }
    }
}

/// Failure to decode a single frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid checksum")]
    InvalidChecksum,

    /// `repeated` is false only for the first occurrence of a sentence id.
    #[error("Unsupported sentence: {sentence}")]
    Unsupported { sentence: String, repeated: bool },

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Invalid or incomplete configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field '{field}' for {module} instrument")]
    Missing { module: &'static str, field: &'static str },

    #[error("Configuration validation error: {0}")]
    Invalid(String),

    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure of a log file operation.
#[derive(Error, Debug)]
pub enum LogIoError {
    #[error("Unable to create log file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write log file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Umbrella error for the public instrument API.
#[derive(Error, Debug)]
pub enum AcqError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Log(#[from] LogIoError),

    #[error("Instrument is not connected")]
    NotConnected,

    #[error("Instrument is connected, close the interface first")]
    AlreadyConnected,

    #[error("Reader thread did not acknowledge the command within {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
}
