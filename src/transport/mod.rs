//! Byte-stream endpoints.
//!
//! A [`Transport`] is opened once per session and read from a single thread. Reads
//! block for at most the configured timeout and may return an empty buffer;
//! callers treat an empty read as "nothing arrived yet", never as end of stream.
//!
//! | Variant   | Backend                    | Feature             |
//! |-----------|----------------------------|---------------------|
//! | Serial    | `serialport`               | `instrument_serial` |
//! | Socket    | `std::net::TcpStream`      | always              |
//! | Scripted  | in-memory, tests and demos | always              |

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod socket;

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use mock::{ScriptStep, ScriptedTransport};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;
pub use socket::SocketTransport;

/// A byte-stream endpoint owned by one reader.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), TransportError>;

    /// Bytes received since the last call, waiting at most the configured timeout.
    fn read(&mut self) -> Result<Vec<u8>, TransportError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Human readable endpoint, e.g. `/dev/ttyUSB0 @ 19200` or `10.0.0.2:10110`.
    fn describe(&self) -> String;
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl Parity {
    /// Single letter code used on the wire configuration of most devices.
    pub fn code(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }

    #[cfg(feature = "instrument_serial")]
    pub(crate) fn to_serialport(self) -> Result<serialport::Parity, TransportError> {
        match self {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Mark | Parity::Space => Err(TransportError::Other(format!(
                "parity {self} is not supported by the serial backend"
            ))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
            Parity::Mark => "mark",
            Parity::Space => "space",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "even" | "e" => Ok(Parity::Even),
            "odd" | "o" => Ok(Parity::Odd),
            "mark" | "m" => Ok(Parity::Mark),
            "space" | "s" => Ok(Parity::Space),
            other => Err(format!("unknown parity '{other}'")),
        }
    }
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParams {
    pub port: String,
    pub baud_rate: u32,
    /// Data bits, 5 to 8.
    pub byte_size: u8,
    pub parity: Parity,
    /// 1 or 2.
    pub stop_bits: u8,
    pub timeout: Duration,
}

impl SerialParams {
    /// 8N1 on `port`.
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            byte_size: 8,
            parity: Parity::None,
            stop_bits: 1,
            timeout,
        }
    }
}

/// TCP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketParams {
    pub host: String,
    pub port: u16,
    /// Bounds both the connect and each read.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportParams {
    Serial(SerialParams),
    Socket(SocketParams),
}

impl TransportParams {
    /// Longest a single read can block.
    pub fn read_timeout(&self) -> Duration {
        match self {
            TransportParams::Serial(p) => p.timeout,
            TransportParams::Socket(p) => p.timeout,
        }
    }
}

impl fmt::Display for TransportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportParams::Serial(p) => write!(
                f,
                "{} @ {} {}{}{}",
                p.port,
                p.baud_rate,
                p.byte_size,
                p.parity.code(),
                p.stop_bits
            ),
            TransportParams::Socket(p) => write!(f, "{}:{}", p.host, p.port),
        }
    }
}

/// Build the transport described by `params` and open it.
pub fn connect(params: &TransportParams) -> Result<Box<dyn Transport>, TransportError> {
    let mut transport: Box<dyn Transport> = match params {
        #[cfg(feature = "instrument_serial")]
        TransportParams::Serial(p) => Box::new(SerialTransport::new(p.clone())),
        #[cfg(not(feature = "instrument_serial"))]
        TransportParams::Serial(_) => {
            return Err(TransportError::Other(
                "serial support disabled, rebuild with the instrument_serial feature".into(),
            ))
        }
        TransportParams::Socket(p) => Box::new(SocketTransport::new(p.clone())),
    };
    transport.open()?;
    Ok(transport)
}
