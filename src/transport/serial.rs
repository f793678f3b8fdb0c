//! Serial port transport on top of `serialport`.
use super::{SerialParams, Transport};
use crate::error::TransportError;
use serialport::SerialPort;
use std::io::{self, Read};
use tracing::{debug, trace};

const READ_CHUNK: usize = 4096;

pub struct SerialTransport {
    params: SerialParams,
    port: Option<Box<dyn SerialPort>>,
    buf: Vec<u8>,
}

impl SerialTransport {
    pub fn new(params: SerialParams) -> Self {
        Self {
            params,
            port: None,
            buf: vec![0; READ_CHUNK],
        }
    }
}

fn data_bits(size: u8) -> Result<serialport::DataBits, TransportError> {
    match size {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(TransportError::Other(format!("invalid byte size {other}"))),
    }
}

fn stop_bits(bits: u8) -> Result<serialport::StopBits, TransportError> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        other => Err(TransportError::Other(format!("invalid stop bits {other}"))),
    }
}

fn map_open_error(port: &str, err: serialport::Error) -> TransportError {
    let description = err.description.to_lowercase();
    if description.contains("busy") || description.contains("exclusive") {
        return TransportError::Busy(format!("{port}: {}", err.description));
    }
    match err.kind {
        serialport::ErrorKind::NoDevice => TransportError::NotFound(format!("{port}: {}", err.description)),
        serialport::ErrorKind::Io(kind) => {
            TransportError::from_io(port, &io::Error::new(kind, err.description))
        }
        _ => TransportError::Other(format!("{port}: {}", err.description)),
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let p = &self.params;
        let port = serialport::new(&p.port, p.baud_rate)
            .data_bits(data_bits(p.byte_size)?)
            .parity(p.parity.to_serialport()?)
            .stop_bits(stop_bits(p.stop_bits)?)
            .flow_control(serialport::FlowControl::None)
            .timeout(p.timeout)
            .open()
            .map_err(|e| map_open_error(&p.port, e))?;
        debug!(port = %p.port, baud = p.baud_rate, "Opened serial port");
        self.port = Some(port);
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        let Some(port) = self.port.as_mut() else {
            return Err(TransportError::Other(format!("{} is not open", self.params.port)));
        };
        match port.read(&mut self.buf) {
            Ok(n) => {
                trace!(port = %self.params.port, bytes = n, "Serial read");
                Ok(self.buf[..n].to_vec())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(Vec::new())
            }
            Err(e) => Err(TransportError::from_io(&self.params.port, &e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.params.port, "Closed serial port");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.params.port, self.params.baud_rate)
    }
}
