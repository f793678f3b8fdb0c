//! TCP client transport.
use super::{SocketParams, Transport};
use crate::error::TransportError;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use tracing::debug;

const READ_CHUNK: usize = 4096;

pub struct SocketTransport {
    params: SocketParams,
    stream: Option<TcpStream>,
    buf: Vec<u8>,
}

impl SocketTransport {
    pub fn new(params: SocketParams) -> Self {
        Self {
            params,
            stream: None,
            buf: vec![0; READ_CHUNK],
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.params.host, self.params.port)
    }
}

impl Transport for SocketTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let endpoint = self.endpoint();
        let addrs = (self.params.host.as_str(), self.params.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::NotFound(format!("{endpoint}: {e}")))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.params.timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.params.timeout))
                        .map_err(|e| TransportError::from_io(&endpoint, &e))?;
                    debug!(%endpoint, "Connected socket");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => TransportError::from_io(&endpoint, &e),
            None => TransportError::NotFound(format!("{endpoint}: no address")),
        })
    }

    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        let endpoint = self.endpoint();
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Other(format!("{endpoint} is not open")));
        };
        match stream.read(&mut self.buf) {
            Ok(0) => Err(TransportError::Other(format!("{endpoint}: connection closed by peer"))),
            Ok(n) => Ok(self.buf[..n].to_vec()),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(Vec::new())
            }
            Err(e) => Err(TransportError::from_io(&endpoint, &e)),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(endpoint = %self.endpoint(), "Closed socket");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        self.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Duration;

    fn params(port: u16) -> SocketParams {
        SocketParams {
            host: "127.0.0.1".into(),
            port,
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_reads_and_detects_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"$GPHDT,1.0,T*1B\r\n").unwrap();
        });

        let mut transport = SocketTransport::new(params(port));
        transport.open().unwrap();
        assert!(transport.is_open());
        server.join().unwrap();

        let mut received = Vec::new();
        loop {
            match transport.read() {
                Ok(bytes) => received.extend(bytes),
                Err(e) => {
                    assert!(matches!(e, TransportError::Other(msg) if msg.contains("closed")));
                    break;
                }
            }
        }
        assert_eq!(received, b"$GPHDT,1.0,T*1B\r\n");
        transport.close();
        assert!(!transport.is_open());
    }

    #[test]
    fn test_idle_read_times_out_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = SocketTransport::new(params(port));
        transport.open().unwrap();
        let _conn = listener.accept().unwrap();
        assert_eq!(transport.read().unwrap(), Vec::<u8>::new());
    }
}
