//! Byte transport
//!
//! The transport owns the open port and moves raw bytes. Reads are bounded
//! by a deadline and return whatever arrived before it expired; deciding
//! whether a short read is an error is left to the codec.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::debug;

use super::ProtocolError;

/// Longest single blocking read, so a long deadline is still polled in slices
const READ_SLICE: Duration = Duration::from_millis(100);

/// Byte-level access to an open link
pub trait Transport: Send {
    /// Write `bytes`, returning how many were written
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError>;

    /// Read up to `n` bytes, giving up once `timeout` has elapsed.
    ///
    /// A timeout is not an error: the bytes received so far are returned.
    fn read(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError>;

    /// Drop stale bytes waiting in the input buffer
    fn discard_input(&mut self) -> Result<(), ProtocolError>;
}

/// Notified of traffic on the link (activity indicators)
pub trait LinkObserver: Send + Sync {
    /// Bytes were written
    fn outgoing(&self, count: usize);

    /// Bytes were received
    fn incoming(&self, count: usize);
}

fn io_to_protocol(e: io::Error) -> ProtocolError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProtocolError::Timeout,
        _ => ProtocolError::Transport(e.to_string()),
    }
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Name of the underlying port, if the platform reports one
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        debug!("serial: writing {} bytes: {:02x?}", bytes.len(), bytes);
        self.port.write_all(bytes).map_err(io_to_protocol)?;
        self.port.flush().map_err(io_to_protocol)?;
        Ok(bytes.len())
    }

    fn read(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let mut response = Vec::with_capacity(n);
        let mut buffer = [0u8; 256];
        let deadline = Instant::now() + timeout;

        while response.len() < n {
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "serial: read timed out with {}/{} bytes",
                    response.len(),
                    n
                );
                break;
            }

            self.port
                .set_timeout((deadline - now).min(READ_SLICE))
                .map_err(|e| ProtocolError::Transport(e.to_string()))?;

            let wanted = (n - response.len()).min(buffer.len());
            match self.port.read(&mut buffer[..wanted]) {
                Ok(count) => response.extend_from_slice(&buffer[..count]),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    debug!("serial: read error: {}", e);
                    return Err(ProtocolError::Transport(e.to_string()));
                }
            }
        }

        debug!("serial: read {} bytes: {:02x?}", response.len(), response);
        Ok(response)
    }

    fn discard_input(&mut self) -> Result<(), ProtocolError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_not_fatal() {
        let err = io_to_protocol(io::ErrorKind::TimedOut.into());
        assert!(matches!(err, ProtocolError::Timeout));
        assert!(!err.is_fatal());
    }

    #[cfg(unix)]
    #[test]
    fn test_name_of_opened_port() {
        let (master, slave) = serialport::TTYPort::pair().unwrap();
        let path = slave.name().or_else(|| master.name()).unwrap();
        let port = serialport::new(&path, 4800).open().unwrap();
        assert_eq!(SerialTransport::new(port).name(), Some(path));
    }

    #[test]
    fn test_other_io_errors_are_fatal() {
        let err = io_to_protocol(io::ErrorKind::BrokenPipe.into());
        assert!(matches!(err, ProtocolError::Transport(_)));
        assert!(err.is_fatal());
    }
}
