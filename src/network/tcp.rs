//! TCP transport over `std::net`.
//!
//! Reads are bounded by a read timeout so the session engine regains control
//! regularly to drive keep-alive and observe disconnect requests.

use super::{Close, Connect, Connection, Error, Read, Write};
use std::io::{ErrorKind, Read as StdRead, Write as StdWrite};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Read timeout used by [`TcpConnector::default`].
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Opens [`TcpConnection`]s to `host:port` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    read_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector whose connections time out reads after `read_timeout`.
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

impl Connect for TcpConnector {
    type Connection = TcpConnection;
    type Error = Error;

    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error> {
        let stream = TcpStream::connect(remote).map_err(|e| match e.kind() {
            ErrorKind::InvalidInput => Error::InvalidAddress,
            ErrorKind::TimedOut => Error::Timeout,
            _ => Error::ConnectionRefused,
        })?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|_| Error::NotOpen)?;
        stream.set_nodelay(true).map_err(|_| Error::NotOpen)?;
        Ok(TcpConnection { stream })
    }
}

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl Read for TcpConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream.read(buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
            _ => Error::ReadError,
        })
    }
}

impl Write for TcpConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf).map_err(|_| Error::WriteError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().map_err(|_| Error::WriteError)
    }
}

impl Close for TcpConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        self.stream
            .shutdown(Shutdown::Both)
            .map_err(|_| Error::NotOpen)
    }
}

impl Connection for TcpConnection {}
