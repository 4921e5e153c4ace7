//! A transport abstraction layer for the session engine
//!
//! The session engine never touches sockets directly. It talks to anything that
//! implements the traits in this module: an ordered, reliable, bidirectional
//! byte-stream ([`Connection`]) and something that can open one ([`Connect`]).
//! TCP, TLS, a UART bridge or an in-memory test double all fit.
//!

#![deny(unsafe_code)]

/// Common error types for transport operations
pub mod error;

/// `std::net` backed transport
#[cfg(feature = "std")]
pub mod tcp;

pub use error::{Error, TransportError};

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Read, Write};
}

/// Byte-stream input.
pub trait Read {
    /// Associated error type
    ///
    /// Errors classified as timeouts ([`TransportError::is_timeout`]) mean "no
    /// data within the read timeout" and are not fatal to the session.
    type Error: TransportError;
    /// Read data from the connection
    ///
    /// `Ok(0)` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Byte-stream output.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Closing a byte-stream.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}

/// Write the whole buffer, retrying short writes.
pub(crate) fn write_all<W: Write>(writer: &mut W, mut buf: &[u8]) -> Result<(), Error> {
    while !buf.is_empty() {
        match writer.write(buf) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => buf = &buf[n..],
            Err(_) => return Err(Error::WriteError),
        }
    }
    writer.flush().map_err(|_| Error::WriteError)
}
