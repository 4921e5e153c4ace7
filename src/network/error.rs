//! Common error types for transport operations

use core::fmt;

/// A common error type for transport operations.
///
/// This enum defines a set of common errors that can occur when working with
/// a byte-stream transport. It is designed to be simple and portable for
/// `no_std` environments.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// An operation was attempted on a connection that is not open.
    NotOpen,
    /// An error occurred during a write operation.
    WriteError,
    /// An error occurred during a read operation.
    ReadError,
    /// A connection attempt was refused.
    ConnectionRefused,
    /// No data arrived within the read timeout.
    Timeout,
    /// The connection was closed by the peer.
    ConnectionClosed,
    /// An invalid address was provided.
    InvalidAddress,
}

/// Classification of transport read errors.
///
/// A blocking transport bounds each read with a timeout. The session engine
/// needs to tell that case apart from a broken stream: a timed-out read is the
/// point where it checks keep-alive deadlines and pending disconnect requests.
pub trait TransportError: fmt::Debug {
    /// `true` when the read gave up because no data arrived in time.
    fn is_timeout(&self) -> bool {
        false
    }
}

impl TransportError for Error {
    fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl TransportError for () {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotOpen => "connection not open",
            Error::WriteError => "write failed",
            Error::ReadError => "read failed",
            Error::ConnectionRefused => "connection refused",
            Error::Timeout => "read timed out",
            Error::ConnectionClosed => "connection closed by peer",
            Error::InvalidAddress => "invalid address",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotOpen => defmt::write!(f, "NotOpen"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::ConnectionRefused => defmt::write!(f, "ConnectionRefused"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ConnectionClosed => defmt::write!(f, "ConnectionClosed"),
            Error::InvalidAddress => defmt::write!(f, "InvalidAddress"),
        }
    }
}
