//! Error taxonomy of the session engine.

use crate::network;
use core::fmt;

/// Why the broker refused a CONNECT (CONNACK return codes 1-5).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectReturnCode {
    /// The broker does not support MQTT 3.1.1.
    UnacceptableProtocolVersion = 1,
    /// The client identifier is well formed but not allowed.
    IdentifierRejected = 2,
    /// The MQTT service is unavailable.
    ServerUnavailable = 3,
    /// The user name or password is malformed or wrong.
    BadUsernameOrPassword = 4,
    /// The client is not authorized to connect.
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Map a non-zero CONNACK return code. Returns `None` for 0 and reserved values.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::UnacceptableProtocolVersion),
            2 => Some(Self::IdentifierRejected),
            3 => Some(Self::ServerUnavailable),
            4 => Some(Self::BadUsernameOrPassword),
            5 => Some(Self::NotAuthorized),
            _ => None,
        }
    }
}

/// Reasons a topic filter fails validation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FilterError {
    /// The filter is the empty string.
    Empty,
    /// The filter is longer than the crate's topic buffer.
    TooLong,
    /// The filter contains a NUL character.
    NullCharacter,
    /// `#` is not the whole final level.
    MisplacedMultiLevelWildcard,
    /// `+` shares a level with other characters.
    MisplacedSingleLevelWildcard,
}

/// Inbound frames the codec could not accept.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProtocolError {
    /// Header, length or field layout is invalid.
    MalformedPacket,
    /// A packet type a broker must not send, or one arriving out of order.
    UnexpectedPacket,
    /// The frame does not fit the receive buffer.
    PacketTooLarge,
    /// A topic name is not valid UTF-8.
    InvalidUtf8,
    /// A reserved CONNACK return code.
    InvalidReturnCode,
}

/// Errors returned by the session engine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The transport failed or closed.
    Transport(network::Error),
    /// A handshake, acknowledgement or keep-alive window elapsed.
    Timeout,
    /// The broker refused the connection.
    ConnectionRefused(ConnectReturnCode),
    /// The broker declined a subscription (SUBACK return code).
    SubscriptionRejected(u8),
    /// A topic filter failed local validation. Never sent over the wire.
    InvalidFilter(FilterError),
    /// A topic name is empty, contains wildcards or is too long.
    InvalidTopic,
    /// The client identifier is empty or longer than allowed.
    InvalidClientId,
    /// The operation needs an established session.
    NotConnected,
    /// A fixed-capacity buffer or table is full.
    BufferOverflow,
    /// The broker violated the protocol.
    Protocol(ProtocolError),
}

impl Error {
    /// Fatal errors end the current connection and move the session to `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout | Error::Protocol(_))
    }
}

impl From<network::Error> for Error {
    fn from(e: network::Error) -> Self {
        Error::Transport(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<FilterError> for Error {
    fn from(e: FilterError) -> Self {
        Error::InvalidFilter(e)
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadUsernameOrPassword => "bad user name or password",
            Self::NotAuthorized => "not authorized",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Empty => "empty filter",
            Self::TooLong => "filter too long",
            Self::NullCharacter => "filter contains NUL",
            Self::MisplacedMultiLevelWildcard => "'#' must be the whole last level",
            Self::MisplacedSingleLevelWildcard => "'+' must occupy a whole level",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::MalformedPacket => "malformed packet",
            Self::UnexpectedPacket => "unexpected packet",
            Self::PacketTooLarge => "packet too large",
            Self::InvalidUtf8 => "invalid UTF-8 in topic",
            Self::InvalidReturnCode => "invalid return code",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Timeout => f.write_str("timed out waiting for the broker"),
            Error::ConnectionRefused(code) => write!(f, "connection refused: {code}"),
            Error::SubscriptionRejected(code) => {
                write!(f, "subscription rejected with code {code:#04x}")
            }
            Error::InvalidFilter(e) => write!(f, "invalid topic filter: {e}"),
            Error::InvalidTopic => f.write_str("invalid topic name"),
            Error::InvalidClientId => f.write_str("invalid client identifier"),
            Error::NotConnected => f.write_str("not connected"),
            Error::BufferOverflow => f.write_str("buffer capacity exceeded"),
            Error::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectReturnCode {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::UnacceptableProtocolVersion => defmt::write!(f, "UnacceptableProtocolVersion"),
            Self::IdentifierRejected => defmt::write!(f, "IdentifierRejected"),
            Self::ServerUnavailable => defmt::write!(f, "ServerUnavailable"),
            Self::BadUsernameOrPassword => defmt::write!(f, "BadUsernameOrPassword"),
            Self::NotAuthorized => defmt::write!(f, "NotAuthorized"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FilterError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Empty => defmt::write!(f, "Empty"),
            Self::TooLong => defmt::write!(f, "TooLong"),
            Self::NullCharacter => defmt::write!(f, "NullCharacter"),
            Self::MisplacedMultiLevelWildcard => defmt::write!(f, "MisplacedMultiLevelWildcard"),
            Self::MisplacedSingleLevelWildcard => {
                defmt::write!(f, "MisplacedSingleLevelWildcard")
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ProtocolError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::MalformedPacket => defmt::write!(f, "MalformedPacket"),
            Self::UnexpectedPacket => defmt::write!(f, "UnexpectedPacket"),
            Self::PacketTooLarge => defmt::write!(f, "PacketTooLarge"),
            Self::InvalidUtf8 => defmt::write!(f, "InvalidUtf8"),
            Self::InvalidReturnCode => defmt::write!(f, "InvalidReturnCode"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Transport(e) => defmt::write!(f, "Transport({})", e),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ConnectionRefused(code) => defmt::write!(f, "ConnectionRefused({})", code),
            Error::SubscriptionRejected(code) => {
                defmt::write!(f, "SubscriptionRejected({=u8})", code)
            }
            Error::InvalidFilter(e) => defmt::write!(f, "InvalidFilter({})", e),
            Error::InvalidTopic => defmt::write!(f, "InvalidTopic"),
            Error::InvalidClientId => defmt::write!(f, "InvalidClientId"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            Error::Protocol(e) => defmt::write!(f, "Protocol({})", e),
        }
    }
}
