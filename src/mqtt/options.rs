//! Connection configuration.

use super::packet::QoS;
use serde::Deserialize;

/// Client identifier limit required by MQTT 3.1.1 brokers.
pub const LEGACY_CLIENT_ID_LEN: usize = 23;

/// Acknowledgement timeout used when keep-alive is disabled.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 30_000;

fn default_max_client_id_len() -> usize {
    LEGACY_CLIENT_ID_LEN
}

fn default_keep_alive() -> u16 {
    60
}

fn default_clean_session() -> bool {
    true
}

/// A message the broker publishes on the client's behalf if the connection
/// drops without a DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Will<'a> {
    /// Topic the will is published to.
    #[serde(borrow)]
    pub topic: &'a str,
    /// Will payload.
    #[serde(borrow)]
    pub message: &'a str,
    /// Delivery level of the will.
    #[serde(default = "default_will_qos")]
    pub qos: QoS,
    /// Whether the broker retains the will.
    #[serde(default)]
    pub retain: bool,
}

fn default_will_qos() -> QoS {
    QoS::AtMostOnce
}

/// Configuration options for a session.
///
/// These options control how the client connects to the MQTT broker and
/// behaves during the session. [`Options::new`] fills in the defaults; every
/// field is public for adjustment.
///
/// # Examples
///
/// ```rust
/// use libmqtt::mqtt::Options;
///
/// let mut options = Options::new("my_iot_device");
/// options.keep_alive_seconds = 30;
/// assert!(options.clean_session);
/// assert_eq!(options.max_client_id_len, 23);
///
/// let json = br#"{"client_id":"sensor-7","keep_alive_seconds":15,"username":"dev"}"#;
/// let options = Options::from_json(json).unwrap();
/// assert_eq!(options.client_id, "sensor-7");
/// assert_eq!(options.username, Some("dev"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Options<'a> {
    /// The client identifier, must be unique within the broker.
    ///
    /// Must be non-empty and at most [`max_client_id_len`](Self::max_client_id_len)
    /// bytes.
    #[serde(borrow)]
    pub client_id: &'a str,

    /// The keep-alive time interval in seconds.
    ///
    /// A PINGREQ is sent when nothing else was sent for this long; a missing
    /// PINGRESP after 1.5 times the interval fails the session. 0 disables
    /// keep-alive.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u16,

    /// Whether to start a clean session.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Longest accepted client identifier.
    ///
    /// Defaults to 23 bytes, the limit every 3.1.1 broker must accept. Raise
    /// it for brokers that allow longer identifiers.
    #[serde(default = "default_max_client_id_len")]
    pub max_client_id_len: usize,

    /// How long to wait for CONNACK, SUBACK, UNSUBACK and publish
    /// acknowledgements. `None` derives it from the keep-alive interval.
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,

    /// User name for broker authentication.
    #[serde(default, borrow)]
    pub username: Option<&'a str>,

    /// Password for broker authentication. Only sent along with a user name.
    #[serde(default, borrow)]
    pub password: Option<&'a str>,

    /// Last-will message.
    #[serde(default, borrow)]
    pub will: Option<Will<'a>>,
}

/// Reasons [`Options::from_json`] rejects a document.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConfigError {
    /// The document is not valid JSON for [`Options`].
    Parse,
    /// Bytes remain after the JSON object.
    TrailingCharacters,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Parse => f.write_str("invalid options document"),
            ConfigError::TrailingCharacters => f.write_str("trailing characters after options"),
        }
    }
}

impl core::error::Error for ConfigError {}

#[cfg(feature = "defmt")]
impl defmt::Format for ConfigError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConfigError::Parse => defmt::write!(f, "Parse"),
            ConfigError::TrailingCharacters => defmt::write!(f, "TrailingCharacters"),
        }
    }
}

impl<'a> Options<'a> {
    /// Options with a 60 second keep-alive, a clean session and no credentials.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive_seconds: default_keep_alive(),
            clean_session: default_clean_session(),
            max_client_id_len: default_max_client_id_len(),
            ack_timeout_ms: None,
            username: None,
            password: None,
            will: None,
        }
    }

    /// Parse options from a JSON object.
    ///
    /// Strings are borrowed from `json`, so they must not contain escape
    /// sequences. QoS values are the integers 0, 1 or 2.
    pub fn from_json(json: &'a [u8]) -> Result<Self, ConfigError> {
        match serde_json_core::from_slice::<Options<'a>>(json) {
            Ok((options, _)) => Ok(options),
            Err(serde_json_core::de::Error::TrailingCharacters) => {
                Err(ConfigError::TrailingCharacters)
            }
            Err(_) => Err(ConfigError::Parse),
        }
    }

    /// `true` if the client identifier is usable with these options.
    pub fn client_id_is_valid(&self) -> bool {
        !self.client_id.is_empty() && self.client_id.len() <= self.max_client_id_len
    }

    /// The acknowledgement window in milliseconds.
    pub fn ack_window_ms(&self) -> u64 {
        match (self.ack_timeout_ms, self.keep_alive_seconds) {
            (Some(ms), _) => ms,
            (None, 0) => DEFAULT_ACK_TIMEOUT_MS,
            (None, secs) => u64::from(secs) * 1500,
        }
    }
}
